//! # Umbra
//!
//! **A deferred renderer with a wide-range and a display-range post-processing chain.**
//!
//! Scene geometry is written into a GBuffer, lit once into a floating-point
//! buffer, run through optional HDR effects (bloom, depth of field), tonemapped,
//! and finally through optional display-range stages (an oil-paint filter and
//! any stages you add) on its way to the screen.
//!
//! ## Quick Start
//!
//! ```no_run
//! use umbra::*;
//!
//! # fn main() -> umbra::Result<()> {
//! let gpu = GpuContext::headless(640, 480)?;
//! let mut pipeline = Pipeline::new(&gpu, gpu.screen_format())?;
//! pipeline.set_config(PipelineConfig::new().with_bloom(true).with_bloom_threshold(0.6));
//!
//! let cube = Mesh::cube(&gpu);
//! let drawables = [MeshInstance::new(&cube, Transform::new()).emissive(2.0)];
//! let camera = Camera::new().at(0.0, 0.0, 5.0);
//!
//! # let texture: wgpu::Texture = unimplemented!();
//! let view = texture.create_view(&Default::default());
//! let screen = ScreenTarget::from_texture(&texture, &view);
//! pipeline.render_frame(&gpu, &camera, &drawables, &screen)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Buffers
//!
//! | Buffer       | Slots     | Format                     | Used by                     |
//! |--------------|-----------|----------------------------|-----------------------------|
//! | GBuffer      | 4 + depth | `Rgba32Float`, `Rgba8Unorm` | geometry, resolve, DOF      |
//! | Wide pool    | 3         | `Rgba32Float`              | resolve, bloom, DOF, tonemap |
//! | Display pool | 2         | `Rgba8UnormSrgb`           | tonemap, display stages     |
//!
//! Single-threaded use is assumed: configuration changes happen between frames,
//! from the thread that drives the pipeline.

mod camera;
mod config;
mod error;
mod geometry_pass;
mod gpu;
mod mesh;
pub mod readback;
pub mod render_graph;
mod stage;

pub use camera::{Camera, ViewProjection};
pub use config::{FeatureToggles, PipelineConfig, effective_bloom_threshold};
pub use error::{PipelineError, Result};
pub use geometry_pass::GeometryPass;
pub use gpu::{GpuCapabilities, GpuContext, HEADLESS_FORMAT};
pub use mesh::{DEFAULT_ALBEDO, Drawable, Mesh, MeshInstance, Transform, Vertex3d};
pub use render_graph::{
    DisplaySlot, FramePlan, FrameState, GBuffer, GBufferChannel, PassKind, PassRecord, Pipeline,
    PixelFormat, RenderTarget, Resource, ScreenTarget, StageBinding, WideSlot,
};
pub use stage::{ParamValue, Stage, StageDescriptor, UniformLayout, UniformType};
