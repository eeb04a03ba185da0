//! Render targets, buffer pools, frame scheduling, and the pipeline that ties
//! them together.
//!
//! - [`RenderTarget`] / [`GBuffer`]: GPU textures sized to the output
//! - [`BufferPool`]: role-addressed rings of wide-range and display-range targets
//! - [`FramePlan`] / [`FrameState`]: the per-frame pass list and state machine
//! - [`Pipeline`]: owns all of the above and exposes the frame entry points

mod buffer_pool;
mod gbuffer;
mod pipeline;
mod render_target;
mod schedule;

pub use buffer_pool::{BufferPool, DisplayPool, DisplaySlot, SlotRole, WidePool, WideSlot};
pub use gbuffer::{GBuffer, GBufferChannel};
pub use pipeline::{Pipeline, StageBinding};
pub use render_target::{PixelFormat, RenderTarget, ScreenTarget};
pub use schedule::{FramePlan, FrameState, PassKind, PassRecord, Resource, Tier};
