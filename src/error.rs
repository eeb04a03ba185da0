//! Error types for the render pipeline.
//!
//! Three kinds of failure exist:
//!
//! - **Configuration errors** ([`PipelineError::UnsupportedFormat`],
//!   [`PipelineError::IncompleteTarget`], [`PipelineError::TargetTooLarge`]) are
//!   raised while allocating render targets. They are fatal: the pipeline is left
//!   not ready and refuses further frames until a successful `set_size`.
//! - **Ordering errors** ([`PipelineError::OutOfOrder`], [`PipelineError::Hazard`],
//!   [`PipelineError::StaleTargets`]) mean the caller drove the frame state machine
//!   incorrectly. Stage errors ([`PipelineError::InputMismatch`],
//!   [`PipelineError::UnsupportedOutput`]) mean a stage cannot run on the given
//!   targets. Both are caught before any pass of the state is recorded, and the
//!   state is left unchanged.
//! - **Device errors** come straight from wgpu.
//!
//! Missing optional GPU capabilities are not errors; they are logged and the
//! pipeline degrades. Setting a parameter a shader does not declare is not an
//! error either.

use thiserror::Error;

use crate::render_graph::FrameState;

/// Errors produced by the GPU context and the render pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// No adapter matched the request.
    #[error("Failed to request WGPU adapter: {0}")]
    AdapterRequest(#[from] wgpu::RequestAdapterError),

    /// Device creation failed.
    #[error("Failed to create WGPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    /// The window surface could not be created.
    #[error("Failed to create surface: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),

    /// The swapchain texture could not be acquired.
    #[error("Surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),

    /// A target format cannot be used as a render attachment on this device.
    #[error("Render target '{label}' cannot use {format:?}: {reason}")]
    UnsupportedFormat {
        label: String,
        format: wgpu::TextureFormat,
        reason: String,
    },

    /// The device rejected the attachment set while allocating.
    #[error("Render target '{label}' is incomplete: {message}")]
    IncompleteTarget { label: String, message: String },

    /// Requested dimensions exceed the device limit.
    #[error("Render target size {width}x{height} exceeds device limit {max}")]
    TargetTooLarge { width: u32, height: u32, max: u32 },

    /// A previous configuration error left the pipeline without usable targets.
    #[error("Pipeline is not ready; resize to a supported configuration first")]
    NotReady,

    /// The output surface and the allocated targets disagree on size.
    #[error("Targets are {expected:?} but the output is {found:?}; call set_size first")]
    StaleTargets {
        expected: (u32, u32),
        found: (u32, u32),
    },

    /// A frame entry point was called in the wrong state.
    #[error("Cannot move from {from:?} to {to:?}")]
    OutOfOrder { from: FrameState, to: FrameState },

    /// A frame plan reads and writes the same buffer or crosses a precision tier.
    #[error("Pass '{pass}' violates a buffer rule: {reason}")]
    Hazard { pass: String, reason: String },

    /// A stage was given the wrong number of input textures.
    #[error("Stage '{stage}' expects {expected} inputs, got {found}")]
    InputMismatch {
        stage: String,
        expected: usize,
        found: usize,
    },

    /// A stage was asked to write a format it was not compiled for.
    #[error("Stage '{stage}' has no pipeline for {format:?}")]
    UnsupportedOutput {
        stage: String,
        format: wgpu::TextureFormat,
    },

    /// Copying a texture back to the CPU failed.
    #[error("Readback failed: {0}")]
    Readback(String),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;
