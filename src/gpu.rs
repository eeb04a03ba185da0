//! Core GPU context and device management.
//!
//! [`GpuContext`] owns the wgpu adapter, device and queue, plus an optional window
//! surface. It is created once at startup and passed by reference to every pass.
//!
//! Two constructors exist:
//!
//! - [`GpuContext::new`] for a winit window (surface configured with an sRGB format).
//! - [`GpuContext::headless`] for off-screen rendering and GPU tests; no surface is
//!   created and the "screen" is whatever texture the caller renders into.
//!
//! During creation the optional capabilities the pipeline cares about are detected
//! into [`GpuCapabilities`]. Missing ones are logged once and the pipeline degrades
//! instead of failing.

use std::sync::Arc;
use winit::window::Window;

use crate::error::Result;

/// Texture format used for the display surface when running headless.
pub const HEADLESS_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

/// Optional device capabilities that change how wide-range targets are used.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GpuCapabilities {
    /// `Rgba32Float` textures can be sampled with linear filtering.
    pub float32_filterable: bool,
    /// `Rgba32Float` render targets accept a blend state.
    pub float32_blendable: bool,
}

impl GpuCapabilities {
    /// Features worth requesting from `adapter` when it offers them.
    pub fn wanted_features(adapter: &wgpu::Adapter) -> wgpu::Features {
        adapter.features()
            & (wgpu::Features::FLOAT32_FILTERABLE | wgpu::Features::FLOAT32_BLENDABLE)
    }

    /// Reads the capabilities actually enabled on `device`, warning about the missing ones.
    pub fn detect(device: &wgpu::Device) -> Self {
        let features = device.features();
        let caps = Self {
            float32_filterable: features.contains(wgpu::Features::FLOAT32_FILTERABLE),
            float32_blendable: features.contains(wgpu::Features::FLOAT32_BLENDABLE),
        };
        if !caps.float32_filterable {
            log::warn!(
                "Float32 filtering unavailable; wide-range targets use nearest sampling"
            );
        }
        if !caps.float32_blendable {
            log::warn!("Float32 blending unavailable; wide-range stages write without blending");
        }
        caps
    }

    /// Sample type stages declare for their input textures.
    pub fn sample_type(&self) -> wgpu::TextureSampleType {
        wgpu::TextureSampleType::Float {
            filterable: self.float32_filterable,
        }
    }

    /// Sampler binding type matching [`sample_type`](Self::sample_type).
    pub fn sampler_binding(&self) -> wgpu::SamplerBindingType {
        if self.float32_filterable {
            wgpu::SamplerBindingType::Filtering
        } else {
            wgpu::SamplerBindingType::NonFiltering
        }
    }

    /// Filter mode for stage samplers.
    pub fn filter_mode(&self) -> wgpu::FilterMode {
        if self.float32_filterable {
            wgpu::FilterMode::Linear
        } else {
            wgpu::FilterMode::Nearest
        }
    }

    /// Blend state for a color target of `format`, or `None` when it cannot blend.
    pub fn blend_for(&self, format: wgpu::TextureFormat) -> Option<wgpu::BlendState> {
        let is_float32 = matches!(
            format,
            wgpu::TextureFormat::Rgba32Float
                | wgpu::TextureFormat::Rg32Float
                | wgpu::TextureFormat::R32Float
        );
        if is_float32 && !self.float32_blendable {
            None
        } else {
            Some(wgpu::BlendState::REPLACE)
        }
    }
}

/// Core GPU context holding wgpu resources.
///
/// All fields are public so callers can reach the raw wgpu API when needed.
pub struct GpuContext {
    /// Adapter the device was created from; used to query format support.
    pub adapter: wgpu::Adapter,
    /// The logical GPU device for creating resources and pipelines.
    pub device: wgpu::Device,
    /// The command queue for submitting work to the GPU.
    pub queue: wgpu::Queue,
    /// Window surface, absent when headless.
    pub surface: Option<wgpu::Surface<'static>>,
    /// Current output configuration (format and size). Also tracked when headless.
    pub config: wgpu::SurfaceConfiguration,
    /// Optional features that were enabled.
    pub capabilities: GpuCapabilities,
}

impl GpuContext {
    /// Create a new GPU context presenting to a winit window.
    pub fn new(window: Arc<Window>) -> Result<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance.create_surface(window)?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))?;

        let (device, queue) = Self::request_device(&adapter)?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let capabilities = GpuCapabilities::detect(&device);

        Ok(Self {
            adapter,
            device,
            queue,
            surface: Some(surface),
            config,
            capabilities,
        })
    }

    /// Create a GPU context without a window.
    ///
    /// The output size and [`HEADLESS_FORMAT`] are recorded in `config` so the
    /// pipeline can be built exactly as for a window.
    pub fn headless(width: u32, height: u32) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: None,
            force_fallback_adapter: false,
        }))?;

        let (device, queue) = Self::request_device(&adapter)?;
        let capabilities = GpuCapabilities::detect(&device);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: HEADLESS_FORMAT,
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: wgpu::CompositeAlphaMode::Opaque,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        Ok(Self {
            adapter,
            device,
            queue,
            surface: None,
            config,
            capabilities,
        })
    }

    fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue)> {
        let info = adapter.get_info();
        log::info!("Using adapter '{}' ({:?})", info.name, info.backend);

        let device_and_queue = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Umbra Device"),
            required_features: GpuCapabilities::wanted_features(adapter),
            required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
            memory_hints: Default::default(),
            trace: Default::default(),
            experimental_features: Default::default(),
        }))?;
        Ok(device_and_queue)
    }

    /// Resize the output to new dimensions.
    ///
    /// Ignores zero-sized dimensions (which occur while a window is minimized).
    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.config.width = width;
            self.config.height = height;
            if let Some(surface) = &self.surface {
                surface.configure(&self.device, &self.config);
            }
        }
    }

    /// Returns the current output width in pixels.
    pub fn width(&self) -> u32 {
        self.config.width
    }

    /// Returns the current output height in pixels.
    pub fn height(&self) -> u32 {
        self.config.height
    }

    /// Returns the current aspect ratio (width / height).
    pub fn aspect(&self) -> f32 {
        self.config.width as f32 / self.config.height as f32
    }

    /// Format of the display surface (or [`HEADLESS_FORMAT`]).
    pub fn screen_format(&self) -> wgpu::TextureFormat {
        self.config.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONE: GpuCapabilities = GpuCapabilities {
        float32_filterable: false,
        float32_blendable: false,
    };

    #[test]
    fn unfilterable_float_uses_nearest_sampling() {
        assert_eq!(NONE.filter_mode(), wgpu::FilterMode::Nearest);
        assert_eq!(NONE.sampler_binding(), wgpu::SamplerBindingType::NonFiltering);
        assert_eq!(
            NONE.sample_type(),
            wgpu::TextureSampleType::Float { filterable: false }
        );
    }

    #[test]
    fn float32_targets_drop_blending_without_the_feature() {
        assert!(NONE.blend_for(wgpu::TextureFormat::Rgba32Float).is_none());
        assert!(NONE.blend_for(wgpu::TextureFormat::Rgba8UnormSrgb).is_some());

        let full = GpuCapabilities {
            float32_filterable: true,
            float32_blendable: true,
        };
        assert!(full.blend_for(wgpu::TextureFormat::Rgba32Float).is_some());
        assert_eq!(full.filter_mode(), wgpu::FilterMode::Linear);
    }
}
