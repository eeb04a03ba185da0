//! Render targets: the textures every pass reads from and writes to.

use crate::error::{PipelineError, Result};
use crate::gpu::GpuContext;

/// Precision tier of a render target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 32-bit float RGBA, for HDR radiance and positions.
    WideF32,
    /// 8-bit linear RGBA, for normals, albedo, and auxiliary data.
    NarrowU8,
    /// 8-bit sRGB-encoded RGBA, for display-range colour.
    NarrowU8Srgb,
    /// 32-bit float depth.
    Depth32,
}

impl PixelFormat {
    pub const fn texture_format(self) -> wgpu::TextureFormat {
        match self {
            Self::WideF32 => wgpu::TextureFormat::Rgba32Float,
            Self::NarrowU8 => wgpu::TextureFormat::Rgba8Unorm,
            Self::NarrowU8Srgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            Self::Depth32 => wgpu::TextureFormat::Depth32Float,
        }
    }

    /// Whether values outside `[0, 1]` survive a write.
    pub fn is_wide(self) -> bool {
        matches!(self, Self::WideF32 | Self::Depth32)
    }

    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::WideF32 => 16,
            Self::NarrowU8 | Self::NarrowU8Srgb | Self::Depth32 => 4,
        }
    }

    fn usages(self) -> wgpu::TextureUsages {
        let base = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING;
        match self {
            Self::Depth32 => base,
            _ => base | wgpu::TextureUsages::COPY_SRC,
        }
    }
}

/// A GPU texture sized to the output, usable as attachment and as shader input.
///
/// Targets are never resized in place. A resize drops the old target and
/// allocates a new one, so a live `RenderTarget` always has the dimensions it
/// was created with.
#[derive(Debug)]
pub struct RenderTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    format: PixelFormat,
    label: String,
}

impl RenderTarget {
    /// Allocates a `width` x `height` target.
    ///
    /// Fails with [`PipelineError::UnsupportedFormat`] when the adapter cannot
    /// render to and sample from `format`, and with
    /// [`PipelineError::TargetTooLarge`] when the size exceeds the device limit.
    pub fn new(
        gpu: &GpuContext,
        label: &str,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self> {
        let max = gpu.device.limits().max_texture_dimension_2d;
        if width > max || height > max {
            return Err(PipelineError::TargetTooLarge { width, height, max });
        }

        let texture_format = format.texture_format();
        let usages = format.usages();
        let supported = gpu
            .adapter
            .get_texture_format_features(texture_format)
            .allowed_usages;
        if !supported.contains(usages) {
            return Err(PipelineError::UnsupportedFormat {
                label: label.to_string(),
                format: texture_format,
                reason: format!("adapter allows {:?}, need {:?}", supported, usages),
            });
        }

        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format,
            usage: usages,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(Self {
            texture,
            view,
            width,
            height,
            format,
            label: label.to_string(),
        })
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// The final destination of a frame: a swapchain image or any caller texture.
#[derive(Clone, Copy, Debug)]
pub struct ScreenTarget<'a> {
    pub view: &'a wgpu::TextureView,
    pub format: wgpu::TextureFormat,
    pub width: u32,
    pub height: u32,
}

impl<'a> ScreenTarget<'a> {
    pub fn new(
        view: &'a wgpu::TextureView,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            view,
            format,
            width,
            height,
        }
    }

    /// Screen backed by `texture`, using its format and size.
    pub fn from_texture(texture: &wgpu::Texture, view: &'a wgpu::TextureView) -> Self {
        Self {
            view,
            format: texture.format(),
            width: texture.width(),
            height: texture.height(),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_map_to_expected_formats() {
        assert_eq!(PixelFormat::WideF32.texture_format(), wgpu::TextureFormat::Rgba32Float);
        assert_eq!(PixelFormat::NarrowU8.texture_format(), wgpu::TextureFormat::Rgba8Unorm);
        assert!(PixelFormat::WideF32.is_wide());
        assert!(!PixelFormat::NarrowU8Srgb.is_wide());
        assert_eq!(PixelFormat::WideF32.bytes_per_pixel(), 16);
    }

    #[test]
    fn colour_targets_can_be_read_back() {
        assert!(PixelFormat::WideF32.usages().contains(wgpu::TextureUsages::COPY_SRC));
        assert!(!PixelFormat::Depth32.usages().contains(wgpu::TextureUsages::COPY_SRC));
    }
}
