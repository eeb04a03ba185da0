//! Geometry buffer written by the geometry pass.
//!
//! | Channel    | Format       | Contents                                      |
//! |------------|--------------|-----------------------------------------------|
//! | `Position` | `WideF32`    | view-space position, alpha = view depth (0 = empty) |
//! | `Normal`   | `NarrowU8`   | view-space normal, encoded as `n * 0.5 + 0.5` |
//! | `Albedo`   | `NarrowU8`   | surface colour                                |
//! | `Aux`      | `NarrowU8`   | red = emissive strength, scaled into `[0, 1]` |
//!
//! Plus a `Depth32` attachment used only for depth testing.

use super::render_target::{PixelFormat, RenderTarget};
use crate::error::Result;
use crate::gpu::GpuContext;

/// One color attachment of the [`GBuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GBufferChannel {
    Position,
    Normal,
    Albedo,
    Aux,
}

impl GBufferChannel {
    /// All channels in attachment order.
    pub const ALL: [Self; 4] = [Self::Position, Self::Normal, Self::Albedo, Self::Aux];

    /// Attachment location in the geometry shader.
    pub fn index(self) -> usize {
        match self {
            Self::Position => 0,
            Self::Normal => 1,
            Self::Albedo => 2,
            Self::Aux => 3,
        }
    }

    pub fn format(self) -> PixelFormat {
        match self {
            Self::Position => PixelFormat::WideF32,
            Self::Normal | Self::Albedo | Self::Aux => PixelFormat::NarrowU8,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Position => "GBuffer Position",
            Self::Normal => "GBuffer Normal",
            Self::Albedo => "GBuffer Albedo",
            Self::Aux => "GBuffer Aux",
        }
    }
}

/// Four color attachments plus depth, all the same size.
#[derive(Debug)]
pub struct GBuffer {
    position: RenderTarget,
    normal: RenderTarget,
    albedo: RenderTarget,
    aux: RenderTarget,
    depth: RenderTarget,
}

impl GBuffer {
    /// Allocates every attachment at `width` x `height`.
    pub fn allocate(gpu: &GpuContext, width: u32, height: u32) -> Result<Self> {
        let color = |channel: GBufferChannel| {
            RenderTarget::new(gpu, channel.label(), width, height, channel.format())
        };
        Ok(Self {
            position: color(GBufferChannel::Position)?,
            normal: color(GBufferChannel::Normal)?,
            albedo: color(GBufferChannel::Albedo)?,
            aux: color(GBufferChannel::Aux)?,
            depth: RenderTarget::new(gpu, "GBuffer Depth", width, height, PixelFormat::Depth32)?,
        })
    }

    pub fn channel(&self, channel: GBufferChannel) -> &RenderTarget {
        match channel {
            GBufferChannel::Position => &self.position,
            GBufferChannel::Normal => &self.normal,
            GBufferChannel::Albedo => &self.albedo,
            GBufferChannel::Aux => &self.aux,
        }
    }

    pub fn depth(&self) -> &RenderTarget {
        &self.depth
    }

    /// Color attachment views in attachment order.
    pub fn views(&self) -> [&wgpu::TextureView; 4] {
        GBufferChannel::ALL.map(|c| self.channel(c).view())
    }

    /// Color attachment formats in attachment order.
    pub fn color_formats() -> [wgpu::TextureFormat; 4] {
        GBufferChannel::ALL.map(|c| c.format().texture_format())
    }

    pub fn size(&self) -> (u32, u32) {
        self.position.size()
    }

    /// Records a pass clearing every attachment.
    ///
    /// Colour channels clear to zero, which marks every pixel as empty, and depth
    /// clears to the far plane.
    pub fn clear(&self, encoder: &mut wgpu::CommandEncoder) {
        let attachments = self.views().map(|view| {
            Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })
        });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("GBuffer Clear"),
            color_attachments: &attachments,
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: self.depth.view(),
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
    }
}
