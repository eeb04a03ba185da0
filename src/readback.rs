//! Blocking copies of render targets back to the CPU.
//!
//! Used by diagnostics and GPU tests; never on the per-frame path.

use crate::error::{PipelineError, Result};
use crate::gpu::GpuContext;
use crate::render_graph::{PixelFormat, RenderTarget};

/// Copies `texture` into tightly packed rows of `bytes_per_pixel`-sized texels.
pub fn read_texture_bytes(
    gpu: &GpuContext,
    texture: &wgpu::Texture,
    bytes_per_pixel: u32,
) -> Result<Vec<u8>> {
    let (width, height) = (texture.width(), texture.height());
    let unpadded = width * bytes_per_pixel;
    let padded = unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
        * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

    let buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Buffer"),
        size: padded as u64 * height as u64,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
    encoder.copy_texture_to_buffer(
        texture.as_image_copy(),
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    gpu.queue.submit([encoder.finish()]);

    let slice = buffer.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |res| {
        let _ = tx.send(res);
    });
    gpu.device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|e| PipelineError::Readback(e.to_string()))?;
    rx.recv()
        .map_err(|e| PipelineError::Readback(e.to_string()))?
        .map_err(|e| PipelineError::Readback(e.to_string()))?;

    let data = slice.get_mapped_range();
    let mut out = Vec::with_capacity((unpadded * height) as usize);
    for row in data.chunks(padded as usize) {
        out.extend_from_slice(&row[..unpadded as usize]);
    }
    drop(data);
    buffer.unmap();
    Ok(out)
}

/// Reads a `WideF32` target as RGBA floats.
pub fn read_rgba32f(gpu: &GpuContext, target: &RenderTarget) -> Result<Vec<[f32; 4]>> {
    if target.format() != PixelFormat::WideF32 {
        return Err(PipelineError::Readback(format!(
            "'{}' is {:?}, not WideF32",
            target.label(),
            target.format()
        )));
    }
    let bytes = read_texture_bytes(gpu, target.texture(), 16)?;
    Ok(bytes
        .chunks_exact(16)
        .map(|px| {
            let mut texel = [0.0f32; 4];
            for (c, chunk) in texel.iter_mut().zip(px.chunks_exact(4)) {
                *c = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            }
            texel
        })
        .collect())
}

/// Reads any 4-byte RGBA texture (`Rgba8Unorm`, `Rgba8UnormSrgb`, ...) as raw texels.
pub fn read_rgba8(gpu: &GpuContext, texture: &wgpu::Texture) -> Result<Vec<[u8; 4]>> {
    let bytes = read_texture_bytes(gpu, texture, 4)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|px| [px[0], px[1], px[2], px[3]])
        .collect())
}
