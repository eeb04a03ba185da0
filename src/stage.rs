//! Full-screen shader stages with named, reflected parameters.
//!
//! A [`Stage`] wraps a WGSL fragment program, its input texture count, and one
//! compiled render pipeline per output format it may write. Every post-processing
//! step and the deferred resolve are stages.
//!
//! # Shader Contract
//!
//! The fullscreen vertex entry point `vs` and its output struct are prepended to
//! every stage source, so a stage only provides `fs`:
//!
//! ```wgsl
//! struct Params {
//!     resolution: vec2f,
//!     time: f32,
//!     threshold: f32,
//! }
//! @group(0) @binding(0) var<uniform> params: Params;
//! @group(0) @binding(1) var input_sampler: sampler;
//! @group(0) @binding(2) var input0: texture_2d<f32>;
//!
//! @fragment
//! fn fs(in: VsOut) -> @location(0) vec4f {
//!     return textureSampleLevel(input0, input_sampler, in.uv, 0.0);
//! }
//! ```
//!
//! Input textures occupy bindings `2..2 + inputs` in order. Parameters are the
//! members of `struct Params`; [`Stage::set_parameter`] on a name the struct does
//! not declare is a no-op, which lets unrelated shaders share one interface.

use std::cell::Cell;

use glam::Mat4;
use wgpu::util::DeviceExt;

use crate::error::{PipelineError, Result};
use crate::gpu::GpuContext;

const FULLSCREEN_VS: &str = include_str!("shaders/fullscreen.wgsl");

/// Binding index of the first input texture.
pub const FIRST_INPUT_BINDING: u32 = 2;

/// Parameter uploads a stage keeps per frame before falling back to one-off buffers.
const UNIFORM_SLOTS: u64 = 4;

/// Distance between uniform slots: `size` rounded up to the device's offset alignment.
fn uniform_stride(size: u64, alignment: u64) -> u64 {
    size.div_ceil(alignment) * alignment
}

/// WGSL member types a `Params` struct may contain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniformType {
    F32,
    U32,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
}

impl UniformType {
    fn from_naga(inner: &naga::TypeInner) -> Option<Self> {
        use naga::{Scalar, TypeInner, VectorSize};
        match *inner {
            TypeInner::Scalar(Scalar::F32) => Some(Self::F32),
            TypeInner::Scalar(Scalar::U32) => Some(Self::U32),
            TypeInner::Vector {
                size,
                scalar: Scalar::F32,
            } => Some(match size {
                VectorSize::Bi => Self::Vec2,
                VectorSize::Tri => Self::Vec3,
                VectorSize::Quad => Self::Vec4,
            }),
            TypeInner::Matrix {
                columns: VectorSize::Quad,
                rows: VectorSize::Quad,
                scalar: Scalar::F32,
            } => Some(Self::Mat4),
            _ => None,
        }
    }

    pub fn size(self) -> u32 {
        match self {
            Self::F32 | Self::U32 => 4,
            Self::Vec2 => 8,
            Self::Vec3 => 12,
            Self::Vec4 => 16,
            Self::Mat4 => 64,
        }
    }
}

/// One member of a stage's `Params` struct.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniformField {
    pub name: String,
    pub ty: UniformType,
    pub offset: u32,
}

/// Byte layout of a `Params` struct, reflected from WGSL source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UniformLayout {
    fields: Vec<UniformField>,
    size: u32,
}

impl UniformLayout {
    /// Reflects `struct Params { ... }` from `source`.
    ///
    /// Offsets and size come from naga, so `@align`, `@size` and comments are
    /// honoured exactly as the shader compiler sees them. Source that does not
    /// parse, or has no `Params` struct, yields an empty layout. Members of
    /// unsupported types are left out and therefore cannot be set.
    pub fn from_wgsl(source: &str) -> Self {
        match naga::front::wgsl::parse_str(source) {
            Ok(module) => Self::from_module(&module),
            Err(err) => {
                log::warn!("Cannot reflect stage parameters:\n{}", err.emit_to_string(source));
                Self::default()
            }
        }
    }

    fn from_module(module: &naga::Module) -> Self {
        let params = module.types.iter().find_map(|(_, ty)| match &ty.inner {
            naga::TypeInner::Struct { members, span } if ty.name.as_deref() == Some("Params") => {
                Some((members, *span))
            }
            _ => None,
        });
        let Some((members, span)) = params else {
            return Self::default();
        };

        let fields = members
            .iter()
            .filter_map(|member| {
                let name = member.name.clone()?;
                match UniformType::from_naga(&module.types[member.ty].inner) {
                    Some(ty) => Some(UniformField {
                        name,
                        ty,
                        offset: member.offset,
                    }),
                    None => {
                        log::warn!("Params member '{}' has an unsupported type", name);
                        None
                    }
                }
            })
            .collect();

        Self { fields, size: span }
    }

    pub fn field(&self, name: &str) -> Option<&UniformField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn fields(&self) -> &[UniformField] {
        &self.fields
    }

    /// Struct size in bytes, padding included.
    pub fn size(&self) -> u32 {
        self.size
    }
}

/// A value for a stage parameter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ParamValue {
    F32(f32),
    U32(u32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat4(Mat4),
}

impl ParamValue {
    pub fn ty(&self) -> UniformType {
        match self {
            Self::F32(_) => UniformType::F32,
            Self::U32(_) => UniformType::U32,
            Self::Vec2(_) => UniformType::Vec2,
            Self::Vec3(_) => UniformType::Vec3,
            Self::Vec4(_) => UniformType::Vec4,
            Self::Mat4(_) => UniformType::Mat4,
        }
    }

    fn write(&self, out: &mut [u8]) {
        match self {
            Self::F32(v) => out.copy_from_slice(bytemuck::bytes_of(v)),
            Self::U32(v) => out.copy_from_slice(bytemuck::bytes_of(v)),
            Self::Vec2(v) => out.copy_from_slice(bytemuck::cast_slice(v)),
            Self::Vec3(v) => out.copy_from_slice(bytemuck::cast_slice(v)),
            Self::Vec4(v) => out.copy_from_slice(bytemuck::cast_slice(v)),
            Self::Mat4(m) => out.copy_from_slice(bytemuck::cast_slice(&m.to_cols_array())),
        }
    }

    fn read(ty: UniformType, bytes: &[u8]) -> Self {
        let floats: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        match ty {
            UniformType::F32 => Self::F32(floats[0]),
            UniformType::U32 => {
                Self::U32(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            UniformType::Vec2 => Self::Vec2([floats[0], floats[1]]),
            UniformType::Vec3 => Self::Vec3([floats[0], floats[1], floats[2]]),
            UniformType::Vec4 => Self::Vec4([floats[0], floats[1], floats[2], floats[3]]),
            UniformType::Mat4 => Self::Mat4(Mat4::from_cols_slice(&floats)),
        }
    }
}

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        Self::F32(v)
    }
}

impl From<u32> for ParamValue {
    fn from(v: u32) -> Self {
        Self::U32(v)
    }
}

impl From<[f32; 2]> for ParamValue {
    fn from(v: [f32; 2]) -> Self {
        Self::Vec2(v)
    }
}

impl From<[f32; 3]> for ParamValue {
    fn from(v: [f32; 3]) -> Self {
        Self::Vec3(v)
    }
}

impl From<[f32; 4]> for ParamValue {
    fn from(v: [f32; 4]) -> Self {
        Self::Vec4(v)
    }
}

impl From<Mat4> for ParamValue {
    fn from(m: Mat4) -> Self {
        Self::Mat4(m)
    }
}

/// CPU-side copy of a stage's uniform block.
#[derive(Clone, Debug)]
pub struct ParameterBlock {
    layout: UniformLayout,
    bytes: Vec<u8>,
}

impl ParameterBlock {
    pub fn new(layout: UniformLayout) -> Self {
        // Zero-sized uniform bindings are invalid
        let bytes = vec![0u8; layout.size().max(16) as usize];
        Self { layout, bytes }
    }

    /// Writes `value` if the block declares `name` with a matching type.
    pub fn set(&mut self, name: &str, value: ParamValue) -> bool {
        let Some(field) = self.layout.field(name) else {
            return false;
        };
        if field.ty != value.ty() {
            log::debug!(
                "Parameter '{}' is {:?}, ignoring {:?} value",
                name,
                field.ty,
                value.ty()
            );
            return false;
        }
        let start = field.offset as usize;
        let end = start + field.ty.size() as usize;
        value.write(&mut self.bytes[start..end]);
        true
    }

    pub fn get(&self, name: &str) -> Option<ParamValue> {
        let field = self.layout.field(name)?;
        let start = field.offset as usize;
        let end = start + field.ty.size() as usize;
        Some(ParamValue::read(field.ty, &self.bytes[start..end]))
    }

    pub fn layout(&self) -> &UniformLayout {
        &self.layout
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Everything needed to build a [`Stage`].
#[derive(Clone, Copy, Debug)]
pub struct StageDescriptor<'a> {
    /// Debug label, also used in logs and errors.
    pub label: &'a str,
    /// WGSL source providing `struct Params` and the `fs` entry point.
    pub source: &'a str,
    /// Number of input textures, bound from binding 2 upward.
    pub inputs: usize,
    /// Formats the stage may write; one pipeline is compiled per format.
    pub output_formats: &'a [wgpu::TextureFormat],
}

/// A full-screen shader draw with reflected parameters.
///
/// Parameters are uploaded into a small ring of uniform slots, one per draw,
/// so two draws of the same stage within a frame keep their own values. The
/// ring rewinds at [`begin_frame`](Self::begin_frame).
pub struct Stage {
    label: String,
    params: ParameterBlock,
    inputs: usize,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    pipelines: Vec<(wgpu::TextureFormat, wgpu::RenderPipeline)>,
    uniform_buffer: wgpu::Buffer,
    uniform_stride: u64,
    next_slot: Cell<u64>,
}

impl Stage {
    /// Compiles the stage for every format in `desc.output_formats`.
    pub fn new(gpu: &GpuContext, desc: &StageDescriptor<'_>) -> Self {
        let device = &gpu.device;
        let caps = gpu.capabilities;

        let source = format!("{FULLSCREEN_VS}\n{}", desc.source);
        let params = ParameterBlock::new(UniformLayout::from_wgsl(&source));
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let params_size = params.bytes().len() as u64;
        let uniform_stride = uniform_stride(
            params_size,
            device.limits().min_uniform_buffer_offset_alignment as u64,
        );
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{} Params", desc.label)),
            size: uniform_stride * UNIFORM_SLOTS,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let filter = caps.filter_mode();
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(&format!("{} Sampler", desc.label)),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let mut entries = vec![
            // Params
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(params_size),
                },
                count: None,
            },
            // Sampler
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(caps.sampler_binding()),
                count: None,
            },
        ];
        for i in 0..desc.inputs {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: FIRST_INPUT_BINDING + i as u32,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: caps.sample_type(),
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
        }

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{} Bind Group Layout", desc.label)),
            entries: &entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{} Pipeline Layout", desc.label)),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipelines = desc
            .output_formats
            .iter()
            .map(|&format| {
                let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(&format!("{} Pipeline ({:?})", desc.label, format)),
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &shader,
                        entry_point: Some("vs"),
                        buffers: &[],
                        compilation_options: Default::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &shader,
                        entry_point: Some("fs"),
                        targets: &[Some(wgpu::ColorTargetState {
                            format,
                            blend: caps.blend_for(format),
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                        compilation_options: Default::default(),
                    }),
                    primitive: wgpu::PrimitiveState {
                        topology: wgpu::PrimitiveTopology::TriangleList,
                        ..Default::default()
                    },
                    // Full-screen stages never depth test
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                    cache: None,
                });
                (format, pipeline)
            })
            .collect();

        Self {
            label: desc.label.to_string(),
            params,
            inputs: desc.inputs,
            bind_group_layout,
            sampler,
            pipelines,
            uniform_buffer,
            uniform_stride,
            next_slot: Cell::new(0),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Sets a parameter for subsequent draws.
    ///
    /// Returns `false` without doing anything when the shader does not declare
    /// `name` (or declares it with another type).
    pub fn set_parameter(&mut self, name: &str, value: impl Into<ParamValue>) -> bool {
        let applied = self.params.set(name, value.into());
        if !applied {
            log::trace!("Stage '{}' has no parameter '{}'", self.label, name);
        }
        applied
    }

    /// Current value of a declared parameter.
    pub fn parameter(&self, name: &str) -> Option<ParamValue> {
        self.params.get(name)
    }

    /// Rewinds the uniform ring. Call once per frame, before the stage draws.
    pub fn begin_frame(&mut self) {
        self.next_slot.set(0);
    }

    /// Checks that a draw with `inputs` textures into `output_format` would be
    /// accepted, without recording anything.
    pub fn check(&self, inputs: usize, output_format: wgpu::TextureFormat) -> Result<()> {
        self.pipeline_for(inputs, output_format).map(|_| ())
    }

    fn pipeline_for(
        &self,
        inputs: usize,
        output_format: wgpu::TextureFormat,
    ) -> Result<&wgpu::RenderPipeline> {
        if inputs != self.inputs {
            return Err(PipelineError::InputMismatch {
                stage: self.label.clone(),
                expected: self.inputs,
                found: inputs,
            });
        }
        self.pipelines
            .iter()
            .find(|(f, _)| *f == output_format)
            .map(|(_, p)| p)
            .ok_or_else(|| PipelineError::UnsupportedOutput {
                stage: self.label.clone(),
                format: output_format,
            })
    }

    /// Records one full-screen draw into `output`.
    ///
    /// The destination is cleared to `clear` first. Parameter values are captured
    /// now, so later `set_parameter` calls do not affect this draw.
    pub fn draw(
        &self,
        gpu: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        inputs: &[&wgpu::TextureView],
        output: &wgpu::TextureView,
        output_format: wgpu::TextureFormat,
        clear: wgpu::Color,
    ) -> Result<()> {
        let pipeline = self.pipeline_for(inputs.len(), output_format)?;

        let params = self.params.bytes();
        let slot = self.next_slot.get();
        self.next_slot.set(slot + 1);
        let overflow;
        let (buffer, offset) = if slot < UNIFORM_SLOTS {
            let offset = slot * self.uniform_stride;
            gpu.queue.write_buffer(&self.uniform_buffer, offset, params);
            (&self.uniform_buffer, offset as u32)
        } else {
            log::debug!("Stage '{}' drew {} times this frame", self.label, slot + 1);
            overflow = gpu
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&format!("{} Params (overflow)", self.label)),
                    contents: params,
                    usage: wgpu::BufferUsages::UNIFORM,
                });
            (&overflow, 0)
        };

        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(params.len() as u64),
                }),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(&self.sampler),
            },
        ];
        for (i, view) in inputs.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: FIRST_INPUT_BINDING + i as u32,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} Bind Group", self.label)),
            layout: &self.bind_group_layout,
            entries: &entries,
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(&self.label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: output,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(clear),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[offset]);
        pass.draw(0..3, 0..1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
        struct Params {
            time: f32,          // seconds
            resolution: vec2f,
            tint: vec3<f32>,
            @align(16) view: mat4x4f,
            threshold: f32,
        }
        @group(0) @binding(0) var<uniform> params: Params;
    "#;

    #[test]
    fn layout_follows_uniform_alignment() {
        let layout = UniformLayout::from_wgsl(SOURCE);
        let offsets: Vec<_> = layout
            .fields()
            .iter()
            .map(|f| (f.name.as_str(), f.offset))
            .collect();
        assert_eq!(
            offsets,
            vec![
                ("time", 0),
                ("resolution", 8),
                ("tint", 16),
                ("view", 32),
                ("threshold", 96)
            ]
        );
        assert_eq!(layout.size(), 112);
    }

    #[test]
    fn explicit_align_moves_the_member() {
        let layout = UniformLayout::from_wgsl("struct Params { a: f32, @align(16) b: f32 }");
        assert_eq!(layout.field("a").map(|f| f.offset), Some(0));
        assert_eq!(layout.field("b").map(|f| f.offset), Some(16));
        assert_eq!(layout.size(), 32);
    }

    #[test]
    fn explicit_size_pads_the_member() {
        let layout = UniformLayout::from_wgsl("struct Params { @size(16) a: f32, b: f32 }");
        assert_eq!(layout.field("b").map(|f| f.offset), Some(16));
        assert_eq!(layout.size(), 20);

        let mut block = ParameterBlock::new(layout);
        assert!(block.set("b", ParamValue::F32(2.0)));
        assert_eq!(&block.bytes()[16..20], &2.0f32.to_ne_bytes());
    }

    #[test]
    fn block_comments_hide_members() {
        let layout = UniformLayout::from_wgsl(
            "struct Params {\n    /* radius: f32,\n */ level: f32,\n}",
        );
        assert!(layout.field("radius").is_none());
        assert_eq!(layout.field("level").map(|f| f.offset), Some(0));
    }

    #[test]
    fn unsupported_members_keep_later_offsets() {
        let layout = UniformLayout::from_wgsl("struct Params { mode: i32, level: f32 }");
        assert!(layout.field("mode").is_none());
        assert_eq!(layout.field("level").map(|f| f.offset), Some(4));
    }

    #[test]
    fn invalid_source_reflects_nothing() {
        assert_eq!(UniformLayout::from_wgsl("struct Params {"), UniformLayout::default());
    }

    #[test]
    fn uniform_slots_respect_offset_alignment() {
        assert_eq!(uniform_stride(16, 256), 256);
        assert_eq!(uniform_stride(256, 256), 256);
        assert_eq!(uniform_stride(272, 256), 512);
    }

    #[test]
    fn other_structs_are_ignored() {
        let source = "struct VsOut { @builtin(position) p: vec4f }\nstruct Params { level: f32 }";
        let layout = UniformLayout::from_wgsl(source);
        assert_eq!(layout.fields().len(), 1);
        assert_eq!(layout.field("level").map(|f| f.offset), Some(0));
        assert!(UniformLayout::from_wgsl("struct Other { a: f32 }").fields().is_empty());
    }

    #[test]
    fn undeclared_parameters_are_ignored() {
        let mut block = ParameterBlock::new(UniformLayout::from_wgsl(SOURCE));
        let before = block.bytes().to_vec();
        assert!(!block.set("focal_distance", ParamValue::F32(3.0)));
        assert_eq!(block.bytes(), &before[..]);
    }

    #[test]
    fn mismatched_types_are_ignored() {
        let mut block = ParameterBlock::new(UniformLayout::from_wgsl(SOURCE));
        assert!(!block.set("threshold", ParamValue::Vec2([1.0, 2.0])));
        assert_eq!(block.get("threshold"), Some(ParamValue::F32(0.0)));
    }

    #[test]
    fn values_land_at_their_offsets() {
        let mut block = ParameterBlock::new(UniformLayout::from_wgsl(SOURCE));
        assert!(block.set("threshold", ParamValue::F32(0.25)));
        assert!(block.set("resolution", ParamValue::Vec2([640.0, 480.0])));
        let view = Mat4::from_translation(glam::Vec3::new(1.0, 2.0, 3.0));
        assert!(block.set("view", ParamValue::Mat4(view)));

        assert_eq!(block.get("threshold"), Some(ParamValue::F32(0.25)));
        assert_eq!(block.get("resolution"), Some(ParamValue::Vec2([640.0, 480.0])));
        assert_eq!(block.get("view"), Some(ParamValue::Mat4(view)));
        assert_eq!(&block.bytes()[96..100], &0.25f32.to_ne_bytes());
    }

    #[test]
    fn empty_layout_still_has_a_buffer() {
        let block = ParameterBlock::new(UniformLayout::default());
        assert_eq!(block.bytes().len(), 16);
    }
}
