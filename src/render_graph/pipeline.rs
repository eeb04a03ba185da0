//! The frame orchestrator.
//!
//! [`Pipeline`] owns every render target and every stage. A frame is driven
//! through its entry points in a fixed order:
//!
//! ```text
//! begin_frame -> geometry_pass -> deferred_resolve -> bloom -> depth_of_field
//!             -> tonemap -> display_effects -> present
//! ```
//!
//! Each entry point moves the [`FrameState`] forward and records the passes the
//! frame's [`FramePlan`] assigns to that state. `bloom`, `depth_of_field` and
//! `display_effects` may be skipped when their feature is off, or called and do
//! nothing. Calling an entry point out of order returns
//! [`PipelineError::OutOfOrder`] and leaves the state untouched.
//!
//! Commands are recorded into one encoder per frame and submitted by `present`.
//! Presenting a swapchain image stays with the caller.

use crate::camera::ViewProjection;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::geometry_pass::GeometryPass;
use crate::gpu::GpuContext;
use crate::mesh::Drawable;
use crate::readback;
use crate::stage::{ParamValue, Stage, StageDescriptor};

use super::buffer_pool::{DisplayPool, DisplaySlot, SlotRole, WidePool, WideSlot};
use super::gbuffer::{GBuffer, GBufferChannel};
use super::render_target::{RenderTarget, ScreenTarget};
use super::schedule::{FramePlan, FrameState, PassKind, PassRecord, Resource};

const WIDE_FORMAT: wgpu::TextureFormat = WideSlot::FORMAT.texture_format();

/// What decides whether a display-range stage runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageBinding {
    /// Follows the `stylized` feature toggle.
    Stylized,
    /// Enabled or disabled explicitly.
    Manual(bool),
}

struct DisplayEntry {
    stage: Stage,
    binding: StageBinding,
}

impl DisplayEntry {
    fn is_enabled(&self, config: &PipelineConfig) -> bool {
        match self.binding {
            StageBinding::Stylized => config.toggles.stylized,
            StageBinding::Manual(enabled) => enabled,
        }
    }
}

struct Targets {
    gbuffer: GBuffer,
    wide: WidePool,
    display: DisplayPool,
}

impl Targets {
    /// Allocates every target inside a validation scope so device-side
    /// rejections surface as configuration errors.
    fn allocate(gpu: &GpuContext, width: u32, height: u32) -> Result<Self> {
        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let allocated = GBuffer::allocate(gpu, width, height).and_then(|gbuffer| {
            Ok(Self {
                gbuffer,
                wide: WidePool::allocate(gpu, width, height)?,
                display: DisplayPool::allocate(gpu, width, height)?,
            })
        });
        let scope_error = pollster::block_on(gpu.device.pop_error_scope());

        match (allocated, scope_error) {
            (Ok(targets), None) => Ok(targets),
            (Ok(_), Some(err)) => Err(PipelineError::IncompleteTarget {
                label: "frame targets".to_string(),
                message: err.to_string(),
            }),
            (Err(err), _) => Err(err),
        }
    }

    fn size(&self) -> (u32, u32) {
        self.gbuffer.size()
    }
}

struct ActiveFrame {
    encoder: wgpu::CommandEncoder,
    plan: FramePlan,
    config: PipelineConfig,
    /// Indices into `Pipeline::display_stages`, in chain order.
    display_chain: Vec<usize>,
    trace: Vec<PassRecord>,
}

/// Deferred renderer with a wide-range and a display-range post-processing chain.
pub struct Pipeline {
    targets: Targets,
    geometry: GeometryPass,
    deferred: Stage,
    bloom_extract: Stage,
    bloom_composite: Stage,
    dof: Stage,
    copy: Stage,
    tonemap: Stage,
    display_stages: Vec<DisplayEntry>,
    screen_format: wgpu::TextureFormat,
    config: PipelineConfig,
    state: FrameState,
    frame: Option<ActiveFrame>,
    last_trace: Vec<PassRecord>,
    ready: bool,
    time: f32,
    delta_time: f32,
}

impl Pipeline {
    /// Compiles every built-in stage and allocates targets at the GPU output size.
    ///
    /// `screen_format` is the format of whatever the frame finally lands in.
    pub fn new(gpu: &GpuContext, screen_format: wgpu::TextureFormat) -> Result<Self> {
        let (width, height) = (gpu.width(), gpu.height());
        let targets = Targets::allocate(gpu, width, height)?;
        log::info!("Allocated frame targets at {}x{}", width, height);

        let display_formats = display_formats(screen_format);
        let wide = |label: &str, source: &str, inputs: usize| {
            Stage::new(
                gpu,
                &StageDescriptor {
                    label,
                    source,
                    inputs,
                    output_formats: &[WIDE_FORMAT],
                },
            )
        };

        let tonemap = Stage::new(
            gpu,
            &StageDescriptor {
                label: "Tonemap",
                source: include_str!("../shaders/tonemap.wgsl"),
                inputs: 1,
                output_formats: &display_formats,
            },
        );
        let oil_paint = Stage::new(
            gpu,
            &StageDescriptor {
                label: "Oil Paint",
                source: include_str!("../shaders/oil_paint.wgsl"),
                inputs: 1,
                output_formats: &display_formats,
            },
        );

        let mut pipeline = Self {
            targets,
            geometry: GeometryPass::new(gpu),
            deferred: wide("Deferred Resolve", include_str!("../shaders/deferred.wgsl"), 4),
            bloom_extract: wide("Bloom Extract", include_str!("../shaders/bloom_extract.wgsl"), 1),
            bloom_composite: wide(
                "Bloom Composite",
                include_str!("../shaders/bloom_composite.wgsl"),
                2,
            ),
            dof: wide("Depth of Field", include_str!("../shaders/dof.wgsl"), 2),
            copy: wide("Copy Back", include_str!("../shaders/copy.wgsl"), 1),
            tonemap,
            display_stages: vec![DisplayEntry {
                stage: oil_paint,
                binding: StageBinding::Stylized,
            }],
            screen_format,
            config: PipelineConfig::default(),
            state: FrameState::Presented,
            frame: None,
            last_trace: Vec::new(),
            ready: true,
            time: 0.0,
            delta_time: 0.0,
        };
        pipeline.set_on_all_stages("resolution", [width as f32, height as f32]);
        Ok(pipeline)
    }

    /// Reallocates every target at `width` x `height`.
    ///
    /// Zero sizes are ignored and repeating the current size is a no-op. Any
    /// in-progress frame is discarded. On failure the pipeline stays not ready
    /// until a later call succeeds.
    pub fn set_size(&mut self, gpu: &GpuContext, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            log::debug!("Ignoring zero-sized resize to {}x{}", width, height);
            return Ok(());
        }
        if self.ready && self.targets.size() == (width, height) {
            return Ok(());
        }
        if self.frame.is_some() {
            log::warn!("Resize during {:?}; discarding the frame", self.state);
            self.cancel_frame();
        }

        match Targets::allocate(gpu, width, height) {
            Ok(targets) => {
                self.targets = targets;
                self.ready = true;
                self.set_on_all_stages("resolution", [width as f32, height as f32]);
                log::info!("Resized frame targets to {}x{}", width, height);
                Ok(())
            }
            Err(err) => {
                self.ready = false;
                log::error!("Render target allocation failed: {}", err);
                Err(err)
            }
        }
    }

    /// Sets `time` and `delta_time` on every stage, effective from its next draw.
    pub fn update_time(&mut self, delta_time: f32, current_time: f32) {
        self.delta_time = delta_time;
        self.time = current_time;
        self.set_on_all_stages("time", current_time);
        self.set_on_all_stages("delta_time", delta_time);
    }

    /// Starts a frame: snapshots the configuration, plans the passes, and clears
    /// the GBuffer.
    pub fn begin_frame(&mut self, gpu: &GpuContext) -> Result<()> {
        if !self.ready {
            return Err(PipelineError::NotReady);
        }
        self.state.advance(FrameState::ClearGBuffer, |_| false)?;

        let config = self.config;
        let display_chain: Vec<usize> = self
            .display_stages
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_enabled(&config))
            .map(|(i, _)| i)
            .collect();
        let plan = FramePlan::build(
            config.toggles.bloom,
            config.toggles.depth_of_field,
            display_chain.len(),
        );
        if let Err(err) = plan.validate() {
            log::error!("Rejected frame plan: {}", err);
            return Err(err);
        }

        self.apply_config(&config);
        for stage in self.stages_mut() {
            stage.begin_frame();
        }
        let encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });
        self.frame = Some(ActiveFrame {
            encoder,
            plan,
            config,
            display_chain,
            trace: Vec::new(),
        });
        self.state = FrameState::ClearGBuffer;
        self.run_state(gpu, FrameState::ClearGBuffer, None)
    }

    /// Draws `drawables` into the GBuffer, in slice order.
    pub fn geometry_pass<D: Drawable>(
        &mut self,
        gpu: &GpuContext,
        camera: &impl ViewProjection,
        drawables: &[D],
    ) -> Result<()> {
        self.enter(FrameState::GeometryPass)?;
        let mut frame = self.frame.take().ok_or(PipelineError::NotReady)?;
        log::trace!("Geometry pass with {} drawables", drawables.len());
        self.geometry.render(
            gpu,
            &mut frame.encoder,
            &self.targets.gbuffer,
            camera,
            drawables,
        );
        frame
            .trace
            .extend(frame.plan.passes_for(FrameState::GeometryPass).cloned());
        self.frame = Some(frame);
        Ok(())
    }

    /// Lights the GBuffer into the current-result slot.
    pub fn deferred_resolve(
        &mut self,
        gpu: &GpuContext,
        camera: &impl ViewProjection,
    ) -> Result<()> {
        self.deferred.set_parameter("view", camera.view_matrix());
        self.deferred.set_parameter("proj", camera.projection_matrix());
        self.step(gpu, FrameState::DeferredResolve, None)
    }

    /// Extracts highlights, blurs them over the image, and copies the result back.
    pub fn bloom(&mut self, gpu: &GpuContext) -> Result<()> {
        self.step(gpu, FrameState::Bloom, None)
    }

    /// Blurs by distance from the focal plane and copies the result back.
    pub fn depth_of_field(&mut self, gpu: &GpuContext) -> Result<()> {
        self.step(gpu, FrameState::DepthOfField, None)
    }

    /// Converts the current result to display range, into the first display slot
    /// or straight onto `screen` when no display stage is enabled.
    pub fn tonemap(&mut self, gpu: &GpuContext, screen: &ScreenTarget<'_>) -> Result<()> {
        self.check_screen(screen)?;
        self.step(gpu, FrameState::Tonemap, Some(screen))
    }

    /// Runs the enabled display stages, ping-ponging between the display slots;
    /// the last one writes `screen`.
    pub fn display_effects(
        &mut self,
        gpu: &GpuContext,
        screen: &ScreenTarget<'_>,
    ) -> Result<()> {
        self.check_screen(screen)?;
        self.step(gpu, FrameState::StylizedFilter, Some(screen))
    }

    /// Submits the frame's commands.
    pub fn present(&mut self, gpu: &GpuContext) -> Result<()> {
        self.enter(FrameState::Presented)?;
        let frame = self.frame.take().ok_or(PipelineError::NotReady)?;
        gpu.queue.submit(Some(frame.encoder.finish()));
        log::trace!("Presented frame with {} passes", frame.trace.len());
        self.last_trace = frame.trace;
        Ok(())
    }

    /// Runs every entry point of one frame in order.
    pub fn render_frame<D: Drawable>(
        &mut self,
        gpu: &GpuContext,
        camera: &impl ViewProjection,
        drawables: &[D],
        screen: &ScreenTarget<'_>,
    ) -> Result<()> {
        self.check_screen(screen)?;
        self.begin_frame(gpu)?;
        self.geometry_pass(gpu, camera, drawables)?;
        self.deferred_resolve(gpu, camera)?;
        self.bloom(gpu)?;
        self.depth_of_field(gpu)?;
        self.tonemap(gpu, screen)?;
        self.display_effects(gpu, screen)?;
        self.present(gpu)
    }

    /// Drops an in-progress frame without submitting it.
    pub fn cancel_frame(&mut self) {
        if self.frame.take().is_some() {
            log::debug!("Cancelled frame in {:?}", self.state);
        }
        self.state = FrameState::Presented;
    }

    /// Appends a display-range stage to the ping-pong chain.
    ///
    /// The stage samples one input at binding 2 and is enabled immediately.
    /// Returns its index for [`set_display_stage_enabled`](Self::set_display_stage_enabled).
    pub fn push_display_stage(&mut self, gpu: &GpuContext, label: &str, source: &str) -> usize {
        let formats = display_formats(self.screen_format);
        let mut stage = Stage::new(
            gpu,
            &StageDescriptor {
                label,
                source,
                inputs: 1,
                output_formats: &formats,
            },
        );
        let (width, height) = self.targets.size();
        stage.set_parameter("resolution", [width as f32, height as f32]);
        stage.set_parameter("time", self.time);
        stage.set_parameter("delta_time", self.delta_time);
        self.display_stages.push(DisplayEntry {
            stage,
            binding: StageBinding::Manual(true),
        });
        self.display_stages.len() - 1
    }

    /// Enables or disables a manually bound display stage. Returns `false` for
    /// unknown indices and for stages that follow a feature toggle.
    pub fn set_display_stage_enabled(&mut self, index: usize, enabled: bool) -> bool {
        match self.display_stages.get_mut(index) {
            Some(entry) if matches!(entry.binding, StageBinding::Manual(_)) => {
                entry.binding = StageBinding::Manual(enabled);
                true
            }
            _ => false,
        }
    }

    pub fn display_stage_mut(&mut self, index: usize) -> Option<&mut Stage> {
        self.display_stages.get_mut(index).map(|entry| &mut entry.stage)
    }

    pub fn display_stage_count(&self) -> usize {
        self.display_stages.len()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Replaces the whole configuration; takes effect at the next `begin_frame`.
    pub fn set_config(&mut self, config: PipelineConfig) {
        self.config = config;
        self.config.set_bloom_threshold(config.bloom_threshold);
    }

    pub fn set_bloom_enabled(&mut self, enabled: bool) {
        self.config.toggles.bloom = enabled;
    }

    pub fn set_bloom_threshold(&mut self, threshold: f32) {
        self.config.set_bloom_threshold(threshold);
    }

    pub fn set_depth_of_field_enabled(&mut self, enabled: bool) {
        self.config.toggles.depth_of_field = enabled;
    }

    pub fn set_focal_distance(&mut self, distance: f32) {
        self.config.focal_distance = distance;
    }

    pub fn set_stylized_enabled(&mut self, enabled: bool) {
        self.config.toggles.stylized = enabled;
    }

    pub fn set_filter_radius(&mut self, radius: f32) {
        self.config.filter_radius = radius.max(0.0);
    }

    pub fn set_filter_level(&mut self, level: f32) {
        self.config.filter_level = level;
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.config.clear_color = rgba;
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Size every target currently has.
    pub fn size(&self) -> (u32, u32) {
        self.targets.size()
    }

    pub fn gbuffer(&self) -> &GBuffer {
        &self.targets.gbuffer
    }

    pub fn wide_slot(&self, slot: WideSlot) -> &RenderTarget {
        self.targets.wide.slot(slot)
    }

    pub fn display_slot(&self, slot: DisplaySlot) -> &RenderTarget {
        self.targets.display.slot(slot)
    }

    /// Every target the pipeline owns, for size checks and diagnostics.
    pub fn targets(&self) -> impl Iterator<Item = &RenderTarget> {
        self.targets
            .wide
            .iter()
            .chain(self.targets.display.iter())
            .chain(GBufferChannel::ALL.map(|c| self.targets.gbuffer.channel(c)))
            .chain(std::iter::once(self.targets.gbuffer.depth()))
    }

    /// Passes executed by the most recently presented frame.
    pub fn last_frame_trace(&self) -> &[PassRecord] {
        &self.last_trace
    }

    /// Copies a wide slot to the CPU as RGBA floats, row-major.
    ///
    /// Reads whatever the last submitted frame left there.
    pub fn read_wide_slot(&self, gpu: &GpuContext, slot: WideSlot) -> Result<Vec<[f32; 4]>> {
        readback::read_rgba32f(gpu, self.targets.wide.slot(slot))
    }

    fn enter(&mut self, next: FrameState) -> Result<()> {
        if !self.ready {
            return Err(PipelineError::NotReady);
        }
        let plan = self.frame.as_ref().map(|frame| &frame.plan);
        let state = self
            .state
            .advance(next, |s| plan.is_some_and(|p| p.has_work(s)))?;
        self.state = state;
        log::trace!("Frame state {:?}", state);
        Ok(())
    }

    /// Enters `next` and records its passes. A pass that cannot be recorded
    /// leaves the state where it was.
    fn step(
        &mut self,
        gpu: &GpuContext,
        next: FrameState,
        screen: Option<&ScreenTarget<'_>>,
    ) -> Result<()> {
        let previous = self.state;
        self.enter(next)?;
        let result = self.run_state(gpu, next, screen);
        if result.is_err() {
            self.state = previous;
        }
        result
    }

    fn check_screen(&self, screen: &ScreenTarget<'_>) -> Result<()> {
        let expected = self.targets.size();
        if screen.size() != expected {
            return Err(PipelineError::StaleTargets {
                expected,
                found: screen.size(),
            });
        }
        Ok(())
    }

    fn apply_config(&mut self, config: &PipelineConfig) {
        self.bloom_extract
            .set_parameter("threshold", config.effective_bloom_threshold());
        self.dof.set_parameter("focal_distance", config.focal_distance);
        self.deferred.set_parameter("clear_color", config.clear_color);
        for entry in &mut self.display_stages {
            entry.stage.set_parameter("radius", config.filter_radius);
            entry.stage.set_parameter("level", config.filter_level);
        }
    }

    fn stages_mut(&mut self) -> impl Iterator<Item = &mut Stage> {
        [
            &mut self.deferred,
            &mut self.bloom_extract,
            &mut self.bloom_composite,
            &mut self.dof,
            &mut self.copy,
            &mut self.tonemap,
        ]
        .into_iter()
        .chain(self.display_stages.iter_mut().map(|entry| &mut entry.stage))
    }

    fn set_on_all_stages(&mut self, name: &str, value: impl Into<ParamValue>) {
        let value = value.into();
        for stage in self.stages_mut() {
            stage.set_parameter(name, value);
        }
    }

    fn run_state(
        &mut self,
        gpu: &GpuContext,
        state: FrameState,
        screen: Option<&ScreenTarget<'_>>,
    ) -> Result<()> {
        let mut frame = self.frame.take().ok_or(PipelineError::NotReady)?;
        let result = self.record_state(gpu, &mut frame, state, screen);
        self.frame = Some(frame);
        result
    }

    fn record_state(
        &self,
        gpu: &GpuContext,
        frame: &mut ActiveFrame,
        state: FrameState,
        screen: Option<&ScreenTarget<'_>>,
    ) -> Result<()> {
        let records: Vec<PassRecord> = frame.plan.passes_for(state).cloned().collect();
        // Check every pass before recording any
        for record in &records {
            self.check_pass(&frame.display_chain, record, screen)?;
        }
        let clear = color(frame.config.clear_color);
        for record in records {
            self.record_pass(
                gpu,
                &mut frame.encoder,
                &frame.display_chain,
                clear,
                &record,
                screen,
            )?;
            frame.trace.push(record);
        }
        Ok(())
    }

    fn record_pass(
        &self,
        gpu: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        display_chain: &[usize],
        clear: wgpu::Color,
        record: &PassRecord,
        screen: Option<&ScreenTarget<'_>>,
    ) -> Result<()> {
        log::trace!(
            "{}: reads {:?}, writes {:?}",
            record.kind,
            record.reads,
            record.writes
        );
        if record.kind == PassKind::ClearGBuffer {
            self.targets.gbuffer.clear(encoder);
            return Ok(());
        }

        let stage = self
            .stage_for(record.kind, display_chain)
            .ok_or_else(|| record_hazard(record, "has no full-screen stage"))?;
        let [output] = record.writes.as_slice() else {
            return Err(record_hazard(record, "must write exactly one target"));
        };

        let inputs = record
            .reads
            .iter()
            .map(|&r| self.resolve(r, screen).map(|(view, _)| view))
            .collect::<Result<Vec<_>>>()?;
        let (view, format) = self.resolve(*output, screen)?;
        stage.draw(gpu, encoder, &inputs, view, format, clear)
    }

    fn check_pass(
        &self,
        display_chain: &[usize],
        record: &PassRecord,
        screen: Option<&ScreenTarget<'_>>,
    ) -> Result<()> {
        if matches!(record.kind, PassKind::ClearGBuffer | PassKind::Geometry) {
            return Ok(());
        }
        let stage = self
            .stage_for(record.kind, display_chain)
            .ok_or_else(|| record_hazard(record, "has no full-screen stage"))?;
        let [output] = record.writes.as_slice() else {
            return Err(record_hazard(record, "must write exactly one target"));
        };
        for &read in &record.reads {
            self.resolve(read, screen)?;
        }
        let (_, format) = self.resolve(*output, screen)?;
        stage.check(record.reads.len(), format)
    }

    fn stage_for(&self, kind: PassKind, display_chain: &[usize]) -> Option<&Stage> {
        match kind {
            PassKind::DeferredResolve => Some(&self.deferred),
            PassKind::BloomExtract => Some(&self.bloom_extract),
            PassKind::BloomComposite => Some(&self.bloom_composite),
            PassKind::DepthOfField => Some(&self.dof),
            PassKind::CopyBack => Some(&self.copy),
            PassKind::Tonemap => Some(&self.tonemap),
            PassKind::Display { stage } => display_chain
                .get(stage)
                .and_then(|&i| self.display_stages.get(i))
                .map(|entry| &entry.stage),
            PassKind::ClearGBuffer | PassKind::Geometry => None,
        }
    }

    fn resolve<'a>(
        &'a self,
        resource: Resource,
        screen: Option<&ScreenTarget<'a>>,
    ) -> Result<(&'a wgpu::TextureView, wgpu::TextureFormat)> {
        let target = match resource {
            Resource::GBuffer(channel) => self.targets.gbuffer.channel(channel),
            Resource::GBufferDepth => self.targets.gbuffer.depth(),
            Resource::Wide(slot) => self.targets.wide.slot(slot),
            Resource::Display(slot) => self.targets.display.slot(slot),
            Resource::Screen => {
                let screen = screen.ok_or_else(|| PipelineError::Hazard {
                    pass: "screen".to_string(),
                    reason: "no screen target was supplied".to_string(),
                })?;
                return Ok((screen.view, screen.format));
            }
        };
        Ok((target.view(), target.format().texture_format()))
    }
}

/// Output formats for stages that may write the display pool or the screen.
fn display_formats(screen_format: wgpu::TextureFormat) -> Vec<wgpu::TextureFormat> {
    let pool = DisplaySlot::FORMAT.texture_format();
    if screen_format == pool {
        vec![pool]
    } else {
        vec![pool, screen_format]
    }
}

fn record_hazard(record: &PassRecord, reason: &str) -> PipelineError {
    PipelineError::Hazard {
        pass: record.kind.to_string(),
        reason: reason.to_string(),
    }
}

fn color(rgba: [f32; 4]) -> wgpu::Color {
    wgpu::Color {
        r: rgba[0] as f64,
        g: rgba[1] as f64,
        b: rgba[2] as f64,
        a: rgba[3] as f64,
    }
}
