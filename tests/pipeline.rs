//! Headless GPU scenarios. Each test skips when no adapter is available.

use glam::Vec3;
use umbra::render_graph::{
    DisplaySlot, FrameState, GBufferChannel, PassKind, PixelFormat, Resource, WideSlot,
};
use umbra::{
    Camera, FeatureToggles, GpuContext, HEADLESS_FORMAT, Mesh, MeshInstance, ParamValue,
    Pipeline, PipelineConfig, PipelineError, ScreenTarget, Transform, readback,
};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;

fn setup(width: u32, height: u32) -> Option<(GpuContext, Pipeline)> {
    let gpu = match GpuContext::headless(width, height) {
        Ok(gpu) => gpu,
        Err(err) => {
            eprintln!("skipping: no GPU ({})", err);
            return None;
        }
    };
    match Pipeline::new(&gpu, HEADLESS_FORMAT) {
        Ok(pipeline) => Some((gpu, pipeline)),
        Err(err) => {
            eprintln!("skipping: pipeline unavailable ({})", err);
            None
        }
    }
}

fn screen_texture(gpu: &GpuContext, width: u32, height: u32) -> wgpu::Texture {
    screen_texture_as(gpu, width, height, HEADLESS_FORMAT)
}

fn screen_texture_as(
    gpu: &GpuContext,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
) -> wgpu::Texture {
    gpu.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Test Screen"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    })
}

fn camera() -> Camera {
    let mut camera = Camera::new().at(0.0, 0.0, 10.0);
    camera.set_aspect_ratio(WIDTH as f32 / HEIGHT as f32);
    camera
}

fn scene(cube: &Mesh) -> Vec<MeshInstance<'_>> {
    vec![
        MeshInstance::new(cube, Transform::from_position(Vec3::new(-3.0, 0.0, 0.0)))
            .albedo([1.0, 1.0, 1.0, 1.0])
            .emissive(4.0),
        MeshInstance::new(cube, Transform::from_position(Vec3::new(3.0, 0.0, 0.0)))
            .albedo([0.1, 0.1, 0.1, 1.0]),
    ]
}

/// Three drawables at increasing distance along the view axis.
fn depth_row(cube: &Mesh) -> Vec<MeshInstance<'_>> {
    [0.0, -4.0, -8.0]
        .into_iter()
        .enumerate()
        .map(|(i, z)| {
            MeshInstance::new(
                cube,
                Transform::from_position(Vec3::new(i as f32 * 1.5 - 1.5, 0.0, z)),
            )
            .emissive(i as f32)
        })
        .collect()
}

fn render_scene(
    gpu: &GpuContext,
    pipeline: &mut Pipeline,
    drawables: &[MeshInstance<'_>],
) -> Vec<[u8; 4]> {
    let texture = screen_texture(gpu, WIDTH, HEIGHT);
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let screen = ScreenTarget::from_texture(&texture, &view);
    pipeline
        .render_frame(gpu, &camera(), drawables, &screen)
        .unwrap();
    readback::read_rgba8(gpu, &texture).unwrap()
}

fn render(gpu: &GpuContext, pipeline: &mut Pipeline, cube: &Mesh) -> Vec<[u8; 4]> {
    render_scene(gpu, pipeline, &scene(cube))
}

#[test]
fn resize_reallocates_every_target() {
    let Some((gpu, mut pipeline)) = setup(WIDTH, HEIGHT) else {
        return;
    };
    assert!(pipeline.targets().all(|t| t.size() == (WIDTH, HEIGHT)));

    pipeline.set_size(&gpu, 100, 30).unwrap();
    assert_eq!(pipeline.size(), (100, 30));
    assert!(pipeline.targets().all(|t| t.size() == (100, 30)));
    assert_eq!(pipeline.targets().count(), 3 + 2 + 4 + 1);

    pipeline.set_size(&gpu, 0, 30).unwrap();
    assert_eq!(pipeline.size(), (100, 30));
}

#[test]
fn resize_to_same_size_keeps_contents() {
    let Some((gpu, mut pipeline)) = setup(WIDTH, HEIGHT) else {
        return;
    };
    let cube = Mesh::cube(&gpu);
    render(&gpu, &mut pipeline, &cube);
    let before = pipeline.read_wide_slot(&gpu, WideSlot::CurrentResult).unwrap();
    assert!(before.iter().any(|px| px[0] > 0.0));

    pipeline.set_size(&gpu, WIDTH, HEIGHT).unwrap();
    let after = pipeline.read_wide_slot(&gpu, WideSlot::CurrentResult).unwrap();
    assert_eq!(before, after);
}

#[test]
fn disabled_effects_never_touch_their_slots() {
    let Some((gpu, mut pipeline)) = setup(WIDTH, HEIGHT) else {
        return;
    };
    pipeline.set_config(PipelineConfig::new().with_toggles(FeatureToggles::NONE));
    let cube = Mesh::cube(&gpu);
    let plain = render_scene(&gpu, &mut pipeline, &depth_row(&cube));
    assert!(plain.iter().any(|px| px[..3] != [0, 0, 0]));

    let kinds: Vec<PassKind> = pipeline.last_frame_trace().iter().map(|p| p.kind).collect();
    assert_eq!(
        kinds,
        [
            PassKind::ClearGBuffer,
            PassKind::Geometry,
            PassKind::DeferredResolve,
            PassKind::Tonemap
        ]
    );
    for pass in pipeline.last_frame_trace() {
        for write in &pass.writes {
            assert!(!matches!(
                write,
                Resource::Wide(WideSlot::Scratch | WideSlot::HighlightExtract)
                    | Resource::Display(_)
            ));
        }
    }

    let Some((gpu2, mut toggled)) = setup(WIDTH, HEIGHT) else {
        return;
    };
    let cube2 = Mesh::cube(&gpu2);
    toggled.set_bloom_enabled(true);
    toggled.set_depth_of_field_enabled(true);
    render_scene(&gpu2, &mut toggled, &depth_row(&cube2));
    toggled.set_config(PipelineConfig::new().with_toggles(FeatureToggles::NONE));
    let after_toggle = render_scene(&gpu2, &mut toggled, &depth_row(&cube2));
    assert_eq!(plain, after_toggle);
}

#[test]
fn bloom_extracts_only_bright_pixels() {
    let Some((gpu, mut pipeline)) = setup(WIDTH, HEIGHT) else {
        return;
    };
    pipeline.set_config(
        PipelineConfig::new()
            .with_toggles(FeatureToggles::NONE)
            .with_bloom(true)
            .with_bloom_threshold(0.5),
    );
    let cube = Mesh::cube(&gpu);
    render(&gpu, &mut pipeline, &cube);

    let positions =
        readback::read_rgba32f(&gpu, pipeline.gbuffer().channel(GBufferChannel::Position)).unwrap();
    let highlights = pipeline
        .read_wide_slot(&gpu, WideSlot::HighlightExtract)
        .unwrap();
    assert_eq!(positions.len(), highlights.len());

    let mut bright_seen = false;
    for (pos, hi) in positions.iter().zip(&highlights) {
        if pos[3] <= 0.0 {
            assert_eq!(&hi[..3], &[0.0, 0.0, 0.0]);
        } else if pos[0] > 0.5 {
            assert_eq!(&hi[..3], &[0.0, 0.0, 0.0], "dim object leaked into bloom");
        } else if pos[0] < -0.5 && hi[..3].iter().any(|&c| c > 0.0) {
            bright_seen = true;
        }
    }
    assert!(bright_seen, "emissive object produced no highlights");
}

#[test]
fn entry_points_out_of_order_are_rejected() {
    let Some((gpu, mut pipeline)) = setup(WIDTH, HEIGHT) else {
        return;
    };
    let texture = screen_texture(&gpu, WIDTH, HEIGHT);
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let screen = ScreenTarget::from_texture(&texture, &view);
    let cube = Mesh::cube(&gpu);
    let cam = camera();

    let err = pipeline.tonemap(&gpu, &screen).unwrap_err();
    assert!(matches!(err, PipelineError::OutOfOrder { .. }));
    assert_eq!(pipeline.state(), FrameState::Presented);

    pipeline.set_bloom_enabled(true);
    pipeline.begin_frame(&gpu).unwrap();
    pipeline.geometry_pass(&gpu, &cam, &scene(&cube)).unwrap();
    pipeline.deferred_resolve(&gpu, &cam).unwrap();
    let err = pipeline.tonemap(&gpu, &screen).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::OutOfOrder {
            from: FrameState::DeferredResolve,
            to: FrameState::Tonemap
        }
    ));
    assert_eq!(pipeline.state(), FrameState::DeferredResolve);
    pipeline.cancel_frame();

    pipeline.set_config(PipelineConfig::new().with_toggles(FeatureToggles::NONE));
    pipeline.begin_frame(&gpu).unwrap();
    pipeline.geometry_pass(&gpu, &cam, &scene(&cube)).unwrap();
    pipeline.deferred_resolve(&gpu, &cam).unwrap();
    pipeline.tonemap(&gpu, &screen).unwrap();
    pipeline.present(&gpu).unwrap();
    assert_eq!(pipeline.state(), FrameState::Presented);
}

#[test]
fn stale_screen_size_is_reported() {
    let Some((gpu, mut pipeline)) = setup(WIDTH, HEIGHT) else {
        return;
    };
    let texture = screen_texture(&gpu, WIDTH * 2, HEIGHT);
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let screen = ScreenTarget::from_texture(&texture, &view);
    let cube = Mesh::cube(&gpu);

    let err = pipeline
        .render_frame(&gpu, &camera(), &scene(&cube), &screen)
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::StaleTargets {
            expected: (WIDTH, HEIGHT),
            ..
        }
    ));
    assert_eq!(pipeline.state(), FrameState::Presented);
}

const INVERT: &str = r#"
struct Params {
    resolution: vec2f,
    time: f32,
}
@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var input_sampler: sampler;
@group(0) @binding(2) var input0: texture_2d<f32>;

@fragment
fn fs(in: VsOut) -> @location(0) vec4f {
    let color = textureSampleLevel(input0, input_sampler, in.uv, 0.0);
    return vec4f(1.0 - color.rgb, color.a);
}
"#;

#[test]
fn display_stages_ping_pong_to_the_screen() {
    let Some((gpu, mut pipeline)) = setup(WIDTH, HEIGHT) else {
        return;
    };
    pipeline.set_config(
        PipelineConfig::new()
            .with_toggles(FeatureToggles::NONE)
            .with_stylized(true),
    );
    let index = pipeline.push_display_stage(&gpu, "Invert", INVERT);
    assert_eq!(index, 1);
    assert_eq!(pipeline.display_stage_count(), 2);
    let stage = pipeline.display_stage_mut(index).unwrap();
    assert!(!stage.set_parameter("strength", 2.0f32));
    assert!(stage.set_parameter("time", 1.0f32));

    let cube = Mesh::cube(&gpu);
    render(&gpu, &mut pipeline, &cube);

    let trace = pipeline.last_frame_trace();
    let display: Vec<_> = trace
        .iter()
        .filter(|p| matches!(p.kind, PassKind::Display { .. }))
        .collect();
    assert_eq!(display.len(), 2);
    assert_ne!(display[0].reads, display[0].writes);
    assert_eq!(display[0].writes, display[1].reads);
    assert_eq!(display[1].writes, [Resource::Screen]);
    let ping = pipeline.display_slot(DisplaySlot::Ping);
    assert_eq!(ping.format(), PixelFormat::NarrowU8Srgb);
    assert_eq!(ping.size(), (WIDTH, HEIGHT));
    assert_eq!(trace.last().map(|p| p.writes.as_slice()), Some(&[Resource::Screen][..]));

    assert!(pipeline.set_display_stage_enabled(index, false));
    assert!(!pipeline.set_display_stage_enabled(0, false));
    assert!(!pipeline.set_display_stage_enabled(7, true));
    render(&gpu, &mut pipeline, &cube);
    let count = pipeline
        .last_frame_trace()
        .iter()
        .filter(|p| matches!(p.kind, PassKind::Display { .. }))
        .count();
    assert_eq!(count, 1);
}

#[test]
fn oversized_resize_leaves_pipeline_not_ready() {
    let Some((gpu, mut pipeline)) = setup(WIDTH, HEIGHT) else {
        return;
    };
    let max = gpu.device.limits().max_texture_dimension_2d;
    let err = pipeline.set_size(&gpu, max + 1, 1).unwrap_err();
    assert!(matches!(err, PipelineError::TargetTooLarge { .. }));
    assert!(!pipeline.is_ready());
    assert!(matches!(
        pipeline.begin_frame(&gpu),
        Err(PipelineError::NotReady)
    ));
    assert_eq!(pipeline.state(), FrameState::Presented);

    pipeline.set_size(&gpu, WIDTH, HEIGHT).unwrap();
    assert!(pipeline.is_ready());
    let cube = Mesh::cube(&gpu);
    let pixels = render(&gpu, &mut pipeline, &cube);
    assert_eq!(pixels.len(), (WIDTH * HEIGHT) as usize);
}

#[test]
fn update_time_reaches_every_stage() {
    let Some((gpu, mut pipeline)) = setup(WIDTH, HEIGHT) else {
        return;
    };
    pipeline.update_time(0.016, 2.5);
    let oil_paint = pipeline.display_stage_mut(0).unwrap();
    assert_eq!(oil_paint.parameter("time"), Some(ParamValue::F32(2.5)));

    let index = pipeline.push_display_stage(&gpu, "Invert", INVERT);
    let pushed = pipeline.display_stage_mut(index).unwrap();
    assert_eq!(pushed.parameter("time"), Some(ParamValue::F32(2.5)));
}

#[test]
fn unsupported_screen_format_leaves_state() {
    let Some((gpu, mut pipeline)) = setup(WIDTH, HEIGHT) else {
        return;
    };
    pipeline.set_config(PipelineConfig::new().with_toggles(FeatureToggles::NONE));
    let cube = Mesh::cube(&gpu);
    let cam = camera();
    pipeline.begin_frame(&gpu).unwrap();
    pipeline.geometry_pass(&gpu, &cam, &scene(&cube)).unwrap();
    pipeline.deferred_resolve(&gpu, &cam).unwrap();

    let linear = screen_texture_as(&gpu, WIDTH, HEIGHT, wgpu::TextureFormat::Rgba8Unorm);
    let linear_view = linear.create_view(&wgpu::TextureViewDescriptor::default());
    let err = pipeline
        .tonemap(&gpu, &ScreenTarget::from_texture(&linear, &linear_view))
        .unwrap_err();
    assert!(matches!(err, PipelineError::UnsupportedOutput { .. }));
    assert_eq!(pipeline.state(), FrameState::DeferredResolve);

    let texture = screen_texture(&gpu, WIDTH, HEIGHT);
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    pipeline
        .tonemap(&gpu, &ScreenTarget::from_texture(&texture, &view))
        .unwrap();
    pipeline.present(&gpu).unwrap();
    assert_eq!(pipeline.state(), FrameState::Presented);
}
