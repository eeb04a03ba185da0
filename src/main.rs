use std::sync::Arc;
use std::time::Instant;
use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use glam::Vec3;
use umbra::{
    Camera, GpuContext, Mesh, MeshInstance, Pipeline, PipelineError, ScreenTarget, Transform,
};

/// Window settings for the demo.
struct DemoConfig {
    title: String,
    width: u32,
    height: u32,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            title: "Umbra".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

impl DemoConfig {
    fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

/// Three objects spaced along the view axis, the middle one glowing.
struct Scene {
    cube: Mesh,
    sphere: Mesh,
}

impl Scene {
    fn new(gpu: &GpuContext) -> Self {
        Self {
            cube: Mesh::cube(gpu),
            sphere: Mesh::sphere(gpu, 32, 16),
        }
    }

    fn instances(&self, time: f32) -> Vec<MeshInstance<'_>> {
        let spin = glam::Quat::from_rotation_y(time * 0.5);
        vec![
            MeshInstance::new(
                &self.cube,
                Transform::from_position(Vec3::new(-4.0, -10.0, 0.0))
                    .rotation(spin)
                    .uniform_scale(4.0),
            )
            .albedo([0.8, 0.3, 0.2, 1.0]),
            MeshInstance::new(
                &self.sphere,
                Transform::from_position(Vec3::new(0.0, -10.0, -10.0)).uniform_scale(5.0),
            )
            .albedo([1.0, 0.9, 0.6, 1.0])
            .emissive(3.0),
            MeshInstance::new(
                &self.cube,
                Transform::from_position(Vec3::new(4.0, -10.0, -20.0))
                    .rotation(spin.inverse())
                    .uniform_scale(4.0),
            )
            .albedo([0.2, 0.4, 0.8, 1.0]),
        ]
    }
}

struct Demo {
    config: DemoConfig,
    window: Option<Arc<Window>>,
    gpu: Option<GpuContext>,
    pipeline: Option<Pipeline>,
    scene: Option<Scene>,
    camera: Camera,
    start_time: Instant,
    last_frame: Instant,
}

impl Demo {
    fn new(config: DemoConfig) -> Self {
        Self {
            config,
            window: None,
            gpu: None,
            pipeline: None,
            scene: None,
            camera: Camera::new().at(0.0, 0.0, 25.0).looking_at(0.0, -10.0, -10.0),
            start_time: Instant::now(),
            last_frame: Instant::now(),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<(), Box<dyn std::error::Error>> {
        let attributes = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(winit::dpi::PhysicalSize::new(self.config.width, self.config.height));
        let window = Arc::new(event_loop.create_window(attributes)?);

        let gpu = GpuContext::new(window.clone())?;
        let pipeline = Pipeline::new(&gpu, gpu.screen_format())?;
        self.camera.set_aspect_ratio(gpu.aspect());
        self.scene = Some(Scene::new(&gpu));
        self.pipeline = Some(pipeline);
        self.gpu = Some(gpu);
        self.window = Some(window);
        log::info!(
            "B: bloom  D: depth of field  O: oil paint  [ ]: threshold  - =: focus  , .: radius"
        );
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        let (Some(gpu), Some(pipeline)) = (&mut self.gpu, &mut self.pipeline) else {
            return;
        };
        gpu.resize(width, height);
        self.camera.set_aspect_ratio(gpu.aspect());
        if let Err(err) = pipeline.set_size(gpu, width, height) {
            log::error!("Resize failed: {}", err);
        }
    }

    fn handle_key(&mut self, event: &KeyEvent) {
        if event.state != ElementState::Pressed {
            return;
        }
        let Some(pipeline) = &mut self.pipeline else {
            return;
        };
        let PhysicalKey::Code(key) = event.physical_key else {
            return;
        };
        let config = *pipeline.config();
        match key {
            KeyCode::KeyB if !event.repeat => pipeline.set_bloom_enabled(!config.toggles.bloom),
            KeyCode::KeyD if !event.repeat => {
                pipeline.set_depth_of_field_enabled(!config.toggles.depth_of_field)
            }
            KeyCode::KeyO if !event.repeat => {
                pipeline.set_stylized_enabled(!config.toggles.stylized)
            }
            KeyCode::BracketLeft => pipeline.set_bloom_threshold(config.bloom_threshold - 0.05),
            KeyCode::BracketRight => pipeline.set_bloom_threshold(config.bloom_threshold + 0.05),
            KeyCode::Minus => pipeline.set_focal_distance((config.focal_distance - 1.0).max(0.0)),
            KeyCode::Equal => pipeline.set_focal_distance(config.focal_distance + 1.0),
            KeyCode::Comma => pipeline.set_filter_radius(config.filter_radius - 1.0),
            KeyCode::Period => pipeline.set_filter_radius(config.filter_radius + 1.0),
            _ => return,
        }
        log::info!("{:?}", pipeline.config());
    }

    fn redraw(&mut self) -> Result<(), PipelineError> {
        let (Some(gpu), Some(pipeline), Some(scene)) =
            (&mut self.gpu, &mut self.pipeline, &self.scene)
        else {
            return Ok(());
        };
        let Some(surface) = &gpu.surface else {
            return Ok(());
        };

        let now = Instant::now();
        let delta = now.duration_since(self.last_frame).as_secs_f32();
        let elapsed = now.duration_since(self.start_time).as_secs_f32();
        self.last_frame = now;
        pipeline.update_time(delta, elapsed);

        let output = match surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                let (width, height) = (gpu.width(), gpu.height());
                gpu.resize(width, height);
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let screen = ScreenTarget::from_texture(&output.texture, &view);

        let drawables = scene.instances(elapsed);
        pipeline.render_frame(gpu, &self.camera, &drawables, &screen)?;
        output.present();
        Ok(())
    }
}

impl ApplicationHandler for Demo {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(err) = self.init(event_loop) {
            log::error!("Startup failed: {}", err);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                self.resize(size.width, size.height);
            }
            WindowEvent::KeyboardInput { event, .. } => {
                self.handle_key(&event);
            }
            WindowEvent::RedrawRequested => {
                if let Err(err) = self.redraw() {
                    log::error!("Frame failed: {}", err);
                    if let Some(pipeline) = &mut self.pipeline {
                        pipeline.cancel_frame();
                    }
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => (),
        }
    }
}

fn main() -> Result<(), winit::error::EventLoopError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut demo = Demo::new(DemoConfig::default().title("Umbra").size(1280, 720));
    event_loop.run_app(&mut demo)
}
