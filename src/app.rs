use std::sync::Arc;
use std::time::Instant;

use winit::{
    application::ApplicationHandler,
    event::*,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

use crate::config::AppConfig;
use crate::input::{PointerEvent, PointerPhase, MOUSE_CONTACT};
use crate::rendering::RevealImages;
use crate::simulation::context::{FluidContext, InitError, TickOutcome};
use crate::simulation::gpu::{request_device, GpuBackend, GpuInitError};

/// Anything that stops the window from coming up.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to create window: {0}")]
    Window(#[from] winit::error::OsError),
    #[error("failed to create surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),
    #[error(transparent)]
    Gpu(#[from] GpuInitError),
    #[error(transparent)]
    Init(#[from] InitError),
}

pub struct App {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    config: wgpu::SurfaceConfiguration,
    fluid: FluidContext<GpuBackend>,
    cursor: (f32, f32),
    frame_count: u32,
    fps_timer: Instant,
}

impl App {
    pub fn new(event_loop: &ActiveEventLoop, config: &AppConfig) -> Result<Self, StartupError> {
        let window_attributes = Window::default_attributes()
            .with_title(config.window.title.clone())
            .with_inner_size(winit::dpi::PhysicalSize::new(config.window.width, config.window.height));
        let window = Arc::new(event_loop.create_window(window_attributes)?);

        let instance = wgpu::Instance::default();
        let surface = instance.create_surface(window.clone())?;
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .map_err(GpuInitError::from)?;
        log::info!("Using adapter: {}", adapter.get_info().name);
        let (device, queue) = pollster::block_on(request_device(&adapter)).map_err(GpuInitError::from)?;

        // Images are sampled as stored, so present to a non-sRGB format when possible.
        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let images = RevealImages::load(
            config.composite.top_image.as_deref(),
            config.composite.bottom_image.as_deref(),
        );
        let backend = GpuBackend::new(adapter, device.clone(), queue);
        let fluid = FluidContext::new(backend, config, &images, (surface_config.width, surface_config.height))?;

        Ok(Self {
            window,
            surface,
            device,
            config: surface_config,
            fluid,
            cursor: (0.0, 0.0),
            frame_count: 0,
            fps_timer: Instant::now(),
        })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Current surface size; zero while minimized.
    fn display_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn pointer(&mut self, contact_id: u64, x: f32, y: f32, phase: PointerPhase) {
        let display = self.display_size();
        self.fluid.handle_pointer(PointerEvent { contact_id, x, y, phase }, display);
    }

    pub fn handle_event(&mut self, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested");
                return false;
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed && event.logical_key == Key::Named(NamedKey::Escape) {
                    return false;
                }
            }
            WindowEvent::Resized(physical_size) => {
                if physical_size.width > 0 && physical_size.height > 0 {
                    self.config.width = physical_size.width;
                    self.config.height = physical_size.height;
                    self.surface.configure(&self.device, &self.config);
                }
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => {
                let phase = match state {
                    ElementState::Pressed => PointerPhase::Start,
                    ElementState::Released => PointerPhase::End,
                };
                let (x, y) = self.cursor;
                self.pointer(MOUSE_CONTACT, x, y, phase);
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor = (position.x as f32, position.y as f32);
                self.pointer(MOUSE_CONTACT, self.cursor.0, self.cursor.1, PointerPhase::Move);
            }
            WindowEvent::Touch(touch) => {
                let phase = match touch.phase {
                    TouchPhase::Started => PointerPhase::Start,
                    TouchPhase::Moved => PointerPhase::Move,
                    TouchPhase::Ended | TouchPhase::Cancelled => PointerPhase::End,
                };
                // Contact 0 is the mouse.
                self.pointer(touch.id + 1, touch.location.x as f32, touch.location.y as f32, phase);
            }
            WindowEvent::RedrawRequested => {
                self.render();
            }
            _ => {}
        }
        true
    }

    fn render(&mut self) {
        let now = Instant::now();
        let display = self.display_size();
        if display.0 == 0 || display.1 == 0 {
            self.fluid.tick(now, display);
            return;
        }

        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(e) => {
                log::debug!("Surface acquire failed ({e}), reconfiguring");
                self.surface.configure(&self.device, &self.config);
                return;
            }
        };
        let view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.fluid.backend_mut().set_screen(view, self.config.format);

        let display = (self.config.width, self.config.height);
        match self.fluid.tick(now, display) {
            TickOutcome::Rendered(report) => {
                log::trace!("Tick dt={:.4} impulses={}", report.dt, report.impulses.len());
            }
            TickOutcome::Skipped(reason) => {
                log::trace!("Tick skipped: {:?}", reason);
            }
        }
        self.fluid.backend_mut().clear_screen();
        frame.present();

        self.frame_count += 1;
        if self.fps_timer.elapsed().as_secs_f32() >= 1.0 {
            log::info!("FPS: {}", self.frame_count);
            self.frame_count = 0;
            self.fps_timer = Instant::now();
        }
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

struct AppState {
    config: AppConfig,
    app: Option<App>,
}

impl ApplicationHandler for AppState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.app.is_some() {
            return;
        }

        match App::new(event_loop, &self.config) {
            Ok(app) => self.app = Some(app),
            Err(e) => {
                log::error!("Startup failed: {}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        let Some(app) = &mut self.app else { return };

        if window_id != app.window().id() {
            return;
        }

        if !app.handle_event(&event) {
            event_loop.exit();
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(app) = &self.app {
            app.request_redraw();
        }
    }
}

pub fn run() {
    env_logger::init();

    let config = AppConfig::load();
    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            log::error!("Failed to create event loop: {}", e);
            return;
        }
    };
    let mut state = AppState { config, app: None };

    if let Err(e) = event_loop.run_app(&mut state) {
        log::error!("Event loop error: {}", e);
    }
}
