//! lumen - demo entry point.
//!
//! Opens a window, shows the loading screen for a short while, then renders
//! a spinning cube over a floor with the full hybrid pipeline. `F5` reloads
//! the shaders.

mod demo;

use anyhow::Result;
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::WindowId;

use lumen_core::{FrameTimer, RendererConfig};
use lumen_platform::Window;
use lumen_renderer::{RendererContext, SpirvDirectory};
use lumen_scene::BlitDstCoords;

use demo::DemoAssets;

/// Frames spent on the loading screen before the game starts.
const LOADING_FRAMES: u64 = 90;

struct App {
    window: Option<Window>,
    renderer: Option<RendererContext>,
    assets: DemoAssets,
    timer: FrameTimer,
}

impl App {
    fn new() -> Self {
        Self {
            window: None,
            renderer: None,
            assets: DemoAssets::new(),
            timer: FrameTimer::new(),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = Window::new(event_loop, 1280, 720, "lumen")?;
        let config = RendererConfig {
            present_width: window.width().max(1),
            present_height: window.height().max(1),
            ..Default::default()
        };
        let shaders = Box::new(SpirvDirectory::new(config.shader_dir.clone()));
        let renderer = RendererContext::new(&window, config, &self.assets, shaders)?;

        info!("Initialization complete, entering main loop");
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn redraw(&mut self) -> Result<()> {
        let (Some(window), Some(renderer)) = (&self.window, &mut self.renderer) else {
            return Ok(());
        };
        let time = self.timer.elapsed_secs();
        self.timer.tick();

        let frame = renderer.frame_counter();
        if frame < LOADING_FRAMES {
            let progress = frame as f32 / LOADING_FRAMES as f32;
            renderer.render_loading_screen(window, &demo::loading_screen_items(progress))?;
            return Ok(());
        }

        let config = renderer.config();
        let data = demo::game_frame(
            &self.assets,
            time,
            window.width(),
            window.height(),
            BlitDstCoords::full(config.native_width, config.native_height),
        );
        renderer.render_game(window, &data)?;
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none()
            && let Err(e) = self.init(event_loop)
        {
            error!("Failed to initialize: {:?}", e);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(ref mut window) = self.window {
                    window.resize(size.width, size.height);
                }
                if let Some(ref mut renderer) = self.renderer {
                    renderer.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    error!("Render error: {:?}", e);
                    event_loop.exit();
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed()
                    && !event.repeat
                    && event.physical_key == PhysicalKey::Code(KeyCode::F5)
                    && let Some(ref mut renderer) = self.renderer
                {
                    match renderer.hotload_shaders() {
                        Ok(true) => info!("Shaders reloaded"),
                        Ok(false) => warn!("Shader reload failed; previous pipelines kept"),
                        Err(e) => error!("Shader reload error: {:?}", e),
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    lumen_core::init_logging();
    info!("Starting lumen");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new();
    event_loop.run_app(&mut app)?;

    Ok(())
}
