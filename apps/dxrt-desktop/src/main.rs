use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use dxrt_assets::{AssetLoader, scenes};
use dxrt_common::{Extent, KeyCode as VirtualKey, Scene, ShaderSource};
use dxrt_render::config::is_software_flag;
use dxrt_render::{HostShell, RenderError, Renderer, RendererConfig};
use dxrt_render_wgpu::{WgpuBackend, shaders};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SceneKind {
    /// Checkerboard-textured triangle
    Textured,
    /// Vertex-colored triangle
    Colored,
    /// Clear only
    Clear,
}

#[derive(Parser)]
#[command(
    name = "dxrt-desktop",
    about = "DXRT desktop renderer",
    after_help = "Pass -warp, /warp, --warp or --software to render on a software adapter."
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// YAML renderer config; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Try the most powerful adapter first
    #[arg(long)]
    high_performance: bool,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Present without waiting for vertical blank
    #[arg(long)]
    no_vsync: bool,

    #[arg(long, value_enum, default_value_t = SceneKind::Textured)]
    scene: SceneKind,

    /// Shader file, relative to the asset root
    #[arg(long)]
    shader: Option<PathBuf>,

    /// Asset root; defaults to the executable's directory
    #[arg(long)]
    assets: Option<PathBuf>,
}

/// Windows-style virtual-key code for the keys a renderer may care about.
fn virtual_key(code: KeyCode) -> Option<VirtualKey> {
    let letters = [
        KeyCode::KeyA,
        KeyCode::KeyB,
        KeyCode::KeyC,
        KeyCode::KeyD,
        KeyCode::KeyE,
        KeyCode::KeyF,
        KeyCode::KeyG,
        KeyCode::KeyH,
        KeyCode::KeyI,
        KeyCode::KeyJ,
        KeyCode::KeyK,
        KeyCode::KeyL,
        KeyCode::KeyM,
        KeyCode::KeyN,
        KeyCode::KeyO,
        KeyCode::KeyP,
        KeyCode::KeyQ,
        KeyCode::KeyR,
        KeyCode::KeyS,
        KeyCode::KeyT,
        KeyCode::KeyU,
        KeyCode::KeyV,
        KeyCode::KeyW,
        KeyCode::KeyX,
        KeyCode::KeyY,
        KeyCode::KeyZ,
    ];
    if let Some(i) = letters.iter().position(|k| *k == code) {
        return Some(VirtualKey(b'A' + i as u8));
    }
    let vk = match code {
        KeyCode::Backspace => 0x08,
        KeyCode::Tab => 0x09,
        KeyCode::Enter => 0x0D,
        KeyCode::ShiftLeft | KeyCode::ShiftRight => 0x10,
        KeyCode::ControlLeft | KeyCode::ControlRight => 0x11,
        KeyCode::Escape => 0x1B,
        KeyCode::Space => 0x20,
        KeyCode::ArrowLeft => 0x25,
        KeyCode::ArrowUp => 0x26,
        KeyCode::ArrowRight => 0x27,
        KeyCode::ArrowDown => 0x28,
        KeyCode::Digit0 => 0x30,
        KeyCode::Digit1 => 0x31,
        KeyCode::Digit2 => 0x32,
        KeyCode::Digit3 => 0x33,
        KeyCode::Digit4 => 0x34,
        KeyCode::Digit5 => 0x35,
        KeyCode::Digit6 => 0x36,
        KeyCode::Digit7 => 0x37,
        KeyCode::Digit8 => 0x38,
        KeyCode::Digit9 => 0x39,
        _ => return None,
    };
    Some(VirtualKey(vk))
}

/// The winit window as seen by the renderer.
struct WindowHost {
    window: Arc<Window>,
}

impl HostShell for WindowHost {
    type SurfaceTarget = wgpu::SurfaceTarget<'static>;

    fn surface_target(&self) -> Result<Self::SurfaceTarget, RenderError> {
        Ok(wgpu::SurfaceTarget::from(Arc::clone(&self.window)))
    }

    fn set_window_title(&self, title: &str) {
        self.window.set_title(title);
    }
}

/// Scene inputs. Geometry is built once the window's real size is known.
struct SceneRecipe {
    kind: SceneKind,
    shader: Option<ShaderSource>,
}

impl SceneRecipe {
    fn load(cli: &Cli) -> Result<Self> {
        let shader = match (cli.scene, &cli.shader) {
            (SceneKind::Clear, _) => None,
            (_, Some(name)) => {
                let loader = cli
                    .assets
                    .clone()
                    .map(AssetLoader::new)
                    .unwrap_or_else(AssetLoader::beside_executable);
                Some(loader.load_shader(name)?)
            }
            (SceneKind::Textured, None) => Some(shaders::textured()),
            (SceneKind::Colored, None) => Some(shaders::colored()),
        };
        Ok(Self {
            kind: cli.scene,
            shader,
        })
    }

    fn build(&self, size: Extent) -> Scene {
        let aspect = size.aspect_ratio();
        match (self.kind, &self.shader) {
            (SceneKind::Textured, Some(shader)) => {
                scenes::textured_triangle(aspect, shader.clone())
            }
            (SceneKind::Colored, Some(shader)) => scenes::colored_triangle(aspect, shader.clone()),
            _ => Scene::clear_only(),
        }
    }
}

struct App {
    renderer: Renderer<WgpuBackend>,
    recipe: SceneRecipe,
    host: Option<WindowHost>,
    /// First fatal error; ends the event loop.
    failure: Option<RenderError>,
}

impl App {
    fn fail(&mut self, event_loop: &ActiveEventLoop, error: RenderError) {
        tracing::error!("fatal: {error}");
        if let Err(e) = self.renderer.destroy() {
            tracing::error!("teardown failed: {e}");
        }
        self.failure.get_or_insert(error);
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.host.is_some() {
            return;
        }

        let size = self.renderer.preferred_surface_size();
        let attrs = Window::default_attributes()
            .with_title(self.renderer.title())
            .with_inner_size(PhysicalSize::new(size.width, size.height));
        let window = match event_loop.create_window(attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                self.fail(event_loop, RenderError::SurfaceCreation(e.to_string()));
                return;
            }
        };

        // Render at the size the window actually got.
        let actual = window.inner_size();
        if let Err(e) = self.renderer.resize(actual.width, actual.height) {
            self.fail(event_loop, e);
            return;
        }
        let scene = self.recipe.build(self.renderer.preferred_surface_size());
        if let Err(e) = self.renderer.set_scene(scene) {
            self.fail(event_loop, e);
            return;
        }

        let host = WindowHost { window };
        if let Err(e) = self.renderer.init(&host) {
            self.fail(event_loop, e);
            return;
        }
        self.host = Some(host);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                if let Err(e) = self.renderer.destroy() {
                    self.fail(event_loop, e);
                    return;
                }
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => {
                if let Err(e) = self.renderer.resize(new_size.width, new_size.height) {
                    self.fail(event_loop, e);
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state,
                        ..
                    },
                ..
            } => {
                if let Some(vk) = virtual_key(key) {
                    match state {
                        ElementState::Pressed => self.renderer.on_key_down(vk),
                        ElementState::Released => self.renderer.on_key_up(vk),
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                if self.host.is_none() {
                    return;
                }
                let frame = self.renderer.update().and_then(|()| self.renderer.render());
                if let Err(e) = frame {
                    self.fail(event_loop, e);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(host) = &self.host {
            host.window.request_redraw();
        }
    }
}

fn load_config(cli: &Cli, raw_args: &[String]) -> Result<RendererConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            RendererConfig::from_yaml_str(&text)?
        }
        None => RendererConfig::default(),
    };
    config.apply_args(raw_args);
    if cli.high_performance {
        config.prefer_high_performance = true;
    }
    if let Some(width) = cli.width {
        config.width = width;
    }
    if let Some(height) = cli.height {
        config.height = height;
    }
    if cli.no_vsync {
        config.vsync_interval = 0;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let raw_args: Vec<String> = std::env::args().collect();
    let cli = Cli::parse_from(raw_args.iter().filter(|a| !is_software_flag(a)));

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    tracing::info!("dxrt-desktop starting");

    let config = load_config(&cli, &raw_args)?;
    let recipe = SceneRecipe::load(&cli)?;
    let scene = recipe.build(config.extent());
    let backend = WgpuBackend::new(config.debug_layer);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App {
        renderer: Renderer::new(backend, config, scene),
        recipe,
        host: None,
        failure: None,
    };
    event_loop.run_app(&mut app)?;

    if let Some(error) = app.failure {
        return Err(error.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_map_to_virtual_keys() {
        assert_eq!(virtual_key(KeyCode::KeyA), Some(VirtualKey(0x41)));
        assert_eq!(virtual_key(KeyCode::KeyZ), Some(VirtualKey(0x5A)));
        assert_eq!(virtual_key(KeyCode::Digit7), Some(VirtualKey(0x37)));
        assert_eq!(virtual_key(KeyCode::F24), None);
    }

    #[test]
    fn scene_follows_the_window_aspect() {
        let cli = Cli::parse_from(["dxrt-desktop", "--scene", "colored"]);
        let recipe = SceneRecipe::load(&cli).unwrap();
        let clamped = Extent::new(1280, 1024);
        assert_eq!(
            recipe.build(clamped),
            scenes::colored_triangle(clamped.aspect_ratio(), shaders::colored())
        );
        assert_ne!(
            recipe.build(clamped).geometry,
            recipe.build(Extent::new(1920, 1080)).geometry
        );
    }

    #[test]
    fn clear_scene_needs_no_shader() {
        let cli = Cli::parse_from(["dxrt-desktop", "--scene", "clear"]);
        let recipe = SceneRecipe::load(&cli).unwrap();
        assert_eq!(recipe.build(Extent::new(640, 480)), Scene::clear_only());
    }

    #[test]
    fn cli_overrides_config() {
        let raw: Vec<String> = ["dxrt-desktop", "-WARP", "--width", "800", "--no-vsync"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let cli = Cli::parse_from(raw.iter().filter(|a| !is_software_flag(a)));
        let config = load_config(&cli, &raw).unwrap();
        assert!(config.use_software_adapter);
        assert_eq!(config.width, 800);
        assert_eq!(config.height, 1080);
        assert_eq!(config.vsync_interval, 0);
    }
}
