use anyhow::bail;
use clap::{Parser, Subcommand, ValueEnum};
use dxrt_assets::scenes;
use dxrt_common::Scene;
use dxrt_render::{
    GpuBackend, HeadlessBackend, HostShell, Lifecycle, RenderError, Renderer, RendererConfig,
};
use dxrt_render_wgpu::{WgpuBackend, shaders};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dxrt-cli", about = "CLI tool for DXRT operations")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SceneKind {
    Textured,
    Colored,
    Clear,
}

#[derive(Subcommand)]
enum Commands {
    /// Print crate versions and the adapters a device could be created on
    Info {
        /// List the simulated adapters instead of the system's
        #[arg(long)]
        headless: bool,
    },
    /// Render frames on the headless backend and report fence accounting
    Simulate {
        /// Number of frames to render
        #[arg(short, long, default_value = "3")]
        frames: u64,
        /// Select a software adapter
        #[arg(long)]
        software: bool,
        #[arg(long, value_enum, default_value_t = SceneKind::Textured)]
        scene: SceneKind,
        #[arg(long, default_value = "640")]
        width: u32,
        #[arg(long, default_value = "480")]
        height: u32,
    },
}

/// Host with no window; the headless backend needs no surface handle.
struct NullHost;

impl HostShell for NullHost {
    type SurfaceTarget = ();

    fn surface_target(&self) -> Result<(), RenderError> {
        Ok(())
    }

    fn set_window_title(&self, title: &str) {
        tracing::debug!("title: {title}");
    }
}

fn scene_for(kind: SceneKind, aspect: f32) -> Scene {
    match kind {
        SceneKind::Textured => scenes::textured_triangle(aspect, shaders::textured()),
        SceneKind::Colored => scenes::colored_triangle(aspect, shaders::colored()),
        SceneKind::Clear => Scene::clear_only(),
    }
}

fn list_adapters<B: GpuBackend>(backend: &mut B) -> anyhow::Result<()> {
    let adapters = backend.enumerate_adapters()?;
    if adapters.is_empty() {
        println!("adapters: none");
    }
    for adapter in adapters {
        println!(
            "adapter {}: {} ({:?}, {})",
            adapter.index, adapter.name, adapter.kind, adapter.backend
        );
    }
    Ok(())
}

struct Report {
    frames: u64,
    requested: u64,
    completed: u64,
    presents: u64,
    validation: Vec<String>,
    live_after_destroy: usize,
}

fn simulate(config: RendererConfig, scene: Scene, frames: u64) -> anyhow::Result<Report> {
    let mut renderer = Renderer::new(HeadlessBackend::new(), config, scene);
    renderer.init(&NullHost)?;
    if let Some(adapter) = renderer.adapter() {
        println!("adapter: {} ({:?})", adapter.name, adapter.kind);
    }

    for _ in 0..frames {
        renderer.update()?;
        renderer.render()?;
    }

    let requested = renderer.fence_requested();
    let completed = renderer.fence_completed();
    let presents = renderer.backend().presents();
    let validation = renderer.backend().validation_messages();
    renderer.destroy()?;
    if renderer.lifecycle() != Lifecycle::Destroyed {
        bail!("renderer did not reach the destroyed state");
    }

    Ok(Report {
        frames: renderer.frames(),
        requested,
        completed,
        presents,
        validation,
        live_after_destroy: renderer.backend().live_resources(),
    })
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info { headless } => {
            println!("dxrt-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("assets: {}", dxrt_assets::crate_info());
            println!("render: {}", dxrt_render::crate_info());
            println!("backend: {}", dxrt_render_wgpu::crate_info());
            if headless {
                list_adapters(&mut HeadlessBackend::new())?;
            } else {
                list_adapters(&mut WgpuBackend::new(false))?;
            }
        }
        Commands::Simulate {
            frames,
            software,
            scene,
            width,
            height,
        } => {
            let config = RendererConfig {
                width,
                height,
                use_software_adapter: software,
                debug_layer: true,
                ..RendererConfig::default()
            };
            config.validate()?;
            let scene = scene_for(scene, config.extent().aspect_ratio());

            let report = simulate(config, scene, frames)?;
            println!("frames: {}", report.frames);
            println!(
                "fence: requested={}, completed={}",
                report.requested, report.completed
            );
            println!("presents: {}", report.presents);
            println!("live resources after destroy: {}", report.live_after_destroy);
            if report.validation.is_empty() {
                println!("validation: clean");
            } else {
                for message in &report.validation {
                    println!("validation: {message}");
                }
                bail!("{} validation message(s)", report.validation.len());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(software: bool) -> RendererConfig {
        RendererConfig {
            width: 64,
            height: 64,
            use_software_adapter: software,
            debug_layer: true,
            ..RendererConfig::default()
        }
    }

    #[test]
    fn textured_simulation_is_clean() {
        let report = simulate(config(false), scene_for(SceneKind::Textured, 1.0), 4).unwrap();
        assert_eq!(report.frames, 4);
        assert_eq!(report.presents, 4);
        // Upload fence plus one per frame.
        assert_eq!(report.requested, 5);
        assert_eq!(report.completed, report.requested);
        assert!(report.validation.is_empty());
        assert_eq!(report.live_after_destroy, 0);
    }

    #[test]
    fn software_clear_simulation() {
        let report = simulate(config(true), scene_for(SceneKind::Clear, 1.0), 2).unwrap();
        assert_eq!(report.requested, 2);
        assert_eq!(report.completed, 2);
        assert!(report.validation.is_empty());
    }
}
