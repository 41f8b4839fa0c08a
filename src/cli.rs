use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::PreviewConfig;
use crate::gpu::GpuRenderer;
use crate::param_extract::extract;
use crate::params::ParameterSnapshot;
use crate::preview::Preview;
use crate::protocol::SandboxMessage;
use crate::renderer::{HeadlessRenderer, RenderStatsHandle, RendererFactory};
use crate::scheduler::RenderMode;
use crate::scripting::UserScript;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the parameter schema a script declares, as JSON
    Params {
        /// Script file
        script: PathBuf,
    },

    /// Evaluate a script and render frames to disk
    Render {
        /// Script file
        script: PathBuf,

        /// Parameter values as a JSON object, e.g. '{"radius": 8}'
        #[arg(long)]
        params: Option<String>,

        /// Output directory for frames
        #[arg(long)]
        out: Option<PathBuf>,

        /// Number of frames to render (animated scenes only advance past the first)
        #[arg(long, default_value_t = 1)]
        frames: u32,

        /// Frames per second used to step animation time
        #[arg(long, default_value_t = 60.0)]
        fps: f32,

        /// Output width (overrides the config file)
        #[arg(long)]
        width: Option<u32>,

        /// Output height (overrides the config file)
        #[arg(long)]
        height: Option<u32>,

        /// Preview config file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Evaluate without a GPU; no images are written
        #[arg(long)]
        headless: bool,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Params { script } => print_params(&script),
        Commands::Render {
            script,
            params,
            out,
            frames,
            fps,
            width,
            height,
            config,
            headless,
        } => {
            let mut config = match config {
                Some(path) => PreviewConfig::load(path)?,
                None => PreviewConfig::default(),
            };
            if let Some(width) = width {
                config.viewport.width = width;
            }
            if let Some(height) = height {
                config.viewport.height = height;
            }
            let params = match params {
                Some(json) => serde_json::from_str::<ParameterSnapshot>(&json)
                    .context("--params must be a JSON object of parameter values")?,
                None => ParameterSnapshot::new(),
            };
            render(RenderJob {
                script,
                params,
                out,
                frames,
                fps,
                config,
                headless,
            })
        }
    }
}

fn read_script(path: &Path) -> Result<UserScript> {
    let code = fs::read_to_string(path)
        .with_context(|| format!("failed to read script {}", path.display()))?;
    let filename = path.file_name().map(|n| n.to_string_lossy().into_owned());
    Ok(match filename {
        Some(name) => UserScript::new(code).with_filename(name),
        None => UserScript::new(code),
    })
}

fn print_params(path: &Path) -> Result<()> {
    let script = read_script(path)?;
    let descriptors = extract(&script.code)?;
    println!("{}", serde_json::to_string_pretty(&descriptors)?);
    Ok(())
}

struct RenderJob {
    script: PathBuf,
    params: ParameterSnapshot,
    out: Option<PathBuf>,
    frames: u32,
    fps: f32,
    config: PreviewConfig,
    headless: bool,
}

fn render(job: RenderJob) -> Result<()> {
    if job.fps <= 0.0 {
        bail!("--fps must be positive");
    }
    let script = read_script(&job.script)?;

    let renderer: RendererFactory = if job.headless {
        HeadlessRenderer::factory(RenderStatsHandle::default())
    } else {
        GpuRenderer::factory()
    };
    let mut preview = Preview::mount(job.config, renderer, None)?;

    preview.load(&script);
    if !job.params.is_empty() {
        preview.update(&job.params);
    }

    let mut failed = false;
    for event in preview.take_events() {
        match event {
            SandboxMessage::Parameters { parameters } => {
                log::info!("Script declares {} parameters", parameters.len());
            }
            SandboxMessage::Error { error } => {
                eprintln!("Script error: {}", error);
                failed = true;
            }
        }
    }
    if failed && preview.scene().active().is_none() {
        preview.unmount();
        bail!("script produced no scene");
    }

    if let Some(out) = &job.out {
        fs::create_dir_all(out)
            .with_context(|| format!("failed to create output directory {}", out.display()))?;
    }

    let animated = preview.scene().render_mode() == RenderMode::Continuous;
    let frames = if animated { job.frames.max(1) } else { 1 };
    log::info!("Rendering {} frame(s) at {} fps", frames, job.fps);

    for i in 0..frames {
        if i > 0 {
            preview.frame(i as f32 / job.fps);
        }
        let Some(out) = &job.out else {
            continue;
        };
        match preview.scene_mut().snapshot()? {
            Some(image) => {
                let path = out.join(format!("frame_{:05}.png", i));
                image
                    .save(&path)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                if i % 60 == 0 {
                    log::info!("Wrote {}", path.display());
                }
            }
            None => log::debug!("Renderer keeps no pixels; frame {} not written", i),
        }
    }

    preview.unmount();
    println!("{}", serde_json::to_string_pretty(&preview.snapshot())?);
    Ok(())
}
