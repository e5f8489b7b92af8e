//! xrpipe CLI tools: pipeline simulation, ladder replay, config checks.

#![forbid(unsafe_code)]

use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use xrpipe_core::{
    AdaptiveConfig, AdaptiveDensity, DeviceDescription, Extent, HmdDevice, LayerDesc,
    MockCompositor, PipelineConfig,
};

#[derive(Parser, Debug)]
#[command(name = "xrpipe")]
#[command(about = "xrpipe frame pipeline tools")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drive the pipeline against a simulated compositor and print stats
    Run {
        /// Number of frames to run
        #[arg(short, long, default_value_t = 90)]
        frames: u64,

        /// Constant GPU frame time reported by the compositor (ms)
        #[arg(long, conflicts_with = "gpu_trace")]
        gpu_ms: Option<f32>,

        /// File with GPU frame times (ms), comma or whitespace separated
        #[arg(long)]
        gpu_trace: Option<PathBuf>,

        /// Pipeline configuration file (JSON)
        #[arg(short, long, env = "XRPIPE_CONFIG")]
        config: Option<PathBuf>,

        /// Overlay quad layers to create besides the eye layer
        #[arg(long, default_value_t = 1)]
        layers: u32,

        /// Make begin-frame fail for every Mth frame
        #[arg(long)]
        fail_begin_every: Option<u64>,

        /// Force adaptive pixel density on
        #[arg(long)]
        adaptive: bool,
    },

    /// Replay GPU frame times through the adaptive density ladder
    Ladder {
        /// GPU frame times (ms), comma separated
        #[arg(short, long)]
        trace: String,

        /// GPU budget (ms)
        #[arg(long)]
        budget_ms: Option<f32>,
    },

    /// Load, validate and print a pipeline configuration
    CheckConfig {
        /// Pipeline configuration file (JSON)
        #[arg(short, long, env = "XRPIPE_CONFIG")]
        config: PathBuf,
    },

    /// Show version information
    Version,
}

fn main() -> Result<()> {
    xrpipe_common::init_tracing_with_default("warn");

    let args = Args::parse();

    match args.command {
        Command::Run {
            frames,
            gpu_ms,
            gpu_trace,
            config,
            layers,
            fail_begin_every,
            adaptive,
        } => {
            let mut config = match config {
                Some(path) => PipelineConfig::load(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => PipelineConfig::default(),
            };
            if adaptive {
                config.pixel_density_adaptive = true;
            }

            let mock = Arc::new(MockCompositor::new());
            if let Some(ms) = gpu_ms {
                mock.set_gpu_time(ms);
            }
            if let Some(path) = gpu_trace {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?;
                let trace = xrpipe_common::helpers::parse_frame_times(&text)?;
                if trace.is_empty() {
                    bail!("GPU trace {} is empty", path.display());
                }
                mock.set_gpu_trace(trace);
            }
            if let Some(every) = fail_begin_every {
                mock.fail_begin_every(every);
            }

            let mut device = HmdDevice::new(mock.clone(), DeviceDescription::default(), config);
            device.init()?;
            for _ in 0..layers {
                device.create_layer(LayerDesc::quad(
                    xrpipe_core::glam::Vec2::new(100.0, 56.25),
                    Extent::new(1024, 576),
                ))?;
            }

            info!("running {} frames", frames);
            for _ in 0..frames {
                device.run_frame()?;
                if let Some(reason) = device.take_device_lost() {
                    warn!("stopping: device lost ({})", reason);
                    break;
                }
            }
            device.wait_idle()?;

            let stats = device.stats()?;
            let settings = device.settings()?;
            let (rung, density) = device.adaptive_rung()?;
            device.release();

            let report = serde_json::json!({
                "stats": stats,
                "pixel_density": settings.pixel_density,
                "render_target": [settings.render_target_size.width, settings.render_target_size.height],
                "adaptive": { "enabled": settings.pixel_density_adaptive, "rung": rung, "density": density },
                "live_swapchains": mock.live_swapchains(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Ladder { trace, budget_ms } => {
            let samples = xrpipe_common::helpers::parse_frame_times(&trace)?;
            let mut config = AdaptiveConfig::default();
            if let Some(budget) = budget_ms {
                config.gpu_budget_ms = budget;
            }
            config.validate()?;

            let mut controller = AdaptiveDensity::new(config);
            println!("{:>5}  {:>8}  {:<12}  {:>4}  {:>7}", "#", "gpu_ms", "action", "rung", "density");
            for (i, gpu_ms) in samples.iter().enumerate() {
                let adjustment = controller.sample(*gpu_ms);
                println!(
                    "{:>5}  {:>8.2}  {:<12}  {:>4}  {:>7.2}",
                    i,
                    gpu_ms,
                    format!("{adjustment:?}"),
                    controller.rung(),
                    controller.density()
                );
            }
        }
        Command::CheckConfig { config } => {
            let loaded = PipelineConfig::load(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            println!("{}", loaded.to_json_pretty()?);
        }
        Command::Version => {
            println!("xrpipe {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
