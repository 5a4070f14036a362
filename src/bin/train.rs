#![recursion_limit = "256"]

use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::backend::{Autodiff, NdArray};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ebgan_trainer::config::AppConfig;
use ebgan_trainer::device::{AcceleratorProbe, CpuOnly};
use ebgan_trainer::model::EbganSession;
use ebgan_trainer::training::{RunContext, Trainer};

type TrainBackend = Autodiff<NdArray<f32>>;

/// Train an EBGAN with epoch checkpoints and best-model tracking.
#[derive(Parser)]
#[command(name = "train", about = "Train an Energy-Based GAN")]
struct Cli {
    /// Path to TOML (or .json) configuration file
    #[arg(long, short, default_value = "config.toml")]
    config: PathBuf,

    /// Resume from a checkpoint directory or its checkpoint.json
    #[arg(long, short)]
    resume: Option<PathBuf>,

    /// Run identifier (default: current time as MMDD_HHMMSS)
    #[arg(long)]
    run_id: Option<String>,

    /// Override trainer.epochs
    #[arg(long)]
    epochs: Option<usize>,

    /// Print the default configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", AppConfig::default_toml()?);
        return Ok(());
    }

    let config_found = cli.config.exists();
    let mut config = AppConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    if let Some(epochs) = cli.epochs {
        config.trainer.epochs = epochs;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_level())),
        )
        .init();
    if !config_found {
        tracing::warn!("config file '{}' not found, using defaults", cli.config.display());
    }

    let run_id = cli
        .run_id
        .unwrap_or_else(|| chrono::Local::now().format("%m%d_%H%M%S").to_string());
    tracing::info!(name = %config.name, run_id = %run_id, "starting run");

    let device = Default::default();
    let session = EbganSession::<TrainBackend>::from_config(&config, device)
        .context("building EBGAN session")?;
    let context = RunContext {
        run_id,
        available_accelerators: CpuOnly.accelerator_count(),
    };
    let mut trainer = Trainer::new(session, &config, context).context("initializing trainer")?;

    if let Some(path) = &cli.resume {
        trainer
            .resume(path)
            .with_context(|| format!("resuming from {}", path.display()))?;
    }

    let summary = trainer.train()?;
    tracing::info!(
        first_epoch = summary.first_epoch,
        last_epoch = ?summary.last_epoch,
        monitor_best = summary.monitor_best,
        checkpoints = summary.checkpoints.len(),
        warnings = trainer.warnings().len(),
        "training finished"
    );
    if let Some(best) = &summary.best_checkpoint {
        tracing::info!("best model: {}", best.display());
    }
    Ok(())
}
