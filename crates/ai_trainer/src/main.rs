//! Exoplanet ensemble trainer CLI
//!
//! Trains the stacked disposition classifier from the mission catalogs and writes
//! the artifact bundle.

use anyhow::{Context, Result};
use clap::Parser;
use exo_ai_core::Source;
use exo_ai_trainer::{run, CatalogSource, TrainingConfig};
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "exo-train")]
#[command(author = "Exo Ensemble Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Train the stacked exoplanet disposition ensemble", long_about = None)]
struct Args {
    /// TOML training configuration (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding k2.csv, kepler.csv and tess.csv
    #[arg(long, default_value = "data/raw")]
    raw_dir: PathBuf,

    /// Kepler catalog path (overrides the raw directory entry)
    #[arg(long)]
    kepler: Option<PathBuf>,

    /// K2 catalog path (overrides the raw directory entry)
    #[arg(long)]
    k2: Option<PathBuf>,

    /// TESS catalog path (overrides the raw directory entry)
    #[arg(long)]
    tess: Option<PathBuf>,

    /// Output directory for the artifact bundle
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Export the processed train/test/cv partitions here
    #[arg(long)]
    processed_dir: Option<PathBuf>,

    /// Random seed for splitting and training
    #[arg(long)]
    seed: Option<u64>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn catalogs(args: &Args) -> Vec<CatalogSource> {
    CatalogSource::default_set(&args.raw_dir)
        .into_iter()
        .map(|catalog| {
            let explicit = match catalog.source {
                Source::Kepler => args.kepler.clone(),
                Source::K2 => args.k2.clone(),
                Source::Tess => args.tess.clone(),
            };
            match explicit {
                Some(path) => CatalogSource::new(catalog.source, path),
                None => catalog,
            }
        })
        .collect()
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Exoplanet Ensemble Trainer v{}", env!("CARGO_PKG_VERSION"));
    info!("═══════════════════════════════════════════");

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            TrainingConfig::from_file(path).context("Failed to load configuration")?
        }
        None => TrainingConfig::default(),
    };
    config
        .apply_env_overrides()
        .context("Invalid EXO_* environment override")?;
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(output) = &args.output {
        config.output_dir = output.clone();
    }
    if let Some(dir) = &args.processed_dir {
        config.processed_dir = Some(dir.clone());
    }
    config.validate().context("Invalid training configuration")?;

    info!("Training configuration:");
    info!("  Seed: {}", config.seed);
    info!(
        "  Split: train {:.2} / test {:.2} / cv {:.2}",
        config.split.train, config.split.test, config.split.cv
    );
    info!("  Imputation: {:?}", config.cleaning.imputation);
    info!("  Output: {}", config.output_dir.display());

    let catalogs = catalogs(&args);
    let outcome = run(&config, &catalogs).context("Training failed")?;
    let report = &outcome.report;

    for source in &report.sources {
        if let Some(reason) = &source.skipped {
            warn!("Source {} was skipped: {}", source.source, reason);
        }
    }

    info!("═══════════════════════════════════════════");
    info!("Training complete");
    for learner in &report.evaluation.learners {
        info!(
            "  {:<18} train {:.4}  cv {:.4}",
            learner.name, learner.train_accuracy, learner.cv_accuracy
        );
    }
    info!(
        "  {:<18} train {:.4}  cv {:.4}",
        "meta", report.evaluation.meta_learner.train_accuracy, report.evaluation.meta_learner.cv_accuracy
    );
    info!("  Test accuracy: {:.4}", report.evaluation.test_accuracy);
    info!("  Test log loss: {:.4}", report.evaluation.test_log_loss);
    info!("  Config hash: {}", report.config_hash);
    info!("  Bundle: {}", config.output_dir.display());

    Ok(())
}
