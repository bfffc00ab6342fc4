//! Exoplanet ensemble prediction CLI
//!
//! Loads a bundle through the inference service and classifies a feature CSV or a
//! single comma-separated feature vector.

use anyhow::{bail, Context, Result};
use clap::Parser;
use exo_ai_service::{write_predictions_csv, InferenceService, ServiceConfig};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "exo-predict")]
#[command(author = "Exo Ensemble Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Classify transit-survey records with a trained ensemble bundle", long_about = None)]
struct Args {
    /// TOML service configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bundle directory (overrides configuration)
    #[arg(short, long)]
    artifact_dir: Option<PathBuf>,

    /// Feature CSV whose header lists the bundle's feature names in order
    #[arg(short, long, conflicts_with = "features")]
    input: Option<PathBuf>,

    /// One comma-separated feature vector
    #[arg(short, long, allow_hyphen_values = true)]
    features: Option<String>,

    /// Write predictions CSV here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Prefix each prediction row with its input features
    #[arg(long)]
    include_input: bool,

    /// Attach the per-learner meta-feature breakdown (JSON output only)
    #[arg(long)]
    include_meta: bool,

    /// Print the service status as JSON and exit
    #[arg(long)]
    status: bool,
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn parse_features(raw: &str) -> Result<Vec<f64>> {
    raw.split(',')
        .map(|v| {
            v.trim()
                .parse::<f64>()
                .with_context(|| format!("{v:?} is not a number"))
        })
        .collect()
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    info!("Exoplanet Ensemble Predictor v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => ServiceConfig::from_file(path).context("Failed to load configuration")?,
        None => ServiceConfig::default(),
    };
    config
        .apply_env_overrides()
        .context("Invalid EXO_SERVICE_* override")?;
    if let Some(dir) = &args.artifact_dir {
        config.artifact_dir = dir.clone();
    }
    if args.include_meta {
        config.include_meta = true;
    }

    let service = InferenceService::load(config).context("Failed to start inference service")?;

    if args.status {
        println!("{}", serde_json::to_string_pretty(&service.status())?);
        return Ok(());
    }

    if let Some(raw) = &args.features {
        let features = parse_features(raw)?;
        let prediction = service.predict_single(&features, None)?;
        println!("{}", serde_json::to_string_pretty(&prediction)?);
        return Ok(());
    }

    let Some(input) = &args.input else {
        bail!("either --input or --features is required");
    };
    let file = File::open(input).with_context(|| format!("Failed to open {}", input.display()))?;
    let (names, rows) = service.read_csv(file)?;
    let response = service.predict_batch(&rows, None)?;
    info!(
        "Classified {} rows with bundle generation {}",
        response.len(),
        response.generation
    );

    let inputs = args
        .include_input
        .then_some((names.as_slice(), rows.as_slice()));
    match &args.output {
        Some(path) => {
            let out = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            write_predictions_csv(out, &response, inputs)?;
            info!("Predictions written to {}", path.display());
        }
        None => write_predictions_csv(io::stdout().lock(), &response, inputs)?,
    }
    Ok(())
}
