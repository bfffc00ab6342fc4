//! End-to-end training pipeline
//!
//! catalogs -> harmonized table -> cleaned matrix -> stratified split -> stacked
//! ensemble -> bundle on disk plus `training_report.json`.

use crate::config::TrainingConfig;
use crate::errors::{Result, TrainerError};
use crate::sources::{load_catalogs, CatalogSource, SourceReport};
use crate::stacking::{train_ensemble, EnsembleEvaluation};
use chrono::{DateTime, Utc};
use exo_ai_core::serde_canon::to_canonical_json;
use exo_ai_core::split::class_counts;
use exo_ai_core::{
    clean, save_bundle, stratified_split, BundleInfo, CleanReport, Disposition, EnsembleArtifact,
    ModelData, Table, N_CLASSES,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, instrument};

/// Report file written beside the bundle files
pub const REPORT_FILE: &str = "training_report.json";

/// Size and class mix of one partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSummary {
    pub rows: usize,
    pub class_counts: [usize; N_CLASSES],
}

impl PartitionSummary {
    fn of(labels: &[Disposition]) -> Self {
        Self {
            rows: labels.len(),
            class_counts: class_counts(labels),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSizes {
    pub train: PartitionSummary,
    pub test: PartitionSummary,
    pub cv: PartitionSummary,
}

/// Everything a training run measured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub version: String,
    pub seed: u64,
    /// blake3 of the canonical JSON form of the configuration
    pub config_hash: String,
    pub trained_at: DateTime<Utc>,
    pub sources: Vec<SourceReport>,
    pub cleaning: CleanReport,
    pub partitions: PartitionSizes,
    pub feature_names: Vec<String>,
    pub evaluation: EnsembleEvaluation,
    /// Set once the bundle has been written
    pub bundle: Option<BundleInfo>,
}

/// A trained ensemble and its report, not yet persisted
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub artifact: EnsembleArtifact,
    pub report: TrainingReport,
}

fn config_hash(config: &TrainingConfig) -> Result<String> {
    let json = to_canonical_json(config)?;
    Ok(hex::encode(blake3::hash(json.as_bytes()).as_bytes()))
}

fn log_partition(name: &str, summary: &PartitionSummary) {
    info!(
        "{} partition: {} rows (FALSE POSITIVE {}, CANDIDATE {}, CONFIRMED {})",
        name,
        summary.rows,
        summary.class_counts[0],
        summary.class_counts[1],
        summary.class_counts[2]
    );
}

/// Clean and split a harmonized table.
#[instrument(skip_all, fields(rows = raw.n_rows()))]
pub fn prepare(config: &TrainingConfig, raw: &Table) -> Result<(CleanReport, ModelData)> {
    let cleaned = clean(raw, &config.cleaning)?;
    info!(
        "Cleaned {} rows into {} ({} features)",
        cleaned.report.rows_in,
        cleaned.report.rows_out,
        cleaned.feature_names.len()
    );
    let data = stratified_split(
        &cleaned.features,
        &cleaned.labels,
        &cleaned.feature_names,
        &config.split,
        config.seed,
    )?;
    Ok((cleaned.report, data))
}

/// Train on an already harmonized table. Nothing is written to disk except the
/// optional processed-split export.
pub fn train_from_table(
    config: &TrainingConfig,
    raw: &Table,
    sources: Vec<SourceReport>,
    trained_at: DateTime<Utc>,
) -> Result<TrainingOutcome> {
    config.validate()?;
    let (cleaning, data) = prepare(config, raw)?;

    let partitions = PartitionSizes {
        train: PartitionSummary::of(&data.y_train),
        test: PartitionSummary::of(&data.y_test),
        cv: PartitionSummary::of(&data.y_cv),
    };
    log_partition("train", &partitions.train);
    log_partition("test", &partitions.test);
    log_partition("cv", &partitions.cv);

    if let Some(dir) = &config.processed_dir {
        export_processed(&data, dir)?;
    }

    let (artifact, evaluation) = train_ensemble(config, &data, trained_at)?;
    let report = TrainingReport {
        version: crate::VERSION.to_string(),
        seed: config.seed,
        config_hash: config_hash(config)?,
        trained_at,
        sources,
        cleaning,
        partitions,
        feature_names: data.feature_names.clone(),
        evaluation,
        bundle: None,
    };
    Ok(TrainingOutcome { artifact, report })
}

/// Save the bundle to the configured output directory and write the report
/// beside it.
pub fn persist(outcome: &mut TrainingOutcome, output_dir: &Path) -> Result<()> {
    let info = save_bundle(&outcome.artifact, output_dir)?;
    outcome.report.bundle = Some(info);
    let json = serde_json::to_string_pretty(&outcome.report)
        .map_err(|e| TrainerError::Training(format!("report serialization failed: {}", e)))?;
    fs::write(output_dir.join(REPORT_FILE), json)?;
    info!("Training report written to {}", output_dir.join(REPORT_FILE).display());
    Ok(())
}

/// Full run: ingest catalogs, train, persist.
pub fn run(config: &TrainingConfig, catalogs: &[CatalogSource]) -> Result<TrainingOutcome> {
    config.validate()?;
    let (raw, sources) = load_catalogs(catalogs)?;
    let mut outcome = train_from_table(config, &raw, sources, Utc::now())?;
    persist(&mut outcome, &config.output_dir)?;
    Ok(outcome)
}

/// Write `X_<part>.csv` and `y_<part>.csv` for every partition.
pub fn export_processed(data: &ModelData, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    let parts: [(&str, &[Vec<f64>], &[Disposition]); 3] = [
        ("train", data.x_train.as_slice(), data.y_train.as_slice()),
        ("test", data.x_test.as_slice(), data.y_test.as_slice()),
        ("cv", data.x_cv.as_slice(), data.y_cv.as_slice()),
    ];
    for (name, rows, labels) in parts {
        write_features(&dir.join(format!("X_{}.csv", name)), &data.feature_names, rows)?;
        write_labels(&dir.join(format!("y_{}.csv", name)), labels)?;
    }
    info!("Processed splits exported to {}", dir.display());
    Ok(())
}

fn csv_error(path: &Path, err: csv::Error) -> TrainerError {
    TrainerError::Dataset(format!("{}: {}", path.display(), err))
}

fn write_features(path: &Path, names: &[String], rows: &[Vec<f64>]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| csv_error(path, e))?;
    writer.write_record(names).map_err(|e| csv_error(path, e))?;
    for row in rows {
        writer
            .write_record(row.iter().map(|v| v.to_string()))
            .map_err(|e| csv_error(path, e))?;
    }
    writer.flush()?;
    Ok(())
}

fn write_labels(path: &Path, labels: &[Disposition]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| csv_error(path, e))?;
    writer
        .write_record([exo_ai_core::standardize::DISPOSITION])
        .map_err(|e| csv_error(path, e))?;
    for label in labels {
        writer
            .write_record([label.label()])
            .map_err(|e| csv_error(path, e))?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_split() -> ModelData {
        ModelData {
            x_train: vec![vec![1.0, 2.0], vec![3.0, 4.0]],
            y_train: vec![Disposition::Confirmed, Disposition::Candidate],
            x_test: vec![vec![5.0, 6.0]],
            y_test: vec![Disposition::FalsePositive],
            x_cv: vec![vec![7.5, 8.0]],
            y_cv: vec![Disposition::Confirmed],
            feature_names: vec!["period".into(), "depth".into()],
        }
    }

    #[test]
    fn export_writes_six_files() {
        let dir = tempfile::tempdir().unwrap();
        export_processed(&tiny_split(), dir.path()).unwrap();
        for part in ["train", "test", "cv"] {
            assert!(dir.path().join(format!("X_{}.csv", part)).exists());
            assert!(dir.path().join(format!("y_{}.csv", part)).exists());
        }
        let x_cv = fs::read_to_string(dir.path().join("X_cv.csv")).unwrap();
        assert_eq!(x_cv, "period,depth\n7.5,8\n");
        let y_train = fs::read_to_string(dir.path().join("y_train.csv")).unwrap();
        assert_eq!(y_train, "disposition\nCONFIRMED\nCANDIDATE\n");
    }

    #[test]
    fn config_hash_tracks_the_seed() {
        let a = TrainingConfig::default();
        let b = TrainingConfig {
            seed: 7,
            ..TrainingConfig::default()
        };
        assert_eq!(config_hash(&a).unwrap(), config_hash(&a).unwrap());
        assert_ne!(config_hash(&a).unwrap(), config_hash(&b).unwrap());
    }
}
