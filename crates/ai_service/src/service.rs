//! Inference service
//!
//! Constructed once from a complete, verified bundle and then shared by
//! reference between request handlers. Every request pins the current bundle
//! for its whole duration, so a concurrent `swap_bundle` or `reload` never mixes
//! components of two bundles inside one prediction.

use crate::config::ServiceConfig;
use crate::errors::{Result, ServiceError};
use crate::metrics::ServiceMetrics;
use crate::types::{BatchPredictionResponse, PredictionResponse, ServiceStatus};
use chrono::{DateTime, Utc};
use exo_ai_core::serde_canon::hash_canonical_hex;
use exo_ai_core::{load_bundle_with_info, BundleInfo, Disposition, EnsembleArtifact};
use parking_lot::RwLock;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// A bundle together with what identifies it
#[derive(Debug)]
struct LoadedBundle {
    artifact: Arc<EnsembleArtifact>,
    generation: u64,
    fingerprint: String,
    loaded_at: DateTime<Utc>,
}

/// Stacked ensemble inference with atomic bundle replacement
#[derive(Debug)]
pub struct InferenceService {
    config: ServiceConfig,
    bundle: RwLock<Arc<LoadedBundle>>,
    generations: AtomicU64,
    metrics: ServiceMetrics,
}

fn bundle_fingerprint(info: &BundleInfo) -> String {
    let mut hasher = blake3::Hasher::new();
    for (name, hash) in &info.file_hashes {
        hasher.update(name.as_bytes());
        hasher.update(hash.as_bytes());
    }
    hex::encode(hasher.finalize().as_bytes())
}

/// Load and verify the bundle at `dir`, returning it with its fingerprint.
fn load_from_dir(dir: &Path) -> Result<(EnsembleArtifact, String)> {
    let (artifact, info) = load_bundle_with_info(dir).map_err(ServiceError::startup)?;
    Ok((artifact, bundle_fingerprint(&info)))
}

impl InferenceService {
    /// Bring the service up from the configured bundle directory. Fails unless
    /// every artifact file is present and verified.
    #[instrument(skip_all, fields(dir = %config.artifact_dir.display()))]
    pub fn load(config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        let (artifact, fingerprint) = load_from_dir(&config.artifact_dir)?;
        Ok(Self::assemble(config, artifact, fingerprint))
    }

    /// Serve an artifact that is already in memory
    pub fn from_artifact(config: ServiceConfig, artifact: EnsembleArtifact) -> Result<Self> {
        config.validate()?;
        artifact.validate().map_err(ServiceError::startup)?;
        let fingerprint = hash_canonical_hex(&artifact)?;
        Ok(Self::assemble(config, artifact, fingerprint))
    }

    fn assemble(config: ServiceConfig, artifact: EnsembleArtifact, fingerprint: String) -> Self {
        info!(
            "Inference service ready: {} features, trained {}, fingerprint {}",
            artifact.feature_count(),
            artifact.metadata.trained_at,
            &fingerprint[..12.min(fingerprint.len())]
        );
        let bundle = LoadedBundle {
            artifact: Arc::new(artifact),
            generation: 1,
            fingerprint,
            loaded_at: Utc::now(),
        };
        Self {
            config,
            bundle: RwLock::new(Arc::new(bundle)),
            generations: AtomicU64::new(1),
            metrics: ServiceMetrics::new(),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// The artifact currently being served
    pub fn artifact(&self) -> Arc<EnsembleArtifact> {
        Arc::clone(&self.current().artifact)
    }

    fn current(&self) -> Arc<LoadedBundle> {
        Arc::clone(&self.bundle.read())
    }

    fn install(&self, artifact: EnsembleArtifact, fingerprint: String) -> u64 {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let bundle = Arc::new(LoadedBundle {
            artifact: Arc::new(artifact),
            generation,
            fingerprint,
            loaded_at: Utc::now(),
        });
        *self.bundle.write() = bundle;
        info!("Bundle generation {} installed", generation);
        generation
    }

    /// Replace the served bundle with `artifact`. The previous bundle keeps
    /// serving until the new one has passed validation.
    pub fn swap_bundle(&self, artifact: EnsembleArtifact) -> Result<u64> {
        artifact.validate().map_err(ServiceError::startup)?;
        let fingerprint = hash_canonical_hex(&artifact)?;
        Ok(self.install(artifact, fingerprint))
    }

    /// Re-read the bundle directory. On failure the current bundle stays in place.
    pub fn reload(&self) -> Result<u64> {
        match load_from_dir(&self.config.artifact_dir) {
            Ok((artifact, fingerprint)) => Ok(self.install(artifact, fingerprint)),
            Err(err) => {
                warn!("Reload failed, keeping generation {}: {}", self.current().generation, err);
                Err(err)
            }
        }
    }

    pub fn status(&self) -> ServiceStatus {
        let bundle = self.current();
        let metadata = &bundle.artifact.metadata;
        ServiceStatus {
            version: crate::VERSION.to_string(),
            schema_version: metadata.schema_version.clone(),
            feature_count: metadata.feature_count,
            feature_names: metadata.feature_names.clone(),
            trained_at: metadata.trained_at,
            generation: bundle.generation,
            fingerprint: bundle.fingerprint.clone(),
            loaded_at: bundle.loaded_at,
            metrics: self.metrics.snapshot(),
        }
    }

    /// Classify one raw feature vector. `include_meta` falls back to the
    /// configured default.
    pub fn predict_single(
        &self,
        features: &[f64],
        include_meta: Option<bool>,
    ) -> Result<PredictionResponse> {
        let mut batch = self.predict_batch(&[features.to_vec()], include_meta)?;
        batch
            .predictions
            .pop()
            .ok_or_else(|| ServiceError::Internal("no prediction produced".to_string()))
    }

    /// Classify raw feature rows against one pinned bundle.
    pub fn predict_batch(
        &self,
        rows: &[Vec<f64>],
        include_meta: Option<bool>,
    ) -> Result<BatchPredictionResponse> {
        let bundle = self.current();
        self.observe(rows.len(), || self.predict_with(&bundle, rows, include_meta))
    }

    /// Classify every row of a feature CSV. The header must list the bundle's
    /// feature names in order.
    pub fn predict_csv(&self, path: &Path, include_meta: Option<bool>) -> Result<BatchPredictionResponse> {
        let file = std::fs::File::open(path).map_err(|e| {
            ServiceError::InvalidRequest(format!("cannot open {}: {e}", path.display()))
        })?;
        let (_, rows) = self.read_csv(file)?;
        self.predict_batch(&rows, include_meta)
    }

    /// Parse a feature CSV against the current bundle's feature names.
    pub fn read_csv<R: Read>(&self, reader: R) -> Result<(Vec<String>, Vec<Vec<f64>>)> {
        let bundle = self.current();
        let rows = read_feature_csv(reader, &bundle.artifact.metadata.feature_names)?;
        Ok((bundle.artifact.metadata.feature_names.clone(), rows))
    }

    fn predict_with(
        &self,
        bundle: &LoadedBundle,
        rows: &[Vec<f64>],
        include_meta: Option<bool>,
    ) -> Result<BatchPredictionResponse> {
        if rows.is_empty() {
            return Err(ServiceError::InvalidRequest("empty batch".to_string()));
        }
        if rows.len() > self.config.max_batch_size {
            return Err(ServiceError::InvalidRequest(format!(
                "batch of {} rows exceeds the limit of {}",
                rows.len(),
                self.config.max_batch_size
            )));
        }
        let include_meta = include_meta.unwrap_or(self.config.include_meta);
        let predictions = bundle.artifact.predict_batch(rows, include_meta)?;
        Ok(BatchPredictionResponse {
            predictions: predictions
                .into_iter()
                .map(PredictionResponse::from_prediction)
                .collect(),
            generation: bundle.generation,
        })
    }

    fn observe<T>(&self, rows: usize, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let started = Instant::now();
        let result = f();
        let elapsed = started.elapsed();
        match &result {
            Ok(_) => {
                self.metrics.record_success(rows, elapsed);
                debug!("Predicted {} rows in {:?}", rows, elapsed);
            }
            Err(err) => {
                self.metrics.record_failure(err.is_client_error(), elapsed);
                if err.is_client_error() {
                    debug!("Rejected request: {}", err);
                } else {
                    warn!("Prediction failed: {}", err);
                }
            }
        }
        result
    }
}

/// Read a feature CSV whose header must equal `expected` exactly.
pub fn read_feature_csv<R: Read>(reader: R, expected: &[String]) -> Result<Vec<Vec<f64>>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let header: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();
    if header.len() != expected.len() {
        return Err(ServiceError::InvalidRequest(format!(
            "Expected {} features, but got {}",
            expected.len(),
            header.len()
        )));
    }
    if let Some((i, (got, want))) = header
        .iter()
        .zip(expected)
        .enumerate()
        .find(|(_, (got, want))| got != want)
    {
        return Err(ServiceError::InvalidRequest(format!(
            "column {i} is {got:?}, expected {want:?}"
        )));
    }

    let mut rows = Vec::new();
    for (r, record) in csv_reader.records().enumerate() {
        let record = record?;
        let row = record
            .iter()
            .enumerate()
            .map(|(c, cell)| {
                cell.parse::<f64>().map_err(|_| {
                    ServiceError::InvalidRequest(format!(
                        "row {r}, column {}: {cell:?} is not a number",
                        expected[c]
                    ))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        rows.push(row);
    }
    Ok(rows)
}

/// Write `prediction, confidence, prob_<CLASS>...`, optionally preceded by the
/// input feature columns.
pub fn write_predictions_csv<W: Write>(
    writer: W,
    response: &BatchPredictionResponse,
    inputs: Option<(&[String], &[Vec<f64>])>,
) -> Result<()> {
    if let Some((_, rows)) = inputs {
        if rows.len() != response.len() {
            return Err(ServiceError::Internal(format!(
                "{} input rows for {} predictions",
                rows.len(),
                response.len()
            )));
        }
    }
    let mut csv_writer = csv::Writer::from_writer(writer);

    let mut header: Vec<String> = inputs
        .map(|(names, _)| names.to_vec())
        .unwrap_or_default();
    header.push("prediction".to_string());
    header.push("confidence".to_string());
    header.extend(
        Disposition::ALL
            .iter()
            .map(|class| format!("prob_{}", class.class_name())),
    );
    csv_writer.write_record(&header).map_err(write_error)?;

    for (i, prediction) in response.predictions.iter().enumerate() {
        let mut record: Vec<String> = inputs
            .map(|(_, rows)| rows[i].iter().map(f64::to_string).collect())
            .unwrap_or_default();
        record.push(prediction.prediction.class_name().to_string());
        record.push(prediction.confidence.to_string());
        record.extend(
            Disposition::ALL
                .iter()
                .map(|&class| prediction.probability(class).to_string()),
        );
        csv_writer.write_record(&record).map_err(write_error)?;
    }
    csv_writer
        .flush()
        .map_err(|e| ServiceError::Internal(format!("failed to write predictions: {e}")))?;
    Ok(())
}

fn write_error(err: csv::Error) -> ServiceError {
    ServiceError::Internal(format!("failed to write predictions: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["period".to_string(), "depth".to_string()]
    }

    #[test]
    fn csv_header_must_match_in_order() {
        let ok = read_feature_csv("period,depth\n1.5,200\n2,300\n".as_bytes(), &names()).unwrap();
        assert_eq!(ok, vec![vec![1.5, 200.0], vec![2.0, 300.0]]);

        let swapped = read_feature_csv("depth,period\n1,2\n".as_bytes(), &names()).unwrap_err();
        assert!(swapped.is_client_error());

        let short = read_feature_csv("period\n1\n".as_bytes(), &names()).unwrap_err();
        assert!(short.to_string().contains("Expected 2 features, but got 1"));
    }

    #[test]
    fn non_numeric_cells_are_rejected() {
        let err = read_feature_csv("period,depth\n1,abc\n".as_bytes(), &names()).unwrap_err();
        assert!(err.is_client_error());
        assert!(err.to_string().contains("depth"));
    }

    #[test]
    fn predictions_csv_layout() {
        let prediction = PredictionResponse {
            prediction: Disposition::Confirmed,
            confidence: 0.75,
            probabilities: [
                ("FALSE_POSITIVE".to_string(), 0.05),
                ("CANDIDATE".to_string(), 0.2),
                ("CONFIRMED".to_string(), 0.75),
            ]
            .into_iter()
            .collect(),
            meta_features: None,
        };
        let response = BatchPredictionResponse {
            predictions: vec![prediction],
            generation: 1,
        };
        let rows = vec![vec![1.5, 200.0]];

        let mut out = Vec::new();
        write_predictions_csv(&mut out, &response, Some((&names(), &rows))).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "period,depth,prediction,confidence,prob_FALSE_POSITIVE,prob_CANDIDATE,prob_CONFIRMED\n\
             1.5,200,CONFIRMED,0.75,0.05,0.2,0.75\n"
        );

        let mut bare = Vec::new();
        write_predictions_csv(&mut bare, &response, None).unwrap();
        assert!(String::from_utf8(bare).unwrap().starts_with("prediction,confidence,"));
    }
}
