//! Inference service against a bundle trained on synthetic catalog rows.

use chrono::{TimeZone, Utc};
use exo_ai_core::{save_bundle, Column, Disposition, EnsembleArtifact, SplitRatios, Table};
use exo_ai_service::{InferenceService, ServiceConfig, ServiceError};
use exo_ai_trainer::{
    train_from_table, GbdtParams, HiddenLayer, HistGbdtParams, MlpParams, TrainingConfig,
};
use proptest::prelude::*;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

const LABELS: [&str; 3] = ["FALSE POSITIVE", "CANDIDATE", "CONFIRMED"];

fn synthetic_table(rows: usize) -> Table {
    let mut columns: Vec<(&str, Vec<Option<f64>>)> = vec![
        ("period", Vec::new()),
        ("duration", Vec::new()),
        ("depth", Vec::new()),
        ("planet_radius", Vec::new()),
        ("star_radius", Vec::new()),
        ("teff", Vec::new()),
        ("semi_major_axis", Vec::new()),
    ];
    let mut labels = Vec::new();
    for i in 0..rows {
        let class = i % 3;
        let c = class as f64;
        let jitter = ((i * 29) % 13) as f64 / 13.0;
        let values = [
            4.0 + 15.0 * c + 2.0 * jitter,
            1.5 + 0.6 * c + 0.1 * jitter,
            900.0 - 250.0 * c + 40.0 * jitter,
            1.2 + 1.1 * c + 0.2 * jitter,
            0.8 + 0.2 * jitter,
            5400.0 + 150.0 * c + 80.0 * jitter,
            0.04 + 0.04 * c + 0.01 * jitter,
        ];
        for (column, value) in columns.iter_mut().zip(values) {
            column.1.push(Some(value));
        }
        labels.push(Some(LABELS[class].to_string()));
    }
    let mut out: Vec<Column> = columns
        .into_iter()
        .map(|(name, values)| Column::numeric(name, values))
        .collect();
    out.push(Column::text("disposition", labels));
    Table::from_columns(out).unwrap()
}

fn small_config(seed: u64) -> TrainingConfig {
    TrainingConfig {
        seed,
        split: SplitRatios {
            train: 0.5,
            test: 0.25,
            cv: 0.25,
        },
        gbdt: GbdtParams {
            n_estimators: 10,
            max_depth: 3,
            learning_rate: 0.3,
            early_stopping_rounds: 4,
            ..GbdtParams::default()
        },
        hist_gbdt: HistGbdtParams {
            n_estimators: 10,
            max_depth: 3,
            learning_rate: 0.3,
            early_stopping_rounds: 4,
            num_leaves: 7,
            max_bin: 16,
            min_child_samples: 3,
            ..HistGbdtParams::default()
        },
        mlp: MlpParams {
            hidden: vec![HiddenLayer::new(8, true, 0.1)],
            batch_size: 16,
            epochs: 10,
            patience: 3,
            ..MlpParams::base()
        },
        meta: MlpParams {
            hidden: vec![HiddenLayer::new(6, false, 0.0)],
            batch_size: 16,
            epochs: 10,
            patience: 3,
            ..MlpParams::meta()
        },
        ..TrainingConfig::default()
    }
}

fn train(seed: u64) -> EnsembleArtifact {
    let trained_at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    train_from_table(&small_config(seed), &synthetic_table(90), Vec::new(), trained_at)
        .unwrap()
        .artifact
}

fn artifact() -> &'static EnsembleArtifact {
    static ARTIFACT: OnceLock<EnsembleArtifact> = OnceLock::new();
    ARTIFACT.get_or_init(|| train(11))
}

fn bundle_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    save_bundle(artifact(), &dir.path().join("bundle")).unwrap();
    dir
}

fn config_for(dir: &Path) -> ServiceConfig {
    ServiceConfig {
        artifact_dir: dir.join("bundle"),
        ..ServiceConfig::default()
    }
}

fn sample_row() -> Vec<f64> {
    let width = artifact().feature_count();
    (0..width).map(|i| 0.5 + i as f64 * 0.1).collect()
}

#[test]
fn loads_a_complete_bundle_and_predicts() {
    let dir = bundle_dir();
    let service = InferenceService::load(config_for(dir.path())).unwrap();

    let response = service.predict_single(&sample_row(), Some(true)).unwrap();
    let total: f64 = response.probabilities.values().sum();
    assert!((total - 1.0).abs() < 1e-9);
    let max = response.probabilities.values().cloned().fold(f64::MIN, f64::max);
    assert_eq!(response.confidence, max);
    assert_eq!(response.probability(response.prediction), max);

    let meta = response.meta_features.unwrap();
    assert_eq!(meta.len(), 9);
    assert!(meta.contains_key("gbdt_CONFIRMED"));
    assert!(meta.contains_key("mlp_FALSE_POSITIVE"));

    let status = service.status();
    assert_eq!(status.generation, 1);
    assert_eq!(status.feature_count, artifact().feature_count());
    assert_eq!(status.metrics.successful_requests, 1);
}

#[test]
fn one_fewer_feature_is_rejected() {
    let service = InferenceService::from_artifact(ServiceConfig::default(), artifact().clone()).unwrap();
    let mut row = sample_row();
    row.pop();

    let err = service.predict_single(&row, None).unwrap_err();
    assert!(err.is_client_error(), "{err}");
    let expected = format!(
        "Expected {} features, but got {}",
        artifact().feature_count(),
        artifact().feature_count() - 1
    );
    assert!(err.to_string().contains(&expected), "{err}");

    // still serving afterwards
    assert!(service.predict_single(&sample_row(), None).is_ok());
    let metrics = service.status().metrics;
    assert_eq!(metrics.rejected_requests, 1);
    assert_eq!(metrics.successful_requests, 1);
}

#[test]
fn identical_requests_get_identical_answers() {
    let service = InferenceService::from_artifact(ServiceConfig::default(), artifact().clone()).unwrap();
    let first = service.predict_single(&sample_row(), None).unwrap();
    let second = service.predict_single(&sample_row(), None).unwrap();
    assert_eq!(first, second);
}

#[test]
fn missing_file_blocks_startup() {
    let dir = bundle_dir();
    fs::remove_file(dir.path().join("bundle").join("meta_model.json")).unwrap();

    let err = InferenceService::load(config_for(dir.path())).unwrap_err();
    assert!(matches!(err, ServiceError::Startup(_)));
    assert!(err.to_string().contains("meta_model.json"));
}

#[test]
fn tampered_file_blocks_startup() {
    let dir = bundle_dir();
    let path = dir.path().join("bundle").join("feature_scaler.json");
    let mut bytes = fs::read(&path).unwrap();
    bytes.push(b' ');
    fs::write(&path, bytes).unwrap();

    let err = InferenceService::load(config_for(dir.path())).unwrap_err();
    assert!(matches!(err, ServiceError::Startup(_)));
}

#[test]
fn empty_and_oversized_batches_are_rejected() {
    let config = ServiceConfig {
        max_batch_size: 2,
        ..ServiceConfig::default()
    };
    let service = InferenceService::from_artifact(config, artifact().clone()).unwrap();
    assert!(service.predict_batch(&[], None).unwrap_err().is_client_error());
    let rows = vec![sample_row(); 3];
    assert!(service.predict_batch(&rows, None).unwrap_err().is_client_error());
    assert_eq!(service.predict_batch(&rows[..2], None).unwrap().len(), 2);
}

#[test]
fn non_finite_input_is_a_client_error() {
    let service = InferenceService::from_artifact(ServiceConfig::default(), artifact().clone()).unwrap();
    let mut row = sample_row();
    row[0] = f64::NAN;
    assert!(service.predict_single(&row, None).unwrap_err().is_client_error());
}

#[test]
fn swap_and_reload_replace_the_whole_bundle() {
    let dir = bundle_dir();
    let service = InferenceService::load(config_for(dir.path())).unwrap();
    let before = service.status();

    let generation = service.swap_bundle(train(12)).unwrap();
    assert_eq!(generation, 2);
    let swapped = service.status();
    assert_eq!(swapped.generation, 2);
    assert_ne!(swapped.fingerprint, before.fingerprint);
    assert!(service.predict_single(&sample_row(), None).is_ok());

    // reload brings the on-disk bundle back
    assert_eq!(service.reload().unwrap(), 3);
    assert_eq!(service.status().fingerprint, before.fingerprint);

    // a broken directory leaves the served bundle untouched
    fs::remove_file(dir.path().join("bundle").join("gbdt_model.json")).unwrap();
    assert!(service.reload().is_err());
    assert_eq!(service.status().generation, 3);
    assert!(service.predict_single(&sample_row(), None).is_ok());
}

#[test]
fn invalid_swap_is_refused() {
    let service = InferenceService::from_artifact(ServiceConfig::default(), artifact().clone()).unwrap();
    let mut broken = artifact().clone();
    broken.metadata.feature_names.pop();
    assert!(matches!(
        service.swap_bundle(broken).unwrap_err(),
        ServiceError::Startup(_)
    ));
    assert_eq!(service.status().generation, 1);
}

#[test]
fn csv_predictions_round_trip() {
    let dir = bundle_dir();
    let service = InferenceService::load(config_for(dir.path())).unwrap();
    let names = service.status().feature_names;

    let input = dir.path().join("input.csv");
    let mut text = names.join(",");
    text.push('\n');
    for _ in 0..3 {
        let row: Vec<String> = sample_row().iter().map(f64::to_string).collect();
        text.push_str(&row.join(","));
        text.push('\n');
    }
    fs::write(&input, text).unwrap();

    let response = service.predict_csv(&input, None).unwrap();
    assert_eq!(response.len(), 3);
    assert_eq!(response.predictions[0], response.predictions[2]);

    let mut out = Vec::new();
    exo_ai_service::write_predictions_csv(&mut out, &response, None).unwrap();
    let written = String::from_utf8(out).unwrap();
    assert_eq!(written.lines().count(), 4);
    assert!(written.starts_with("prediction,confidence,prob_FALSE_POSITIVE"));

    let wrong = dir.path().join("wrong.csv");
    fs::write(&wrong, "a,b\n1,2\n").unwrap();
    assert!(service.predict_csv(&wrong, None).unwrap_err().is_client_error());
}

#[test]
fn concurrent_requests_during_swaps() {
    let service = InferenceService::from_artifact(ServiceConfig::default(), artifact().clone()).unwrap();
    let replacement = artifact().clone();
    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..20 {
                    let response = service.predict_batch(&[sample_row()], None).unwrap();
                    assert_eq!(response.len(), 1);
                    assert!(Disposition::ALL.contains(&response.predictions[0].prediction));
                }
            });
        }
        scope.spawn(|| {
            for _ in 0..5 {
                service.swap_bundle(replacement.clone()).unwrap();
            }
        });
    });
    assert_eq!(service.status().generation, 6);
    assert_eq!(service.status().metrics.successful_requests, 80);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn wrong_width_is_always_rejected(width in 0usize..64, value in -1e3f64..1e3) {
        let expected = artifact().feature_count();
        prop_assume!(width != expected);
        let service = InferenceService::from_artifact(ServiceConfig::default(), artifact().clone()).unwrap();
        let err = service.predict_single(&vec![value; width], None).unwrap_err();
        prop_assert!(err.is_client_error());
    }
}
