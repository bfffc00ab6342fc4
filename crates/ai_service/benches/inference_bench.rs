use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use exo_ai_core::{Column, EnsembleArtifact, Table};
use exo_ai_service::{InferenceService, ServiceConfig};
use exo_ai_trainer::{train_from_table, GbdtParams, HiddenLayer, HistGbdtParams, MlpParams, TrainingConfig};

const LABELS: [&str; 3] = ["FALSE POSITIVE", "CANDIDATE", "CONFIRMED"];

/// Small ensemble trained on three separable clusters.
fn sample_artifact() -> EnsembleArtifact {
    let rows = 150;
    let class = |i: usize| (i % 3) as f64;
    let column = |name: &str, f: &dyn Fn(usize) -> f64| {
        Column::numeric(name, (0..rows).map(|i| Some(f(i))).collect())
    };
    let table = Table::from_columns(vec![
        column("period", &|i| 3.0 + 12.0 * class(i) + (i % 7) as f64 * 0.3),
        column("duration", &|i| 2.0 + 0.4 * class(i)),
        column("depth", &|i| 700.0 - 200.0 * class(i) + (i % 5) as f64 * 10.0),
        column("planet_radius", &|i| 1.0 + class(i)),
        column("star_radius", &|i| 0.9 + (i % 4) as f64 * 0.05),
        column("teff", &|i| 5500.0 + 100.0 * class(i)),
        column("semi_major_axis", &|i| 0.05 + 0.03 * class(i)),
        Column::text(
            "disposition",
            (0..rows).map(|i| Some(LABELS[i % 3].to_string())).collect(),
        ),
    ])
    .expect("valid table");

    let config = TrainingConfig {
        gbdt: GbdtParams {
            n_estimators: 50,
            max_depth: 4,
            learning_rate: 0.1,
            ..GbdtParams::default()
        },
        hist_gbdt: HistGbdtParams {
            n_estimators: 50,
            max_depth: 4,
            learning_rate: 0.1,
            min_child_samples: 5,
            ..HistGbdtParams::default()
        },
        mlp: MlpParams {
            epochs: 20,
            ..MlpParams::base()
        },
        meta: MlpParams {
            hidden: vec![HiddenLayer::new(16, true, 0.1)],
            epochs: 20,
            ..MlpParams::meta()
        },
        ..TrainingConfig::default()
    };
    train_from_table(&config, &table, Vec::new(), Utc::now())
        .expect("training succeeds")
        .artifact
}

fn bench_inference(c: &mut Criterion) {
    let artifact = sample_artifact();
    let width = artifact.feature_count();
    let service =
        InferenceService::from_artifact(ServiceConfig::default(), artifact).expect("valid bundle");
    let row: Vec<f64> = (0..width).map(|i| 1.0 + i as f64 * 0.25).collect();

    c.bench_function("ensemble_predict_single", |b| {
        b.iter(|| {
            let response = service.predict_single(black_box(&row), Some(false));
            black_box(response)
        });
    });

    let mut group = c.benchmark_group("ensemble_predict_batch");
    for size in [16usize, 256, 1024] {
        let rows = vec![row.clone(); size];
        group.bench_with_input(BenchmarkId::from_parameter(size), &rows, |b, rows| {
            b.iter(|| black_box(service.predict_batch(black_box(rows), Some(false))));
        });
    }
    group.finish();
}

criterion_group!(inference_benches, bench_inference);
criterion_main!(inference_benches);
