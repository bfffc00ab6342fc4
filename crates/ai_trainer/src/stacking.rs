//! Stacked ensemble training
//!
//! Stage order is fixed by data dependencies: the scaler is fit on the train
//! partition, the three base learners are fit on scaled train rows and early-stop
//! on scaled cv rows, their probabilities become meta-features through the shared
//! generator, and the meta network is fit on train meta-features with cv
//! meta-features for early stopping. The finished artifact is then scored on the
//! test partition through its own inference path.

use crate::boosting::boost;
use crate::cart::{CartBuilder, TreeConfig};
use crate::config::TrainingConfig;
use crate::deterministic::mix_seed;
use crate::errors::Result;
use crate::histogram::{BinMapper, HistogramBuilder, HistogramConfig};
use crate::mlp::{train_mlp, MlpHistory};
use chrono::{DateTime, Utc};
use exo_ai_core::metrics::{accuracy_score, log_loss};
use exo_ai_core::model::argmax;
use exo_ai_core::{
    generate_meta_features, BaseLearners, BoostingKind, ClassificationReport, ConfusionMatrix,
    Disposition, EnsembleArtifact, EnsembleMetadata, ModelData, ProbabilisticClassifier,
    StandardScaler,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

/// Seed streams of the individual learners
const GBDT_STREAM: u64 = 1;
const HIST_GBDT_STREAM: u64 = 2;
const MLP_STREAM: u64 = 3;
const META_STREAM: u64 = 4;

/// Fit quality of one learner on the train and cv partitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerDiagnostics {
    pub name: String,
    pub train_accuracy: f64,
    pub cv_accuracy: f64,
    pub train_log_loss: f64,
    pub cv_log_loss: f64,
    /// Boosting round kept by early stopping
    pub best_iteration: Option<usize>,
    /// Network epochs run and the epoch kept
    pub epochs_run: Option<usize>,
    pub best_epoch: Option<usize>,
}

/// Headline metrics of the trained ensemble on the test partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleEvaluation {
    pub learners: Vec<LearnerDiagnostics>,
    pub meta_learner: LearnerDiagnostics,
    pub test_accuracy: f64,
    pub test_log_loss: f64,
    pub classification_report: ClassificationReport,
    pub confusion_matrix: ConfusionMatrix,
}

fn to_labels(probabilities: &[Vec<f64>]) -> Result<Vec<Disposition>> {
    let labels = probabilities
        .iter()
        .map(|p| Disposition::from_index(argmax(p)))
        .collect::<exo_ai_core::Result<Vec<_>>>()?;
    Ok(labels)
}

fn diagnose(
    name: &str,
    learner: &dyn ProbabilisticClassifier,
    train: (&[Vec<f64>], &[Disposition]),
    cv: (&[Vec<f64>], &[Disposition]),
) -> Result<LearnerDiagnostics> {
    let train_proba = learner.predict_proba(train.0)?;
    let cv_proba = learner.predict_proba(cv.0)?;
    let diagnostics = LearnerDiagnostics {
        name: name.to_string(),
        train_accuracy: accuracy_score(train.1, &to_labels(&train_proba)?),
        cv_accuracy: accuracy_score(cv.1, &to_labels(&cv_proba)?),
        train_log_loss: log_loss(train.1, &train_proba),
        cv_log_loss: log_loss(cv.1, &cv_proba),
        best_iteration: None,
        epochs_run: None,
        best_epoch: None,
    };
    info!(
        "{} train accuracy {:.4}, cv accuracy {:.4}",
        name, diagnostics.train_accuracy, diagnostics.cv_accuracy
    );
    Ok(diagnostics)
}

fn with_history(mut diagnostics: LearnerDiagnostics, history: &MlpHistory) -> LearnerDiagnostics {
    diagnostics.epochs_run = Some(history.epochs_run);
    diagnostics.best_epoch = Some(history.best_epoch);
    diagnostics
}

/// Train the full two-layer ensemble on one split.
#[instrument(skip_all, fields(train = data.y_train.len(), cv = data.y_cv.len(), test = data.y_test.len()))]
pub fn train_ensemble(
    config: &TrainingConfig,
    data: &ModelData,
    trained_at: DateTime<Utc>,
) -> Result<(EnsembleArtifact, EnsembleEvaluation)> {
    info!("Scaling {} features", data.n_features());
    let scaler = StandardScaler::fit(&data.x_train)?;
    let x_train = scaler.transform(&data.x_train)?;
    let x_cv = scaler.transform(&data.x_cv)?;
    let train = (x_train.as_slice(), data.y_train.as_slice());
    let cv = (x_cv.as_slice(), data.y_cv.as_slice());

    info!("Training exact-greedy gradient boosting");
    let params = &config.gbdt;
    let cart = CartBuilder::new(
        &x_train,
        TreeConfig {
            max_depth: params.max_depth,
            min_child_weight: params.min_child_weight,
            reg_lambda: params.reg_lambda,
            learning_rate: params.learning_rate,
        },
    );
    let gradient_boosted = boost(
        BoostingKind::Exact,
        &cart,
        params,
        &x_train,
        &data.y_train,
        &x_cv,
        &data.y_cv,
        mix_seed(config.seed, GBDT_STREAM),
    )?;

    info!("Training histogram gradient boosting");
    let hist = &config.hist_gbdt;
    let mapper = BinMapper::fit(&x_train, hist.max_bin);
    let binned = mapper.transform(&x_train);
    let histogram = HistogramBuilder::new(
        &mapper,
        &binned,
        HistogramConfig {
            max_depth: hist.max_depth,
            num_leaves: hist.num_leaves,
            min_child_samples: hist.min_child_samples,
            min_child_weight: hist.min_child_weight,
            reg_lambda: hist.reg_lambda,
            learning_rate: hist.learning_rate,
        },
    );
    let histogram_boosted = boost(
        BoostingKind::Histogram,
        &histogram,
        &hist.boosting(),
        &x_train,
        &data.y_train,
        &x_cv,
        &data.y_cv,
        mix_seed(config.seed, HIST_GBDT_STREAM),
    )?;

    info!("Training feed-forward network");
    let (neural, mlp_history) = train_mlp(
        "mlp",
        &config.mlp,
        &x_train,
        &data.y_train,
        &x_cv,
        &data.y_cv,
        mix_seed(config.seed, MLP_STREAM),
    )?;

    let base = BaseLearners {
        gradient_boosted,
        histogram_boosted,
        neural,
    };
    base.validate(data.n_features())?;

    let mut learners = Vec::with_capacity(3);
    for (name, learner) in base.ordered() {
        learners.push(diagnose(name, learner, train, cv)?);
    }
    learners[0].best_iteration = base.gradient_boosted.best_iteration;
    learners[1].best_iteration = base.histogram_boosted.best_iteration;
    learners[2] = with_history(learners[2].clone(), &mlp_history);

    let meta_train = generate_meta_features(&base, &x_train)?;
    let meta_cv = generate_meta_features(&base, &x_cv)?;
    info!(
        "Meta-features: {} train rows, {} cv rows, {} columns",
        meta_train.len(),
        meta_cv.len(),
        meta_train.first().map_or(0, Vec::len)
    );

    info!("Training meta-model");
    let (meta_model, meta_history) = train_mlp(
        "meta",
        &config.meta,
        &meta_train,
        &data.y_train,
        &meta_cv,
        &data.y_cv,
        mix_seed(config.seed, META_STREAM),
    )?;
    let meta_learner = with_history(
        diagnose(
            "meta",
            &meta_model,
            (&meta_train, &data.y_train),
            (&meta_cv, &data.y_cv),
        )?,
        &meta_history,
    );

    let artifact = EnsembleArtifact {
        scaler,
        base,
        meta_model,
        metadata: EnsembleMetadata::new(data.feature_names.clone(), trained_at),
    };
    artifact.validate()?;

    let evaluation = evaluate(&artifact, data, learners, meta_learner)?;
    Ok((artifact, evaluation))
}

/// Score the artifact on the test partition through the serving path.
fn evaluate(
    artifact: &EnsembleArtifact,
    data: &ModelData,
    learners: Vec<LearnerDiagnostics>,
    meta_learner: LearnerDiagnostics,
) -> Result<EnsembleEvaluation> {
    let predictions = artifact.predict_batch(&data.x_test, false)?;
    let predicted: Vec<Disposition> = predictions.iter().map(|p| p.label).collect();
    let probabilities: Vec<Vec<f64>> = predictions.into_iter().map(|p| p.probabilities).collect();

    let confusion_matrix = ConfusionMatrix::from_predictions(&data.y_test, &predicted);
    let classification_report = ClassificationReport::from_confusion(&confusion_matrix);
    let test_log_loss = log_loss(&data.y_test, &probabilities);

    info!(
        "Test accuracy {:.4} ({} rows)",
        classification_report.accuracy,
        data.y_test.len()
    );
    for line in classification_report.to_string().lines() {
        info!("{}", line);
    }
    info!("Confusion matrix: {:?}", confusion_matrix.rows());

    Ok(EnsembleEvaluation {
        learners,
        meta_learner,
        test_accuracy: classification_report.accuracy,
        test_log_loss,
        classification_report,
        confusion_matrix,
    })
}
