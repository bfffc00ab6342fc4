//! Exoplanet disposition ensemble core
//!
//! Everything needed to turn a labeled catalog table into model input and to replay
//! a trained stacked ensemble on new rows.
//!
//! Modules:
//! - `table`: Column-oriented table with explicit missing values and CSV I/O
//! - `standardize`: Harmonization of catalog columns onto the canonical vocabulary
//! - `feature_engineering`: Derived ratios, log transforms and interactions
//! - `cleaning`: Label filtering, sanitization, imputation, feature matrix
//! - `split`: Seeded two-stage stratified train/test/cv split
//! - `scaler`: Zero-mean, unit-variance scaling
//! - `gbdt`, `mlp`: Inference forms of the tree and network classifiers
//! - `meta`: The one meta-feature generator shared by training and serving
//! - `ensemble`: The immutable artifact and its prediction chain
//! - `artifact`: Bundle persistence with hash verification
//! - `metrics`: Confusion matrix and classification report

pub mod artifact;
pub mod cleaning;
pub mod deterministic;
pub mod ensemble;
pub mod errors;
pub mod feature_engineering;
pub mod gbdt;
pub mod meta;
pub mod metrics;
pub mod mlp;
pub mod model;
pub mod scaler;
pub mod serde_canon;
pub mod split;
pub mod standardize;
pub mod table;
pub mod types;

#[cfg(test)]
mod testing;

pub use artifact::{
    load_bundle, load_bundle_with_info, missing_files, save_bundle, BundleInfo, ARTIFACT_FILES,
};
pub use cleaning::{clean, CleanReport, CleanedDataset, CleaningConfig, ImputationStrategy};
pub use deterministic::LcgRng;
pub use ensemble::{EnsembleArtifact, EnsembleMetadata, EnsemblePrediction, ARTIFACT_SCHEMA_VERSION};
pub use errors::{CoreError, Result};
pub use gbdt::{BoostingKind, GbdtClassifier};
pub use meta::{generate_meta_features, meta_feature_names, BaseLearners, LEARNER_ORDER};
pub use metrics::{ClassificationReport, ConfusionMatrix};
pub use mlp::MlpClassifier;
pub use model::ProbabilisticClassifier;
pub use scaler::StandardScaler;
pub use split::{stratified_split, ModelData, SplitRatios};
pub use table::{Column, ColumnData, Table};
pub use types::{class_names, Disposition, Source, N_CLASSES};

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
