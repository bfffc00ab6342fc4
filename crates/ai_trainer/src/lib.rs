//! Exoplanet disposition ensemble trainer
//!
//! Reads the mission catalogs, fits the three base learners and the meta network,
//! and writes a self-describing artifact bundle.
//!
//! Modules:
//! - `sources`: Catalog ingestion and mission tagging
//! - `config`: Training configuration (TOML and `EXO_*` overrides)
//! - `boosting`: Multiclass softmax boosting with early stopping
//! - `cart`: Exact-greedy depth-wise tree growth
//! - `histogram`: Quantile binning and leaf-wise tree growth
//! - `mlp`: Feed-forward network training (Adam, batch norm, dropout)
//! - `stacking`: Base learners, meta-features and the meta-learner
//! - `pipeline`: Ingest, clean, split, train, persist

pub mod boosting;
pub mod cart;
pub mod config;
pub mod deterministic;
pub mod errors;
pub mod histogram;
pub mod mlp;
pub mod pipeline;
pub mod sources;
pub mod stacking;

pub use boosting::{boost, TreeGrower};
pub use cart::{CartBuilder, TreeConfig};
pub use config::{GbdtParams, HiddenLayer, HistGbdtParams, LrSchedule, MlpParams, TrainingConfig};
pub use deterministic::{SplitCandidate, SplitTieBreaker};
pub use errors::{Result, TrainerError};
pub use histogram::{BinMapper, HistogramBuilder, HistogramConfig};
pub use mlp::{train_mlp, MlpHistory};
pub use pipeline::{
    export_processed, persist, prepare, run, train_from_table, PartitionSizes, PartitionSummary,
    TrainingOutcome, TrainingReport, REPORT_FILE,
};
pub use sources::{load_catalog, load_catalogs, CatalogSource, SourceReport};
pub use stacking::{train_ensemble, EnsembleEvaluation, LearnerDiagnostics};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
