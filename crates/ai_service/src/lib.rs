//! Exoplanet disposition inference service
//!
//! Serves a trained stacked ensemble bundle:
//! - Refuses to start from an incomplete or corrupt bundle
//! - Validates every request's width before any model runs
//! - Replays scaler, base learners, meta-features and meta-model exactly as trained
//! - Swaps or reloads the whole bundle atomically

pub mod config;
pub mod errors;
pub mod metrics;
pub mod service;
pub mod types;

pub use config::ServiceConfig;
pub use errors::{Result, ServiceError};
pub use metrics::{MetricsSnapshot, ServiceMetrics};
pub use service::{read_feature_csv, write_predictions_csv, InferenceService};
pub use types::{BatchPredictionResponse, PredictionResponse, ServiceStatus};

/// Service version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
