//! Error types for the AI Core module

use thiserror::Error;

/// Errors that can occur anywhere in the cleaning, splitting and inference chain
#[derive(Error, Debug)]
pub enum CoreError {
    /// A derived-feature or harmonization step found the table in an unexpected shape.
    /// Never retried: it means a schema assumption is broken.
    #[error("Schema violation: {0}")]
    Schema(String),

    /// A disposition label could not be decoded
    #[error("Invalid disposition label: {0:?}")]
    InvalidLabel(String),

    /// Split proportions or seed configuration are unusable
    #[error("Invalid split configuration: {0}")]
    SplitConfig(String),

    /// A class is too small to be stratified into every partition
    #[error(
        "Class {class} has {count} rows, which leaves the {partition} partition without any member"
    )]
    Stratification {
        class: String,
        count: usize,
        partition: String,
    },

    /// Request or matrix width does not match what the model was trained on
    #[error("Expected {expected} features, but got {actual}")]
    FeatureCountMismatch { expected: usize, actual: usize },

    /// Input contains NaN or infinite values
    #[error("Non-finite value in row {row}, column {column}")]
    NonFiniteInput { row: usize, column: usize },

    /// One or more bundle files are absent
    #[error("Incomplete artifact bundle, missing files: {missing:?}")]
    IncompleteBundle { missing: Vec<String> },

    /// Bundle files exist but do not belong together
    #[error("Artifact integrity check failed: {0}")]
    ArtifactIntegrity(String),

    /// A persisted model failed structural validation
    #[error("Invalid model: {0}")]
    InvalidModel(String),

    /// Nothing left to work with
    #[error("Empty dataset: {0}")]
    EmptyDataset(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV reading or writing failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl CoreError {
    /// True for failures caused by the shape or content of a single inference request,
    /// as opposed to faults in the loaded bundle or the process itself.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            CoreError::FeatureCountMismatch { .. } | CoreError::NonFiniteInput { .. }
        )
    }
}

/// Result type for AI Core operations
pub type Result<T> = std::result::Result<T, CoreError>;
