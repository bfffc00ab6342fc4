use exo_ai_core::CoreError;
use thiserror::Error;

/// Errors returned by catalog ingestion and training.
#[derive(Debug, Error)]
pub enum TrainerError {
    /// One catalog could not be read; the remaining sources still load.
    #[error("source {source_name} could not be ingested: {reason}")]
    SourceIngestion { source_name: String, reason: String },

    #[error("no catalog source could be ingested ({attempted} attempted)")]
    AllSourcesFailed { attempted: usize },

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("training error: {0}")]
    Training(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrainerError {
    /// Only a single failed source is recoverable; the load continues without it.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TrainerError::SourceIngestion { .. })
    }
}

pub type Result<T> = std::result::Result<T, TrainerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_source_failures_are_recoverable() {
        let skipped = TrainerError::SourceIngestion {
            source_name: "TESS".to_string(),
            reason: "file not found".to_string(),
        };
        assert!(skipped.is_recoverable());
        assert!(!TrainerError::AllSourcesFailed { attempted: 3 }.is_recoverable());
        assert!(!TrainerError::Core(CoreError::Schema("missing period".into())).is_recoverable());
    }
}
