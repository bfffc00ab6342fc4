//! Inference service error types

use exo_ai_core::CoreError;
use thiserror::Error;

/// Inference service errors
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The request itself is malformed; the service stays healthy.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The bundle could not be brought up; nothing is served from it.
    #[error("Startup failed: {0}")]
    Startup(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// True when the caller sent something unusable, false for faults on our side
    pub fn is_client_error(&self) -> bool {
        matches!(self, ServiceError::InvalidRequest(_))
    }

    /// Wrap a bundle loading failure
    pub fn startup(err: CoreError) -> Self {
        ServiceError::Startup(err.to_string())
    }
}

impl From<CoreError> for ServiceError {
    fn from(err: CoreError) -> Self {
        if err.is_request_error() {
            ServiceError::InvalidRequest(err.to_string())
        } else {
            ServiceError::Internal(err.to_string())
        }
    }
}

impl From<csv::Error> for ServiceError {
    fn from(err: csv::Error) -> Self {
        ServiceError::InvalidRequest(format!("CSV error: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
