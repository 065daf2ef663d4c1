//! Errors raised by cluster API calls.

use doorstep_engine::EngineError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClusterError>;

/// A failed call to the cluster.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The cluster answered with an error status.
    #[error("{operation} failed with status {status}: {message}")]
    Status {
        operation: &'static str,
        status: u16,
        message: String,
    },

    /// The cluster could not be reached or the call did not complete.
    #[error("{operation} failed: {message}")]
    Call {
        operation: &'static str,
        message: String,
    },

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    /// The cluster's answer could not be decoded.
    #[error("{operation} returned an unexpected body: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },

    #[error("pipeline template error: {0}")]
    Template(#[from] tera::Error),
}

impl ClusterError {
    pub fn call(operation: &'static str, message: impl Into<String>) -> Self {
        ClusterError::Call {
            operation,
            message: message.into(),
        }
    }
}

impl From<ClusterError> for EngineError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::Status {
                status, message, ..
            } => EngineError::Transport {
                status_code: Some(status),
                processor: None,
                underlying: "cluster".to_string(),
                message,
            },
            ClusterError::Template(e) => EngineError::Configuration(e.to_string()),
            other => EngineError::Transport {
                status_code: None,
                processor: None,
                underlying: "cluster".to_string(),
                message: other.to_string(),
            },
        }
    }
}
