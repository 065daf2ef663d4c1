//! Errors returned across the RPC boundary.

use doorstep_engine::EngineError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

/// A failed RPC call.
///
/// Serialized with an explicit `kind` tag so the client rebuilds the same
/// variant, including the wrapped [`EngineError`].
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "kebab-case")]
pub enum ServerError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Request addressed to server {requested}, this is {actual}")]
    WrongServer { requested: String, actual: String },

    #[error("Report is too long: {length} characters (limit {limit})")]
    ReportTooLong { length: usize, limit: usize },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The call never reached the server or its reply was lost.
    #[error("Channel error: {0}")]
    Channel(String),

    /// Sessions that failed to close on shutdown.
    #[error("Shutdown failed: {}", .0.join("; "))]
    Shutdown(Vec<String>),
}

impl ServerError {
    /// The engine failure underneath, if this is one.
    pub fn engine(&self) -> Option<&EngineError> {
        match self {
            ServerError::Engine(e) => Some(e),
            _ => None,
        }
    }
}
