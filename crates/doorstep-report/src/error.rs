//! Error types for report construction and merging.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for report operations.
pub type Result<T> = std::result::Result<T, ReportError>;

/// Errors that can occur while building, merging or parsing reports.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "kebab-case")]
pub enum ReportError {
    /// The severity is not one of ERROR, WARNING or INFO.
    #[error("Invalid severity '{0}': must be one of ERROR, WARNING or INFO")]
    InvalidSeverity(String),

    /// Reports with different presets cannot be combined.
    #[error("Reports can only be combined when they share a preset (found: {0:?})")]
    IncompatiblePresets(Vec<String>),

    /// The preset name is not known to this version.
    #[error("Unknown report preset: {0}")]
    UnknownPreset(String),

    /// A compiled report could not be read back.
    #[error("Failed to parse report: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for ReportError {
    fn from(err: serde_json::Error) -> Self {
        ReportError::Parse(err.to_string())
    }
}
