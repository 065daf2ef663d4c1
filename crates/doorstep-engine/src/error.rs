//! The unified engine failure.
//!
//! Every backend reports failure through [`EngineError`]. It is `Clone` so a
//! session can hand the same stored failure to every reader, and it is
//! serialised with an explicit `kind` tag so a remote client rebuilds the
//! same variant it was sent.

use doorstep_report::ReportError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by engines, sessions and processors.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "kebab-case")]
pub enum EngineError {
    /// A processor's workflow failed.
    #[error("Processor '{processor}' failed ({underlying}): {message}")]
    Processor {
        processor: String,
        underlying: String,
        message: String,
    },

    /// A remote call (HTTP fetch, cluster API) failed.
    #[error("Transport failure ({underlying}): {message}")]
    Transport {
        status_code: Option<u16>,
        processor: Option<String>,
        underlying: String,
        message: String,
    },

    /// A processor container exited unsuccessfully.
    #[error("Container for '{processor}' exited with status {status_code}: {message}")]
    Container {
        status_code: i32,
        processor: String,
        message: String,
    },

    /// The pipeline job finished in FAILURE.
    #[error("Pipeline job {job_id} failed")]
    PipelineJobFailed { job_id: String, logs: Vec<String> },

    /// The pipeline job was killed.
    #[error("Pipeline job {job_id} was killed")]
    PipelineJobKilled { job_id: String, logs: Vec<String> },

    /// The job-state poll budget ran out.
    #[error("Pipeline did not {stage} within {attempts} attempts")]
    PipelineWaitTimeout { attempts: u32, stage: String },

    /// A processor names a module that was not supplied.
    #[error("Module content missing for processor '{processor}': {module}")]
    MissingModuleContent { processor: String, module: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A processor asked for an image outside the allow-list.
    #[error("Image not allowed: {0}")]
    DisallowedImage(String),

    /// A supplementary data reference could not be used.
    #[error("Supplementary data '{name}' for '{processor}' could not be retrieved: {message}")]
    Supplementary {
        processor: String,
        name: String,
        message: String,
    },

    /// A processor finished without writing its report.
    #[error("No output from processor '{processor}' at {path}")]
    MissingOutput { processor: String, path: String },

    /// A processor wrote something that is not a report.
    #[error("Malformed output from processor '{processor}': {message}")]
    MalformedOutput { processor: String, message: String },

    #[error(transparent)]
    Report(#[from] ReportError),

    /// The session was driven out of order (e.g. monitored twice).
    #[error("Session error: {0}")]
    Session(String),

    #[error("Session was cancelled")]
    Cancelled,

    /// One or more backend resources could not be released.
    #[error("Teardown failed: {}", .0.join("; "))]
    Teardown(Vec<String>),

    #[error("{context}: {message}")]
    Io { context: String, message: String },
}

impl EngineError {
    /// Wrap an I/O error with what was being attempted.
    pub fn io(context: impl Into<String>, err: std::io::Error) -> Self {
        EngineError::Io {
            context: context.into(),
            message: err.to_string(),
        }
    }

    /// Wrap an HTTP client error.
    pub fn transport(err: &reqwest::Error) -> Self {
        EngineError::Transport {
            status_code: err.status().map(|s| s.as_u16()),
            processor: None,
            underlying: "http".to_string(),
            message: err.to_string(),
        }
    }

    /// Short machine-readable name of the variant, matching its serde tag.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Processor { .. } => "processor",
            EngineError::Transport { .. } => "transport",
            EngineError::Container { .. } => "container",
            EngineError::PipelineJobFailed { .. } => "pipeline-job-failed",
            EngineError::PipelineJobKilled { .. } => "pipeline-job-killed",
            EngineError::PipelineWaitTimeout { .. } => "pipeline-wait-timeout",
            EngineError::MissingModuleContent { .. } => "missing-module-content",
            EngineError::Configuration(_) => "configuration",
            EngineError::DisallowedImage(_) => "disallowed-image",
            EngineError::Supplementary { .. } => "supplementary",
            EngineError::MissingOutput { .. } => "missing-output",
            EngineError::MalformedOutput { .. } => "malformed-output",
            EngineError::Report(_) => "report",
            EngineError::Session(_) => "session",
            EngineError::Cancelled => "cancelled",
            EngineError::Teardown(_) => "teardown",
            EngineError::Io { .. } => "io",
        }
    }

    /// Status code: an HTTP status for transport failures, the exit code
    /// for container failures.
    pub fn status_code(&self) -> Option<i32> {
        match self {
            EngineError::Transport { status_code, .. } => status_code.map(i32::from),
            EngineError::Container { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    /// Processor the failure is attributed to, if any.
    pub fn processor(&self) -> Option<&str> {
        match self {
            EngineError::Processor { processor, .. }
            | EngineError::Container { processor, .. }
            | EngineError::MissingModuleContent { processor, .. }
            | EngineError::Supplementary { processor, .. }
            | EngineError::MissingOutput { processor, .. }
            | EngineError::MalformedOutput { processor, .. } => Some(processor),
            EngineError::Transport { processor, .. } => processor.as_deref(),
            _ => None,
        }
    }

    /// Type of the failure underneath this one.
    pub fn underlying_type(&self) -> &str {
        match self {
            EngineError::Processor { underlying, .. }
            | EngineError::Transport { underlying, .. } => underlying,
            other => other.kind(),
        }
    }

    /// Human-readable detail, without the variant prefix where one exists.
    pub fn message(&self) -> String {
        match self {
            EngineError::Processor { message, .. }
            | EngineError::Transport { message, .. }
            | EngineError::Container { message, .. }
            | EngineError::Supplementary { message, .. }
            | EngineError::MalformedOutput { message, .. }
            | EngineError::Io { message, .. } => message.clone(),
            EngineError::PipelineJobFailed { logs, .. }
            | EngineError::PipelineJobKilled { logs, .. } => logs.join("\n"),
            other => other.to_string(),
        }
    }

    /// Attribute a transport failure to a processor.
    pub fn for_processor(self, name: &str) -> Self {
        match self {
            EngineError::Transport {
                status_code,
                processor: None,
                underlying,
                message,
            } => EngineError::Transport {
                status_code,
                processor: Some(name.to_string()),
                underlying,
                message,
            },
            other => other,
        }
    }

    /// Configuration failures are raised immediately and never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            EngineError::MissingModuleContent { .. }
                | EngineError::Configuration(_)
                | EngineError::DisallowedImage(_)
                | EngineError::Supplementary { .. }
                | EngineError::Report(ReportError::IncompatiblePresets(_))
        )
    }

    /// Whether a retry of the same call might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Transport { status_code, .. } => {
                status_code.is_none_or(|code| code >= 500 || code == 429)
            }
            _ => false,
        }
    }
}
