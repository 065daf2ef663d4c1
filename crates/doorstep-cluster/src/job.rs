//! Pipeline jobs and their states.

use std::fmt;

use doorstep_engine::EngineError;
use serde::{Deserialize, Serialize};

/// State of a pipeline job.
///
/// ```text
/// NOT_STARTED -> STARTING -> RUNNING -> SUCCESS | FAILURE | KILLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    #[serde(alias = "JOB_NOT_STARTED")]
    NotStarted,
    #[serde(alias = "JOB_STARTING")]
    Starting,
    #[serde(alias = "JOB_RUNNING")]
    Running,
    #[serde(alias = "JOB_SUCCESS")]
    Success,
    #[serde(alias = "JOB_FAILURE")]
    Failure,
    #[serde(alias = "JOB_KILLED")]
    Killed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Success | JobState::Failure | JobState::Killed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::NotStarted => "NOT_STARTED",
            JobState::Starting => "STARTING",
            JobState::Running => "RUNNING",
            JobState::Success => "SUCCESS",
            JobState::Failure => "FAILURE",
            JobState::Killed => "KILLED",
        };
        f.write_str(s)
    }
}

/// A job as last observed on the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: String,
    pub state: JobState,
}

impl JobInfo {
    pub fn new(id: impl Into<String>, state: JobState) -> Self {
        Self {
            id: id.into(),
            state,
        }
    }

    /// The failure a terminal unsuccessful state stands for, given the
    /// job's logs.
    pub fn failure(&self, logs: Vec<String>) -> Option<EngineError> {
        match self.state {
            JobState::Failure => Some(EngineError::PipelineJobFailed {
                job_id: self.id.clone(),
                logs,
            }),
            JobState::Killed => Some(EngineError::PipelineJobKilled {
                job_id: self.id.clone(),
                logs,
            }),
            _ => None,
        }
    }
}
