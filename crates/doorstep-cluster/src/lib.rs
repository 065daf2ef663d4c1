//! Pipeline-cluster engine for doorstep.
//!
//! Drives a cluster of versioned repos and cross-product pipelines through
//! the blocking [`ClusterClient`] capability:
//!
//! - [`Repo`] and [`Commit`]: durable storage for the session's data and
//!   processors
//! - [`Pipeline`]: rendered from a template, polled with
//!   [`Pipeline::wait_for_run`]
//! - [`CommitWatcher`]: cancellable watch over the pipeline's output repo
//! - [`ClusterEngine`]: the [`Engine`](doorstep_engine::Engine) tying these
//!   together

pub mod client;
pub mod engine;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod repo;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod watch;

pub use client::{ClusterClient, CommitInfo, HttpClusterClient, call};
pub use engine::{ClusterEngine, ClusterEngineConfig, ClusterResources};
pub use error::{ClusterError, Result};
pub use job::{JobInfo, JobState};
pub use pipeline::{Pipeline, PipelineTemplate};
pub use repo::{Commit, FileContent, Repo};
pub use watch::{CommitWatcher, wait_for_output};
