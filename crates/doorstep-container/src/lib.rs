//! Container engine for doorstep.
//!
//! Each processor runs in its own container with no network, no Linux
//! capabilities and a non-root user. The session's [`StagingRoot`] is
//! bind-mounted at `/pfs`; processors find their module and
//! `metadata.json` under `/pfs/processors/<name>`, the data file under
//! `/pfs/data`, and write their compiled report to
//! `/pfs/out/raw/<name>.json`.
//!
//! Images must be on the configured allow-list.

pub mod config;
pub mod engine;
pub mod runtime;
pub mod staging;
pub mod supplementary;

pub use config::{ContainerEngineConfig, ContainerSpec, Mount};
pub use engine::ContainerEngine;
pub use runtime::{ContainerOutput, ContainerRuntime, DockerCliRuntime};
pub use staging::{CONTAINER_ROOT, StagingRoot};
pub use supplementary::stage_supplementary;
