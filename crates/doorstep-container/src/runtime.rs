//! Running a container to completion.

use std::process::Stdio;

use async_trait::async_trait;
use doorstep_engine::{EngineError, Result};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::config::ContainerSpec;

/// Output of a finished container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub success: bool,
}

impl ContainerOutput {
    pub fn new(stdout: String, stderr: String, exit_code: i32) -> Self {
        Self {
            stdout,
            stderr,
            success: exit_code == 0,
            exit_code,
        }
    }
}

/// Launches containers and waits for them to exit.
///
/// A runtime reports launch problems as errors; an unsuccessful exit is a
/// normal [`ContainerOutput`] for the caller to judge.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerOutput>;
}

/// Runtime driving a Docker-compatible CLI.
#[derive(Debug, Clone)]
pub struct DockerCliRuntime {
    binary: String,
}

impl DockerCliRuntime {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Arguments for `<binary> run ...`.
    pub fn run_args(spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            spec.name.clone(),
            "--network".to_string(),
            spec.network.clone(),
            "--user".to_string(),
            spec.user.clone(),
        ];
        for cap in &spec.cap_drop {
            args.push("--cap-drop".to_string());
            args.push(cap.clone());
        }
        for (key, value) in &spec.env_vars {
            args.push("--env".to_string());
            args.push(format!("{key}={value}"));
        }
        for mount in &spec.mounts {
            args.push("--mount".to_string());
            args.push(format!(
                "type=bind,source={},target={}",
                mount.source.display(),
                mount.target
            ));
        }
        args.push(spec.image.clone());
        args
    }
}

impl Default for DockerCliRuntime {
    fn default() -> Self {
        Self::new("docker")
    }
}

#[async_trait]
impl ContainerRuntime for DockerCliRuntime {
    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerOutput> {
        let args = Self::run_args(spec);
        debug!(binary = %self.binary, container = %spec.name, image = %spec.image, "Launching container");

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match timeout(spec.timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(ContainerOutput::new(
                String::from_utf8_lossy(&output.stdout).into_owned(),
                String::from_utf8_lossy(&output.stderr).into_owned(),
                output.status.code().unwrap_or(-1),
            )),
            Ok(Err(e)) => Err(EngineError::Transport {
                status_code: None,
                processor: None,
                underlying: "container-runtime".to_string(),
                message: format!("failed to launch {}: {e}", self.binary),
            }),
            Err(_) => Err(EngineError::Container {
                status_code: -1,
                processor: spec.name.clone(),
                message: format!("timed out after {}s", spec.timeout.as_secs()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args() {
        let spec = ContainerSpec::new("doorstep-x-pii", "lintol/doorstep:latest")
            .add_env("LANG", "C.UTF-8")
            .add_mount("/tmp/stage", "/pfs");
        let args = DockerCliRuntime::run_args(&spec);
        let joined = args.join(" ");
        assert!(joined.starts_with("run --rm --name doorstep-x-pii"));
        assert!(joined.contains("--network none"));
        assert!(joined.contains("--user 1000"));
        assert!(joined.contains("--cap-drop ALL"));
        assert!(joined.contains("--env LANG=C.UTF-8"));
        assert!(joined.contains("--mount type=bind,source=/tmp/stage,target=/pfs"));
        assert_eq!(args.last().unwrap(), "lintol/doorstep:latest");
    }

    #[test]
    fn test_output_success_flag() {
        assert!(ContainerOutput::new(String::new(), String::new(), 0).success);
        assert!(!ContainerOutput::new(String::new(), "err".into(), 3).success);
    }

    #[tokio::test]
    async fn test_missing_binary_is_transport_failure() {
        let runtime = DockerCliRuntime::new("/nonexistent/doorstep-docker");
        let err = runtime
            .run(&ContainerSpec::new("c", "img:1"))
            .await
            .unwrap_err();
        assert_eq!(err.underlying_type(), "container-runtime");
    }
}
