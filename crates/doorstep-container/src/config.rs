//! Container launch settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use doorstep_config::{DoorstepConfig, ImageRef};
use doorstep_engine::RetryPolicy;

/// A bind mount from the host into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: PathBuf,
    pub target: String,
}

/// Everything needed to launch one processor container.
///
/// # Isolation
///
/// - **Network**: `none` unless changed.
/// - **Capabilities**: every Linux capability dropped.
/// - **User**: a non-root uid.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    /// Container name, for tracing and cleanup.
    pub name: String,
    /// `image:revision` to run.
    pub image: String,
    pub env_vars: Vec<(String, String)>,
    pub mounts: Vec<Mount>,
    pub user: String,
    pub network: String,
    pub cap_drop: Vec<String>,
    pub timeout: Duration,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            env_vars: Vec::new(),
            mounts: Vec::new(),
            user: "1000".to_string(),
            network: "none".to_string(),
            cap_drop: vec!["ALL".to_string()],
            timeout: Duration::from_secs(600),
        }
    }

    pub fn add_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    pub fn add_mount(mut self, source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        self.mounts.push(Mount {
            source: source.into(),
            target: target.into(),
        });
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Value of an environment variable, if set.
    pub fn env(&self, key: &str) -> Option<&str> {
        self.env_vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Settings of the container engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerEngineConfig {
    pub default_image: String,
    pub default_revision: String,
    pub user: String,
    /// `LANG` for processors that do not set their own.
    pub lang: String,
    pub timeout: Duration,
    pub allowed_images: Vec<ImageRef>,
    /// Root that `file://` supplementary references must resolve under.
    /// `None` refuses them.
    pub supplementary_dir: Option<PathBuf>,
    /// Retry of supplementary downloads.
    pub fetch_retry: RetryPolicy,
}

impl Default for ContainerEngineConfig {
    fn default() -> Self {
        Self::from_config(&DoorstepConfig::default())
    }
}

impl ContainerEngineConfig {
    pub fn from_config(config: &DoorstepConfig) -> Self {
        let section = config.container();
        Self {
            default_image: section.default_image,
            default_revision: section.default_revision,
            user: section.user,
            lang: section.lang,
            timeout: Duration::from_secs(section.timeout_secs),
            allowed_images: config.allowed_images(),
            supplementary_dir: section.supplementary_dir,
            fetch_retry: RetryPolicy::new(
                section.fetch_attempts,
                Duration::from_millis(section.fetch_retry_delay_ms),
            ),
        }
    }

    pub fn with_allowed_images(mut self, images: Vec<ImageRef>) -> Self {
        self.allowed_images = images;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_supplementary_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.supplementary_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_fetch_retry(mut self, retry: RetryPolicy) -> Self {
        self.fetch_retry = retry;
        self
    }

    /// Whether `image` (`name:revision`) is on the allow-list.
    pub fn is_allowed(&self, image: &str) -> bool {
        self.allowed_images.iter().any(|allowed| allowed.matches(image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_defaults_are_isolated() {
        let spec = ContainerSpec::new("c", "lintol/doorstep:latest");
        assert_eq!(spec.network, "none");
        assert_eq!(spec.cap_drop, vec!["ALL"]);
        assert_eq!(spec.user, "1000");
    }

    #[test]
    fn test_spec_builders() {
        let spec = ContainerSpec::new("c", "img:1")
            .add_env("LANG", "C.UTF-8")
            .add_mount("/tmp/root", "/pfs")
            .with_timeout(Duration::from_secs(5));
        assert_eq!(spec.env("LANG"), Some("C.UTF-8"));
        assert_eq!(spec.env("MISSING"), None);
        assert_eq!(spec.mounts[0].target, "/pfs");
        assert_eq!(spec.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_engine_config_from_defaults() {
        let config = ContainerEngineConfig::default();
        assert_eq!(config.default_image, "lintol/doorstep");
        assert!(config.is_allowed("lintol/doorstep:latest"));
        assert!(config.is_allowed("lintol/ds-csvlint:latest"));
        assert!(!config.is_allowed("someone/else:latest"));
        assert_eq!(config.supplementary_dir, None);
        assert_eq!(config.fetch_retry.attempts, 3);
    }
}
