//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [engine]        # which engine runs workflows
//! [container]     # container engine settings
//! [cluster]       # pipeline-cluster engine settings
//! [[images]]      # allowed processor images
//! [report]        # report limits for the RPC surface
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g. a project-local
/// `doorstep.toml` that only picks an engine) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoorstepConfig {
    pub engine: Option<EngineSection>,
    pub container: Option<ContainerSection>,
    pub cluster: Option<ClusterSection>,
    /// Allowed processor images. `None` means the built-in allow-list.
    pub images: Option<Vec<ImageRef>>,
    pub report: Option<ReportSection>,
}

impl DoorstepConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        let config: DoorstepConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced whole, not merged field by field.
    pub fn merge(&mut self, other: DoorstepConfig) {
        if other.engine.is_some() {
            self.engine = other.engine;
        }
        if other.container.is_some() {
            self.container = other.container;
        }
        if other.cluster.is_some() {
            self.cluster = other.cluster;
        }
        if other.images.is_some() {
            self.images = other.images;
        }
        if other.report.is_some() {
            self.report = other.report;
        }
    }

    /// Selected engine kind, defaulting to the container engine.
    pub fn engine_kind(&self) -> EngineKind {
        self.engine.as_ref().map(|e| e.kind).unwrap_or_default()
    }

    pub fn container(&self) -> ContainerSection {
        self.container.clone().unwrap_or_default()
    }

    pub fn cluster(&self) -> ClusterSection {
        self.cluster.clone().unwrap_or_default()
    }

    pub fn report(&self) -> ReportSection {
        self.report.clone().unwrap_or_default()
    }

    /// The effective image allow-list.
    pub fn allowed_images(&self) -> Vec<ImageRef> {
        self.images.clone().unwrap_or_else(ImageRef::defaults)
    }

    fn validate(&self) -> crate::Result<()> {
        if let Some(cluster) = &self.cluster {
            if cluster.retry_count == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "cluster.retry_count".into(),
                    reason: "must be at least 1".into(),
                });
            }
            if cluster.retry_processing_count == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "cluster.retry_processing_count".into(),
                    reason: "must be at least 1".into(),
                });
            }
        }
        if let Some(images) = &self.images
            && let Some(bad) = images.iter().find(|i| i.image.is_empty())
        {
            return Err(ConfigError::InvalidValue {
                field: "images".into(),
                reason: format!("empty image name (revision '{}')", bad.revision),
            });
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Which engine executes processors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// In-process, against the built-in processor registry.
    Local,
    /// One isolated container per processor.
    #[default]
    Container,
    /// A versioned-data pipeline cluster.
    Cluster,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EngineKind::Local => "local",
            EngineKind::Container => "container",
            EngineKind::Cluster => "cluster",
        })
    }
}

impl FromStr for EngineKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(EngineKind::Local),
            "container" | "docker" => Ok(EngineKind::Container),
            "cluster" | "pachyderm" => Ok(EngineKind::Cluster),
            other => Err(ConfigError::InvalidValue {
                field: "engine.kind".into(),
                reason: format!("unknown engine '{other}'"),
            }),
        }
    }
}

/// `[engine]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub kind: EngineKind,
}

// ─────────────────────────────────────────────────────────────────────────────
// Container engine
// ─────────────────────────────────────────────────────────────────────────────

/// `[container]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSection {
    /// Container CLI binary.
    pub binary: String,
    /// Image used when a processor does not name one.
    pub default_image: String,
    pub default_revision: String,
    /// User the processor runs as inside the container.
    pub user: String,
    /// Value of `LANG` inside the container.
    pub lang: String,
    /// Wall-clock limit for one processor run.
    pub timeout_secs: u64,
    /// Directory `file://` supplementary references may be read from.
    /// Unset, local supplementary files are refused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplementary_dir: Option<PathBuf>,
    /// Attempts per supplementary download before a transient failure is
    /// final.
    pub fetch_attempts: u32,
    pub fetch_retry_delay_ms: u64,
}

impl Default for ContainerSection {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            default_image: "lintol/doorstep".to_string(),
            default_revision: "latest".to_string(),
            user: "1000".to_string(),
            lang: "C.UTF-8".to_string(),
            timeout_secs: 600,
            supplementary_dir: None,
            fetch_attempts: 3,
            fetch_retry_delay_ms: 1000,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cluster engine
// ─────────────────────────────────────────────────────────────────────────────

/// `[cluster]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    /// Base URL of the cluster's HTTP gateway.
    pub endpoint: String,
    /// Polls allowed for the job to leave its starting states.
    pub retry_count: u32,
    /// Polls allowed for a running job to finish.
    pub retry_processing_count: u32,
    /// Delay between polls, and between attempts of a failed call.
    pub retry_delay_ms: u64,
    /// Attempts per cluster call before a transient failure is final.
    pub call_attempts: u32,
    pub branch: String,
    /// Timeout of one blocking commit-subscription attempt.
    pub watch_timeout_ms: u64,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:30652".to_string(),
            retry_count: 120,
            retry_processing_count: 50,
            retry_delay_ms: 1000,
            call_attempts: 3,
            branch: "master".to_string(),
            watch_timeout_ms: 1000,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Images
// ─────────────────────────────────────────────────────────────────────────────

/// One `[[images]]` entry: an image name and revision tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub image: String,
    #[serde(default = "default_revision")]
    pub revision: String,
}

fn default_revision() -> String {
    "latest".to_string()
}

impl ImageRef {
    pub fn new(image: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            revision: revision.into(),
        }
    }

    /// The built-in allow-list.
    pub fn defaults() -> Vec<ImageRef> {
        vec![
            ImageRef::new("lintol/doorstep", "latest"),
            ImageRef::new("lintol/ds-csvlint", "latest"),
        ]
    }

    /// Whether `reference` (`image` or `image:revision`) names this entry.
    pub fn matches(&self, reference: &str) -> bool {
        match reference.rsplit_once(':') {
            Some((image, revision)) if !revision.contains('/') => {
                image == self.image && revision == self.revision
            }
            _ => reference == self.image && self.revision == "latest",
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.image, self.revision)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Report
// ─────────────────────────────────────────────────────────────────────────────

/// `[report]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSection {
    /// Largest compiled report, in characters, the server will return.
    pub max_length_chars: usize,
}

impl Default for ReportSection {
    fn default() -> Self {
        Self {
            max_length_chars: 10_000_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_defaults() {
        let config = DoorstepConfig::from_toml("").unwrap();
        assert_eq!(config.engine_kind(), EngineKind::Container);
        assert_eq!(config.cluster().retry_count, 120);
        assert_eq!(config.cluster().retry_processing_count, 50);
        assert_eq!(config.cluster().branch, "master");
        assert_eq!(config.container().user, "1000");
        assert_eq!(config.report().max_length_chars, 10_000_000);
        assert_eq!(config.allowed_images().len(), 2);
    }

    #[test]
    fn test_parse_full_config() {
        let config = DoorstepConfig::from_toml(
            r#"
[engine]
kind = "cluster"

[cluster]
retry_count = 5
retry_delay_ms = 10

[[images]]
image = "lintol/custom"
revision = "v2"
"#,
        )
        .unwrap();
        assert_eq!(config.engine_kind(), EngineKind::Cluster);
        let cluster = config.cluster();
        assert_eq!(cluster.retry_count, 5);
        assert_eq!(cluster.retry_delay_ms, 10);
        assert_eq!(cluster.retry_processing_count, 50);
        assert_eq!(config.allowed_images(), vec![ImageRef::new("lintol/custom", "v2")]);
    }

    #[test]
    fn test_merge_later_wins() {
        let mut base = DoorstepConfig::from_toml("[engine]\nkind = \"local\"\n[report]\nmax_length_chars = 5").unwrap();
        let overlay = DoorstepConfig::from_toml("[engine]\nkind = \"cluster\"").unwrap();
        base.merge(overlay);
        assert_eq!(base.engine_kind(), EngineKind::Cluster);
        assert_eq!(base.report().max_length_chars, 5);
    }

    #[test]
    fn test_roundtrip_toml() {
        let mut config = DoorstepConfig::new();
        config.container = Some(ContainerSection {
            timeout_secs: 30,
            ..Default::default()
        });
        let text = config.to_toml().unwrap();
        let parsed = DoorstepConfig::from_toml(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_supplementary_dir_and_fetch_retry() {
        let config = DoorstepConfig::from_toml(
            "[container]\nsupplementary_dir = \"/srv/doorstep/supplementary\"\nfetch_attempts = 5",
        )
        .unwrap();
        let container = config.container();
        assert_eq!(
            container.supplementary_dir,
            Some(PathBuf::from("/srv/doorstep/supplementary"))
        );
        assert_eq!(container.fetch_attempts, 5);
        assert_eq!(container.fetch_retry_delay_ms, 1000);
        assert_eq!(DoorstepConfig::new().container().supplementary_dir, None);
        assert_eq!(DoorstepConfig::new().cluster().call_attempts, 3);
    }

    #[test]
    fn test_zero_retries_rejected() {
        let err = DoorstepConfig::from_toml("[cluster]\nretry_count = 0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_engine_kind_from_str() {
        assert_eq!("docker".parse::<EngineKind>().unwrap(), EngineKind::Container);
        assert_eq!("Local".parse::<EngineKind>().unwrap(), EngineKind::Local);
        assert!("serverless".parse::<EngineKind>().is_err());
    }

    #[test]
    fn test_image_matches() {
        let image = ImageRef::new("lintol/doorstep", "latest");
        assert!(image.matches("lintol/doorstep:latest"));
        assert!(image.matches("lintol/doorstep"));
        assert!(!image.matches("lintol/doorstep:v1"));
        assert!(!image.matches("evil/doorstep:latest"));
        let ported = ImageRef::new("registry:5000/lintol/x", "latest");
        assert!(ported.matches("registry:5000/lintol/x"));
    }
}
