//! Supplementary data staging.
//!
//! A processor may name extra data files (`name -> URL`) in its metadata.
//! Each one is fetched into the processor's staging directory as
//! `s<i>-<basename>` before the container starts, and the metadata entry is
//! rewritten to `{source, location}` with the in-container location.
//!
//! `file://` references are only honoured under the configured
//! supplementary directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use doorstep_engine::{EngineError, Result, fetch_url};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::config::ContainerEngineConfig;

/// Marks a reference that could not be resolved upstream.
const ERROR_SCHEME: &str = "error://";

/// Fetch every supplementary entry into `processor_dir`.
///
/// `container_dir` is where `processor_dir` appears inside the container.
/// Returns the rewritten metadata entries.
pub async fn stage_supplementary(
    http: &reqwest::Client,
    config: &ContainerEngineConfig,
    processor: &str,
    processor_dir: &Path,
    container_dir: &str,
    entries: &BTreeMap<String, String>,
) -> Result<Map<String, Value>> {
    let mut staged = Map::new();

    for (i, (name, reference)) in entries.iter().enumerate() {
        let failure = |message: String| EngineError::Supplementary {
            processor: processor.to_string(),
            name: name.clone(),
            message,
        };

        if let Some(error) = reference.strip_prefix(ERROR_SCHEME) {
            return Err(failure(error.to_string()));
        }

        let basename = format!("s{i}-{}", reference_basename(reference));
        let target = processor_dir.join(&basename);

        if let Some(path) = reference.strip_prefix("file://") {
            let source = local_source(config, path).await.map_err(|message| {
                warn!(processor, path, %message, "Refused local supplementary file");
                failure(message)
            })?;
            tokio::fs::copy(&source, &target)
                .await
                .map_err(|e| failure(format!("copying {path}: {e}")))?;
        } else if reference.starts_with("http://") || reference.starts_with("https://") {
            info!(processor, url = %reference, "Downloading supplementary data");
            let bytes = fetch_url(http, reference, config.fetch_retry)
                .await
                .map_err(|e| failure(e.message()))?;
            tokio::fs::write(&target, bytes)
                .await
                .map_err(|e| failure(format!("writing {}: {e}", target.display())))?;
        } else {
            return Err(failure(format!("unsupported reference: {reference}")));
        }

        staged.insert(
            name.clone(),
            json!({
                "source": reference,
                "location": format!("{container_dir}/{basename}"),
            }),
        );
    }

    Ok(staged)
}

/// Resolve a `file://` path, requiring it to lie under the configured root.
async fn local_source(
    config: &ContainerEngineConfig,
    path: &str,
) -> std::result::Result<PathBuf, String> {
    let root = config
        .supplementary_dir
        .as_ref()
        .ok_or_else(|| "local supplementary files are disabled".to_string())?;
    let root = tokio::fs::canonicalize(root)
        .await
        .map_err(|e| format!("supplementary directory {}: {e}", root.display()))?;
    let source = tokio::fs::canonicalize(path)
        .await
        .map_err(|e| format!("resolving {path}: {e}"))?;
    if !source.starts_with(&root) {
        return Err(format!("{path} is outside the supplementary directory"));
    }
    Ok(source)
}

/// Last path segment of a URL, without query or fragment.
fn reference_basename(reference: &str) -> &str {
    let without_scheme = reference
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(reference);
    let path = without_scheme
        .split(['?', '#'])
        .next()
        .unwrap_or(without_scheme);
    path.rsplit('/').find(|s| !s.is_empty()).unwrap_or("data")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reference_basename() {
        assert_eq!(reference_basename("https://x.org/a/b/reg.csv?v=1"), "reg.csv");
        assert_eq!(reference_basename("file:///tmp/boundaries.geojson"), "boundaries.geojson");
        assert_eq!(reference_basename("https://x.org/"), "x.org");
    }

    #[tokio::test]
    async fn test_error_reference_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut entries = BTreeMap::new();
        entries.insert("register".to_string(), "error://upstream 404".to_string());

        let err = stage_supplementary(
            &reqwest::Client::new(),
            &ContainerEngineConfig::default(),
            "pii",
            dir.path(),
            "/pfs/processors/pii",
            &entries,
        )
        .await
        .unwrap_err();
        match err {
            EngineError::Supplementary { processor, name, message } => {
                assert_eq!(processor, "pii");
                assert_eq!(name, "register");
                assert_eq!(message, "upstream 404");
            }
            other => panic!("Expected Supplementary, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_file_reference_copied_and_rewritten() {
        let source_dir = TempDir::new().unwrap();
        let source = source_dir.path().join("areas.geojson");
        std::fs::write(&source, "{}").unwrap();
        let dir = TempDir::new().unwrap();

        let mut entries = BTreeMap::new();
        entries.insert("areas".to_string(), format!("file://{}", source.display()));

        let config = ContainerEngineConfig::default().with_supplementary_dir(source_dir.path());
        let staged = stage_supplementary(
            &reqwest::Client::new(),
            &config,
            "geo",
            dir.path(),
            "/pfs/processors/geo",
            &entries,
        )
        .await
        .unwrap();

        assert_eq!(
            staged["areas"]["location"],
            "/pfs/processors/geo/s0-areas.geojson"
        );
        assert!(dir.path().join("s0-areas.geojson").exists());
    }

    #[tokio::test]
    async fn test_unknown_scheme_rejected() {
        let dir = TempDir::new().unwrap();
        let mut entries = BTreeMap::new();
        entries.insert("x".to_string(), "ftp://host/x.csv".to_string());
        let err = stage_supplementary(
            &reqwest::Client::new(),
            &ContainerEngineConfig::default(),
            "p",
            dir.path(),
            "/pfs",
            &entries,
        )
        .await
        .unwrap_err();
        assert!(err.is_configuration());
    }

    fn file_entry(path: &Path) -> BTreeMap<String, String> {
        let mut entries = BTreeMap::new();
        entries.insert("local".to_string(), format!("file://{}", path.display()));
        entries
    }

    #[tokio::test]
    async fn test_file_reference_refused_without_supplementary_dir() {
        let source_dir = TempDir::new().unwrap();
        let source = source_dir.path().join("secret.txt");
        std::fs::write(&source, "x").unwrap();
        let dir = TempDir::new().unwrap();

        let err = stage_supplementary(
            &reqwest::Client::new(),
            &ContainerEngineConfig::default(),
            "p",
            dir.path(),
            "/pfs",
            &file_entry(&source),
        )
        .await
        .unwrap_err();
        match err {
            EngineError::Supplementary { message, .. } => {
                assert_eq!(message, "local supplementary files are disabled");
            }
            other => panic!("Expected Supplementary, got: {other:?}"),
        }
        assert!(!dir.path().join("s0-secret.txt").exists());
    }

    #[tokio::test]
    async fn test_file_reference_outside_supplementary_dir_refused() {
        let allowed = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        let source = elsewhere.path().join("secret.txt");
        std::fs::write(&source, "x").unwrap();
        let dir = TempDir::new().unwrap();
        let config = ContainerEngineConfig::default().with_supplementary_dir(allowed.path());

        let err = stage_supplementary(
            &reqwest::Client::new(),
            &config,
            "p",
            dir.path(),
            "/pfs",
            &file_entry(&source),
        )
        .await
        .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.message().contains("outside the supplementary directory"));
        assert!(!dir.path().join("s0-secret.txt").exists());
    }

    #[tokio::test]
    async fn test_file_reference_cannot_climb_out_of_supplementary_dir() {
        let parent = TempDir::new().unwrap();
        let allowed = parent.path().join("allowed");
        std::fs::create_dir(&allowed).unwrap();
        std::fs::write(parent.path().join("secret.txt"), "x").unwrap();
        let dir = TempDir::new().unwrap();
        let config = ContainerEngineConfig::default().with_supplementary_dir(&allowed);

        let err = stage_supplementary(
            &reqwest::Client::new(),
            &config,
            "p",
            dir.path(),
            "/pfs",
            &file_entry(&allowed.join("../secret.txt")),
        )
        .await
        .unwrap_err();
        assert!(err.message().contains("outside the supplementary directory"));
    }
}
