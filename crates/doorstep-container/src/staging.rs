//! Filesystem staging for container runs.
//!
//! One temporary root per session, mounted at `/pfs` in every container:
//!
//! ```text
//! <root>/
//!   processors/<name>/   module source, metadata.json, supplementary files
//!   data/<file>          the input file
//!   out/raw/<name>.json  where each processor writes its report
//! ```

use std::any::Any;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use doorstep_engine::{
    EngineError, ProcessorDefinition, Result, SessionResources, base_name, check_name,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tempfile::TempDir;
use tracing::debug;

use crate::config::{ContainerEngineConfig, ContainerSpec};
use crate::supplementary::stage_supplementary;

/// Where the staging root is mounted inside containers.
pub const CONTAINER_ROOT: &str = "/pfs";

/// A session's staging root. Removed when the session closes.
#[derive(Debug)]
pub struct StagingRoot {
    path: PathBuf,
    dir: Mutex<Option<TempDir>>,
}

impl StagingRoot {
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("doorstep-")
            .suffix("-container-storage")
            .tempdir()
            .map_err(|e| EngineError::io("creating staging root", e))?;
        Ok(Self {
            path: dir.path().to_path_buf(),
            dir: Mutex::new(Some(dir)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn processor_dir(&self, name: &str) -> PathBuf {
        self.path.join("processors").join(name)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.path.join("data")
    }

    /// Host path of a processor's report.
    pub fn output_file(&self, name: &str) -> PathBuf {
        self.path.join("out").join("raw").join(format!("{name}.json"))
    }

    /// Write the input file under `data/`.
    pub async fn stage_data(&self, basename: &str, content: &[u8]) -> Result<PathBuf> {
        let dir = self.data_dir();
        create_dir(&dir).await?;
        create_dir(&self.path.join("out").join("raw")).await?;
        let path = dir.join(basename);
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| EngineError::io(format!("writing {}", path.display()), e))?;
        Ok(path)
    }

    /// Lay out one processor's directory and describe its container.
    pub async fn stage_processor(
        &self,
        http: &reqwest::Client,
        session: &str,
        definition: &ProcessorDefinition,
        data_basename: &str,
        config: &ContainerEngineConfig,
    ) -> Result<ContainerSpec> {
        let name = &definition.name;
        check_name("processor id", name)?;
        if let Some(module) = &definition.module {
            check_name("module name", base_name(module))?;
        }
        let dir = self.processor_dir(name);
        create_dir(&dir).await?;
        let container_dir = format!("{CONTAINER_ROOT}/processors/{name}");

        let supplementary = match &definition.metadata.supplementary {
            Some(entries) => {
                Value::Object(stage_supplementary(http, config, name, &dir, &container_dir, entries).await?)
            }
            None => json!({}),
        };

        let metadata = &definition.metadata;
        let document = json!({
            "name": name,
            "definition": metadata.definition,
            "configuration": metadata.configuration,
            "settings": metadata.settings,
            "supplementary": supplementary,
            "context": metadata.context,
        });
        let metadata_path = dir.join("metadata.json");
        let bytes = serde_json::to_vec(&document)
            .map_err(|e| EngineError::Configuration(format!("metadata for {name}: {e}")))?;
        tokio::fs::write(&metadata_path, bytes)
            .await
            .map_err(|e| EngineError::io(format!("writing {}", metadata_path.display()), e))?;

        if let (Some(module), Some(content)) = (&definition.module, &definition.content) {
            let module_path = dir.join(base_name(module));
            tokio::fs::write(&module_path, content)
                .await
                .map_err(|e| EngineError::io(format!("writing {}", module_path.display()), e))?;
        }

        debug!(session, processor = %name, dir = %dir.display(), "Staged processor");

        let image = metadata.docker_image(&config.default_image, &config.default_revision);
        let lang = metadata.lang.clone().unwrap_or_else(|| config.lang.clone());

        Ok(ContainerSpec::new(format!("{session}-{name}"), image)
            .with_user(config.user.clone())
            .with_timeout(config.timeout)
            .add_env("LANG", lang)
            .add_env("LINTOL_PROCESSOR_DIRECTORY", container_dir.clone())
            .add_env(
                "LINTOL_OUTPUT_FILE",
                format!("{CONTAINER_ROOT}/out/raw/{name}.json"),
            )
            .add_env("LINTOL_METADATA", format!("{container_dir}/metadata.json"))
            .add_env("LINTOL_INPUT_DATA", format!("{CONTAINER_ROOT}/data"))
            .add_env("LINTOL_DATA_FILE", data_basename)
            .add_mount(self.path.clone(), CONTAINER_ROOT))
    }
}

#[async_trait]
impl SessionResources for StagingRoot {
    async fn release(&self) -> Result<()> {
        let dir = self.dir.lock().take();
        if let Some(dir) = dir {
            debug!(root = %self.path.display(), "Removing staging root");
            dir.close()
                .map_err(|e| EngineError::Teardown(vec![format!("{}: {e}", self.path.display())]))?;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

async fn create_dir(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| EngineError::io(format!("creating {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use doorstep_engine::ProcessorMetadata;

    fn definition() -> ProcessorDefinition {
        let mut metadata = ProcessorMetadata::for_module("pii.py");
        metadata.settings.insert("threshold".into(), json!(2));
        ProcessorDefinition {
            name: "pii-1".into(),
            module: Some("pii.py".into()),
            content: Some(b"print('hi')".to_vec()),
            metadata,
        }
    }

    #[tokio::test]
    async fn test_stage_processor_layout_and_env() {
        let root = StagingRoot::new().unwrap();
        root.stage_data("people.csv", b"a\n").await.unwrap();
        let spec = root
            .stage_processor(
                &reqwest::Client::new(),
                "doorstep-s",
                &definition(),
                "people.csv",
                &ContainerEngineConfig::default(),
            )
            .await
            .unwrap();

        let dir = root.processor_dir("pii-1");
        assert_eq!(std::fs::read(dir.join("pii.py")).unwrap(), b"print('hi')");
        let metadata: Value =
            serde_json::from_slice(&std::fs::read(dir.join("metadata.json")).unwrap()).unwrap();
        assert_eq!(metadata["name"], "pii-1");
        assert_eq!(metadata["settings"]["threshold"], 2);
        assert!(root.data_dir().join("people.csv").exists());
        assert!(root.path().join("out/raw").is_dir());

        assert_eq!(spec.image, "lintol/doorstep:latest");
        assert_eq!(spec.env("LINTOL_PROCESSOR_DIRECTORY"), Some("/pfs/processors/pii-1"));
        assert_eq!(spec.env("LINTOL_OUTPUT_FILE"), Some("/pfs/out/raw/pii-1.json"));
        assert_eq!(
            spec.env("LINTOL_METADATA"),
            Some("/pfs/processors/pii-1/metadata.json")
        );
        assert_eq!(spec.env("LINTOL_INPUT_DATA"), Some("/pfs/data"));
        assert_eq!(spec.env("LINTOL_DATA_FILE"), Some("people.csv"));
        assert_eq!(spec.env("LANG"), Some("C.UTF-8"));
        assert_eq!(spec.mounts[0].target, "/pfs");
    }

    #[tokio::test]
    async fn test_release_removes_root() {
        let root = StagingRoot::new().unwrap();
        let path = root.path().to_path_buf();
        assert!(path.exists());
        root.release().await.unwrap();
        assert!(!path.exists());
        root.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_stage_processor_rejects_escaping_name() {
        let root = StagingRoot::new().unwrap();
        let mut definition = definition();
        definition.name = "../../escape".into();

        let err = root
            .stage_processor(
                &reqwest::Client::new(),
                "doorstep-s",
                &definition,
                "people.csv",
                &ContainerEngineConfig::default(),
            )
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(!root.path().join("escape").exists());
        assert!(!root.path().parent().unwrap().join("escape").exists());
        assert!(!root.path().join("processors").exists());
    }

    #[tokio::test]
    async fn test_stage_processor_rejects_dot_dot_module() {
        let root = StagingRoot::new().unwrap();
        let mut definition = definition();
        definition.module = Some("..".into());

        let err = root
            .stage_processor(
                &reqwest::Client::new(),
                "doorstep-s",
                &definition,
                "people.csv",
                &ContainerEngineConfig::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::Configuration("invalid module name '..'".into())
        );
    }
}
