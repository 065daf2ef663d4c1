//! CLI command handlers.

pub mod config;
pub mod process;
pub mod processors;
pub mod serve;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use doorstep_cluster::ClusterEngine;
use doorstep_config::{ConfigSource, DoorstepConfig, EngineKind, LoadedConfig};
use doorstep_container::ContainerEngine;
use doorstep_engine::{Engine, LocalEngine};
use tracing::{debug, warn};

use crate::builtin;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// The merged configuration.
    pub config: DoorstepConfig,
    /// Config files that were considered, lowest precedence first.
    pub sources: Vec<ConfigSource>,
    /// Engine selected by flag or configuration.
    pub engine: EngineKind,
    pub bucket: Option<String>,
    pub verbose: bool,
}

impl Context {
    /// Load configuration, from `config_file` alone when given, and apply
    /// command-line overrides.
    pub fn load(
        config_file: Option<&Path>,
        engine: Option<EngineKind>,
        bucket: Option<String>,
        verbose: bool,
    ) -> Result<Self> {
        let loaded = match config_file {
            Some(path) => LoadedConfig {
                config: doorstep_config::load_config_file(path)
                    .with_context(|| format!("loading {}", path.display()))?,
                sources: vec![ConfigSource {
                    path: path.to_path_buf(),
                    loaded: true,
                }],
                warnings: Vec::new(),
            },
            None => doorstep_config::load_config(None)?,
        };
        for warning in &loaded.warnings {
            warn!("{warning}");
        }

        let engine = engine.unwrap_or_else(|| loaded.config.engine_kind());
        debug!(%engine, "Engine selected");

        Ok(Self {
            config: loaded.config,
            sources: loaded.sources,
            engine,
            bucket,
            verbose,
        })
    }

    /// Build the selected engine.
    pub fn make_engine(&self) -> Result<Arc<dyn Engine>> {
        let engine: Arc<dyn Engine> = match self.engine {
            EngineKind::Local => Arc::new(LocalEngine::new(builtin::registry())),
            EngineKind::Container => Arc::new(ContainerEngine::from_config(&self.config)),
            EngineKind::Cluster => Arc::new(ClusterEngine::from_config(&self.config)?),
        };
        Ok(engine)
    }
}
