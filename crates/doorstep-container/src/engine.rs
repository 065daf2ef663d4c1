//! The container engine.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use doorstep_config::DoorstepConfig;
use doorstep_engine::{
    CancelHandle, Completion, DataFile, DataSource, Engine, EngineError, ProcessorDefinition,
    ProcessorIni, Result, Session, base_name,
};
use doorstep_report::{Report, combine_reports};
use tracing::{debug, info, warn};

use crate::config::ContainerEngineConfig;
use crate::runtime::{ContainerRuntime, DockerCliRuntime};
use crate::staging::StagingRoot;

/// Runs each processor in its own isolated container.
///
/// Every session gets a staging root (see [`StagingRoot`]); containers run
/// one after another, each writing its report to `out/raw/<name>.json`,
/// and the reports are merged once all have exited.
#[derive(Clone)]
pub struct ContainerEngine {
    runtime: Arc<dyn ContainerRuntime>,
    config: ContainerEngineConfig,
    http: reqwest::Client,
}

impl ContainerEngine {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: ContainerEngineConfig) -> Self {
        Self {
            runtime,
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Engine driving the configured container CLI.
    pub fn from_config(config: &DoorstepConfig) -> Self {
        let runtime = DockerCliRuntime::new(config.container().binary);
        Self::new(Arc::new(runtime), ContainerEngineConfig::from_config(config))
    }

    pub fn config(&self) -> &ContainerEngineConfig {
        &self.config
    }

    fn check_image(&self, definition: &ProcessorDefinition) -> Result<()> {
        let image = definition
            .metadata
            .docker_image(&self.config.default_image, &self.config.default_revision);
        if self.config.is_allowed(&image) {
            Ok(())
        } else {
            warn!(processor = %definition.name, %image, "Rejected image outside the allow-list");
            Err(EngineError::DisallowedImage(image))
        }
    }

    async fn run_containers(
        &self,
        session: &str,
        root: &StagingRoot,
        file: &DataFile,
        processors: &[ProcessorDefinition],
    ) -> Result<Report> {
        if processors.is_empty() {
            return Err(EngineError::Configuration(
                "no processors attached to session".to_string(),
            ));
        }

        let data_basename = base_name(&file.filename).to_string();
        let content = file.content().await?;
        root.stage_data(&data_basename, &content).await?;

        for definition in processors {
            let spec = root
                .stage_processor(&self.http, session, definition, &data_basename, &self.config)
                .await?;

            info!(session, processor = %definition.name, image = %spec.image, "Running container");
            let output = self
                .runtime
                .run(&spec)
                .await
                .map_err(|e| e.for_processor(&definition.name))?;

            if !output.success {
                return Err(EngineError::Container {
                    status_code: output.exit_code,
                    processor: definition.name.clone(),
                    message: output.stderr,
                });
            }
            debug!(session, processor = %definition.name, "Container exited cleanly");
        }

        let mut reports = Vec::with_capacity(processors.len());
        for definition in processors {
            reports.push(read_report(root, &definition.name).await?);
        }

        let base = Report::empty(reports[0].preset()).with_filename(data_basename);
        Ok(combine_reports(&reports, Some(base))?)
    }
}

/// Read and parse one processor's report. Missing or malformed output is
/// fatal for the run.
async fn read_report(root: &StagingRoot, processor: &str) -> Result<Report> {
    let path = root.output_file(processor);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| EngineError::MissingOutput {
            processor: processor.to_string(),
            path: path.display().to_string(),
        })?;
    Report::load(bytes.as_slice()).map_err(|e| EngineError::MalformedOutput {
        processor: processor.to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl Engine for ContainerEngine {
    fn description(&self) -> &'static str {
        "Run processors in local containers"
    }

    async fn make_session(&self) -> Result<Arc<Session>> {
        let root = Arc::new(StagingRoot::new()?);
        let session = Session::new().with_resources(root.clone());
        debug!(session = %session.name(), root = %root.path().display(), "Created staging root");
        Ok(Arc::new(session))
    }

    async fn add_data(
        &self,
        session: &Session,
        filename: &str,
        content: Vec<u8>,
        redirect: bool,
    ) -> Result<()> {
        let source = DataSource::from_post(content, redirect)?;
        session.offer_data(DataFile::new(filename, source))
    }

    async fn add_processor(
        &self,
        session: &Session,
        modules: &HashMap<String, Vec<u8>>,
        ini: &ProcessorIni,
    ) -> Result<()> {
        let definitions = ProcessorDefinition::collect(modules, ini)?;
        for definition in &definitions {
            self.check_image(definition)?;
        }
        session.add_processors(definitions);
        Ok(())
    }

    async fn monitor_pipeline(&self, session: &Arc<Session>) -> Result<(CancelHandle, Completion)> {
        if session.resources::<StagingRoot>().is_none() {
            return Err(EngineError::Session(format!(
                "session {} was not created by this engine",
                session.name()
            )));
        }
        let slot = session.take_result_slot()?;
        let mut data = session.take_data()?;
        let token = session.cancel_token();
        let engine = self.clone();
        let task_session = Arc::clone(session);

        let handle = tokio::spawn(async move {
            let run = async {
                let file = data
                    .recv()
                    .await
                    .ok_or_else(|| EngineError::Session("data queue closed".to_string()))?;
                let root = task_session.resources::<StagingRoot>().ok_or_else(|| {
                    EngineError::Session("staging root missing".to_string())
                })?;
                engine
                    .run_containers(task_session.name(), root, &file, &task_session.processors())
                    .await
            };
            let outcome = tokio::select! {
                _ = token.cancelled() => Err(EngineError::Cancelled),
                outcome = run => outcome,
            };
            slot.fill(outcome);
        });
        session.track(handle);

        Ok((session.cancel_handle(), session.completion()))
    }
}
