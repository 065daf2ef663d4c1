//! In-process engine.
//!
//! Runs registered processors directly, one after another, against files
//! written to a private temporary directory. Processors are synchronous, so
//! a run happens on the blocking pool. Cancelling a session abandons a run
//! in progress rather than interrupting it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use doorstep_report::{Report, combine_reports};
use tracing::{debug, info};

use crate::data::{DataFile, DataSource};
use crate::definition::{ProcessorDefinition, ProcessorIni};
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::file::ContentFileManager;
use crate::processor::ProcessorRegistry;
use crate::session::{CancelHandle, Completion, Session};

/// Engine that executes processors from a [`ProcessorRegistry`].
#[derive(Debug, Clone)]
pub struct LocalEngine {
    registry: Arc<ProcessorRegistry>,
}

impl LocalEngine {
    pub fn new(registry: ProcessorRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }
}

#[async_trait]
impl Engine for LocalEngine {
    fn description(&self) -> &'static str {
        "Run processors in this process"
    }

    async fn make_session(&self) -> Result<Arc<Session>> {
        Ok(Arc::new(Session::new()))
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
            let module = definition.module.as_deref().unwrap_or(&definition.name);
            if !self.registry.contains(module) {
                return Err(EngineError::Configuration(format!(
                    "no processor registered for module '{module}'"
                )));
            }
        }
        session.add_processors(definitions);
        Ok(())
    }

    async fn monitor_pipeline(&self, session: &Arc<Session>) -> Result<(CancelHandle, Completion)> {
        let slot = session.take_result_slot()?;
        let mut data = session.take_data()?;
        let token = session.cancel_token();
        let registry = Arc::clone(&self.registry);
        let task_session = Arc::clone(session);

        debug!(session = %session.name(), "Waiting for processor and data");
        let handle = tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = token.cancelled() => Err(EngineError::Cancelled),
                file = data.recv() => match file {
                    Some(file) => run_processors(registry, &file, task_session.processors()).await,
                    None => Err(EngineError::Session("data queue closed".to_string())),
                },
            };
            slot.fill(outcome);
        });
        session.track(handle);

        Ok((session.cancel_handle(), session.completion()))
    }
}

/// Run every processor over `file` and merge their reports.
async fn run_processors(
    registry: Arc<ProcessorRegistry>,
    file: &DataFile,
    processors: Vec<ProcessorDefinition>,
) -> Result<Report> {
    if processors.is_empty() {
        return Err(EngineError::Configuration(
            "no processors attached to session".to_string(),
        ));
    }

    let content = file.content().await?;
    let filename = file.filename.clone();
    tokio::task::spawn_blocking(move || check_content(&registry, &filename, &content, processors))
        .await
        .map_err(|e| EngineError::Session(format!("processor run did not complete: {e}")))?
}

fn check_content(
    registry: &ProcessorRegistry,
    filename: &str,
    content: &[u8],
    processors: Vec<ProcessorDefinition>,
) -> Result<Report> {
    let mut reports = Vec::with_capacity(processors.len());

    for definition in processors {
        let module = definition
            .module
            .clone()
            .unwrap_or_else(|| definition.name.clone());
        let processor = registry.create(&module).ok_or_else(|| {
            EngineError::Configuration(format!("no processor registered for module '{module}'"))
        })?;

        let mut contents: Vec<(&str, &[u8])> = vec![(filename, content)];
        if let Some(source) = &definition.content {
            contents.push((module.as_str(), source.as_slice()));
        }
        let files = ContentFileManager::new(contents)?;
        let local = files.path(filename)?;

        info!(processor = %definition.name, module = %module, "Running processor");
        let workflow = processor.build_workflow(&local, &definition.metadata)?;
        let report = processor
            .make_report()
            .with_filename(filename.to_string())
            .with_context(definition.metadata.report_context());
        let report = workflow.run(processor.code(), report, &local, &definition.metadata)?;
        reports.push(report);
    }

    Ok(combine_reports(&reports, None)?)
}
