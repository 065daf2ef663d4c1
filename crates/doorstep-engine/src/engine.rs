//! The contract every execution backend implements.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use doorstep_report::Report;
use tracing::{error, info};

use crate::definition::{ProcessorIni, ProcessorMetadata};
use crate::error::{EngineError, Result};
use crate::file::{base_name, make_file_manager};
use crate::session::{CancelHandle, Completion, Session};

/// An execution backend.
///
/// A caller obtains a session, attaches one data file and some processors,
/// starts the run with [`Engine::monitor_pipeline`], and reads the report
/// with [`Engine::get_output`]. [`with_session`] wraps the session in a
/// scope that always tears it down.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Short description for listings.
    fn description(&self) -> &'static str;

    /// Acquire the backend resources for one run.
    ///
    /// Callers must close the returned session; [`with_session`] does so on
    /// every exit path.
    async fn make_session(&self) -> Result<Arc<Session>>;

    /// Attach the input file.
    ///
    /// With `redirect`, `content` is a reference (URL or local path) for the
    /// backend to dereference rather than the data itself.
    async fn add_data(
        &self,
        session: &Session,
        filename: &str,
        content: Vec<u8>,
        redirect: bool,
    ) -> Result<()>;

    /// Attach every processor described by `ini`, taking module sources
    /// from `modules`.
    async fn add_processor(
        &self,
        session: &Session,
        modules: &HashMap<String, Vec<u8>>,
        ini: &ProcessorIni,
    ) -> Result<()>;

    /// Start the run in the background.
    ///
    /// Succeeds once per session. The returned [`Completion`] resolves
    /// exactly once, with the report or the single failure of the run.
    async fn monitor_pipeline(&self, session: &Arc<Session>) -> Result<(CancelHandle, Completion)>;

    /// Wait for the run and return its report, or its stored failure.
    ///
    /// Safe to call repeatedly.
    async fn get_output(&self, session: &Session) -> Result<Report> {
        session.output().await
    }

    /// One-shot run of a single processor module over a data file.
    ///
    /// `filename` is resolved through the bucket when one is given.
    async fn run(
        &self,
        filename: &str,
        workflow_module: &Path,
        metadata: ProcessorMetadata,
        bucket: Option<&str>,
    ) -> Result<Report> {
        let module_name = workflow_module
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                EngineError::Configuration(format!(
                    "not a module file: {}",
                    workflow_module.display()
                ))
            })?;
        let module = tokio::fs::read(workflow_module)
            .await
            .map_err(|e| EngineError::io(format!("reading {}", workflow_module.display()), e))?;

        let files = make_file_manager(bucket)?;
        let local = files.get(filename).await?;
        let content = tokio::fs::read(&local)
            .await
            .map_err(|e| EngineError::io(format!("reading {}", local.display()), e))?;

        let mut modules = HashMap::new();
        modules.insert(module_name.clone(), module);
        let ini = ProcessorIni::single(
            "processor",
            ProcessorMetadata {
                module: Some(module_name),
                ..metadata
            },
        );
        let data_name = base_name(filename).to_string();

        with_session(self, |session| async move {
            self.add_data(&session, &data_name, content, false).await?;
            self.add_processor(&session, &modules, &ini).await?;
            self.monitor_pipeline(&session).await?;
            self.get_output(&session).await
        })
        .await
    }
}

/// Run `body` with a fresh session, closing it afterwards whatever happens.
///
/// A failure of `body` takes precedence over a teardown failure, which is
/// then logged.
pub async fn with_session<E, F, Fut, T>(engine: &E, body: F) -> Result<T>
where
    E: Engine + ?Sized,
    F: FnOnce(Arc<Session>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let session = engine.make_session().await?;
    info!(session = %session.name(), engine = engine.description(), "Session opened");

    let outcome = body(Arc::clone(&session)).await;
    let teardown = session.close().await;

    match (outcome, teardown) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(teardown)) => Err(teardown),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(teardown)) => {
            error!(session = %session.name(), error = %teardown, "Teardown failed after run failure");
            Err(e)
        }
    }
}
