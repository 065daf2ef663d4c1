//! The pipeline-cluster engine.
//!
//! A session owns two input repos (`<name>-data`, `<name>-processors`) and
//! a pipeline `<name>` crossing them, whose output repo shares its name.
//! Processors are committed under `/<uid>/` in the processors repo, the
//! data file at `/<filename>` in the data repo. The run is over when the
//! output repo publishes a commit derived from exactly the two input repos;
//! each processor's report is then read from `/raw/<uid>.json`.
//!
//! Job polling runs alongside the commit watch. It only surfaces failures
//! early: a failed, killed or stalled job ends the run, but the report
//! always comes from the output commit.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use doorstep_config::{DoorstepConfig, ImageRef};
use doorstep_engine::{
    CancelHandle, Completion, DataFile, DataSource, Engine, EngineError, ProcessorDefinition,
    ProcessorIni, ProcessorMetadata, Result, RetryPolicy, Session, SessionResources, base_name,
    with_session,
};
use doorstep_report::{Report, combine_reports};
use serde_json::json;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{ClusterClient, CommitInfo, HttpClusterClient};
use crate::pipeline::{Pipeline, PipelineTemplate};
use crate::repo::{FileContent, Repo};
use crate::watch::{CommitWatcher, wait_for_output};

/// Settings of the cluster engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterEngineConfig {
    pub branch: String,
    /// Polls allowed for the job to start.
    pub retry_count: u32,
    /// Polls allowed for a started job to finish.
    pub retry_processing_count: u32,
    pub retry_delay: Duration,
    /// Attempts per cluster call before a transient failure is final.
    pub call_attempts: u32,
    pub watch_timeout: Duration,
    /// Image of the pipeline and of processors that do not name one.
    pub default_image: String,
    pub default_revision: String,
    pub lang: String,
    pub allowed_images: Vec<ImageRef>,
}

impl ClusterEngineConfig {
    pub fn from_config(config: &DoorstepConfig) -> Self {
        let cluster = config.cluster();
        let container = config.container();
        Self {
            branch: cluster.branch,
            retry_count: cluster.retry_count,
            retry_processing_count: cluster.retry_processing_count,
            retry_delay: Duration::from_millis(cluster.retry_delay_ms),
            call_attempts: cluster.call_attempts,
            watch_timeout: Duration::from_millis(cluster.watch_timeout_ms),
            default_image: container.default_image,
            default_revision: container.default_revision,
            lang: container.lang,
            allowed_images: config.allowed_images(),
        }
    }

    /// Retry of individual cluster calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.call_attempts, self.retry_delay)
    }

    fn default_docker_image(&self) -> String {
        format!("{}:{}", self.default_image, self.default_revision)
    }

    /// How long to wait for the output commit once the job has succeeded.
    fn output_grace(&self) -> Duration {
        (self.retry_delay * self.retry_processing_count).max(self.watch_timeout * 4)
    }
}

impl Default for ClusterEngineConfig {
    fn default() -> Self {
        Self::from_config(&DoorstepConfig::default())
    }
}

/// Cluster objects backing one session. Deleted when the session closes.
pub struct ClusterResources {
    data: Repo,
    processors: Repo,
    pipeline: Pipeline,
    data_file: watch::Sender<Option<String>>,
    released: AtomicBool,
}

impl ClusterResources {
    pub fn data(&self) -> &Repo {
        &self.data
    }

    pub fn processors(&self) -> &Repo {
        &self.processors
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The provenance an output commit of this session carries.
    pub fn inputs(&self) -> BTreeSet<String> {
        BTreeSet::from([self.data.name().to_string(), self.processors.name().to_string()])
    }

    /// Name of the committed data file, once there is one.
    pub fn data_file(&self) -> Option<String> {
        self.data_file.borrow().clone()
    }

    async fn wait_for_data(&self) -> Result<String> {
        let mut rx = self.data_file.subscribe();
        let data_file = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| EngineError::Session("session resources dropped".to_string()))?;
        Ok(data_file.clone().unwrap_or_default())
    }
}

#[async_trait]
impl SessionResources for ClusterResources {
    /// Delete the pipeline and both repos, attempting every deletion.
    async fn release(&self) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut failures = Vec::new();
        if let Err(e) = self.pipeline.delete().await {
            failures.push(format!("pipeline {}: {e}", self.pipeline.name()));
        }
        for repo in [&self.processors, &self.data] {
            if let Err(e) = repo.delete().await {
                failures.push(format!("repo {}: {e}", repo.name()));
            }
        }

        if failures.is_empty() {
            info!(pipeline = %self.pipeline.name(), "Deleted pipeline and repos");
            Ok(())
        } else {
            Err(EngineError::Teardown(failures))
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Runs processors as a pipeline on a repo/commit/pipeline cluster.
#[derive(Clone)]
pub struct ClusterEngine {
    client: Arc<dyn ClusterClient>,
    config: Arc<ClusterEngineConfig>,
    template: Arc<PipelineTemplate>,
}

impl ClusterEngine {
    pub fn new(client: Arc<dyn ClusterClient>, config: ClusterEngineConfig) -> Result<Self> {
        let template = PipelineTemplate::new(config.allowed_images.clone())?;
        Ok(Self {
            client,
            config: Arc::new(config),
            template: Arc::new(template),
        })
    }

    /// Engine talking to the configured cluster endpoint. Must be called
    /// within a tokio runtime.
    pub fn from_config(config: &DoorstepConfig) -> Result<Self> {
        let client = HttpClusterClient::new(config.cluster().endpoint);
        Self::new(Arc::new(client), ClusterEngineConfig::from_config(config))
    }

    pub fn config(&self) -> &ClusterEngineConfig {
        &self.config
    }

    fn resources(session: &Session) -> Result<&ClusterResources> {
        session.resources::<ClusterResources>().ok_or_else(|| {
            EngineError::Session(format!(
                "session {} was not created by this engine",
                session.name()
            ))
        })
    }

    /// Attach a data file the cluster reads straight from `bucket`.
    pub async fn add_data_from_bucket(
        &self,
        session: &Session,
        filename: &str,
        bucket: &str,
        key: &str,
    ) -> Result<()> {
        let url = format!("s3://{bucket}/{key}");
        self.commit_data(session, filename, FileContent::Url(url)).await
    }

    async fn commit_data(&self, session: &Session, filename: &str, content: FileContent) -> Result<()> {
        let resources = Self::resources(session)?;
        if resources.data_file.borrow().is_some() {
            return Err(EngineError::Session(
                "session already has data".to_string(),
            ));
        }
        let basename = base_name(filename).to_string();
        let commit = resources
            .data
            .commit(vec![(format!("/{basename}"), content)])
            .await?;
        debug!(session = %session.name(), commit = %commit.full_name(), "Committed data");
        resources.data_file.send_replace(Some(basename));
        Ok(())
    }

    fn processor_files(&self, definition: &ProcessorDefinition) -> Result<Vec<(String, FileContent)>> {
        let metadata = &definition.metadata;
        let image = metadata.docker_image(&self.config.default_image, &self.config.default_revision);
        if !self.config.allowed_images.iter().any(|a| a.matches(&image)) {
            warn!(processor = %definition.name, %image, "Rejected image outside the allow-list");
            return Err(EngineError::DisallowedImage(image));
        }
        let lang = metadata.lang.clone().unwrap_or_else(|| self.config.lang.clone());

        let document = json!({
            "name": definition.name,
            "definition": metadata.definition,
            "configuration": metadata.configuration,
            "settings": metadata.settings,
            "supplementary": metadata.supplementary,
            "context": metadata.context,
        });
        let document = serde_json::to_vec(&document).map_err(|e| {
            EngineError::Configuration(format!("metadata for {}: {e}", definition.name))
        })?;

        let uid = &definition.name;
        let mut files = vec![
            (format!("/{uid}/metadata.json"), FileContent::Bytes(document)),
            (format!("/{uid}/LANG"), FileContent::Bytes(lang.into_bytes())),
            (format!("/{uid}/IMAGE"), FileContent::Bytes(image.into_bytes())),
        ];
        if let (Some(module), Some(content)) = (&definition.module, &definition.content) {
            files.push((
                format!("/{uid}/{}", base_name(module)),
                FileContent::Bytes(content.clone()),
            ));
        }
        Ok(files)
    }

    /// Wait for the output commit, failing early on job failure.
    ///
    /// The commit watch is stopped before returning, cancelled or not.
    async fn await_output(
        &self,
        resources: &ClusterResources,
        cancel: &CancellationToken,
    ) -> Result<CommitInfo> {
        let pipeline = &resources.pipeline;
        let (mut watcher, mut commits) = CommitWatcher::start(
            Arc::clone(&self.client),
            pipeline.name(),
            self.config.branch.clone(),
            self.config.watch_timeout,
        );
        let inputs = resources.inputs();

        let result: Result<CommitInfo> = async {
            let output = wait_for_output(&mut commits, &inputs);
            let job = pipeline
                .wait_for_completion(self.config.retry_count, self.config.retry_processing_count);
            tokio::pin!(output, job);

            tokio::select! {
                _ = cancel.cancelled() => Err(EngineError::Cancelled),
                commit = &mut output => commit,
                job = &mut job => {
                    let job = job?;
                    info!(pipeline = %pipeline.name(), job = %job.id, "Job finished, waiting for output commit");
                    let grace = tokio::time::timeout(self.config.output_grace(), output);
                    tokio::select! {
                        _ = cancel.cancelled() => Err(EngineError::Cancelled),
                        commit = grace => commit.map_err(|_| EngineError::PipelineWaitTimeout {
                            attempts: self.config.retry_processing_count,
                            stage: "publish output".to_string(),
                        })?,
                    }
                }
            }
        }
        .await;

        watcher.stop().await;
        result
    }

    /// Pull and merge every processor's report from the output commit.
    async fn collect_reports(
        &self,
        resources: &ClusterResources,
        commit: &CommitInfo,
        processors: &[ProcessorDefinition],
    ) -> Result<Report> {
        let mut reports = Vec::with_capacity(processors.len());
        for definition in processors {
            let path = format!("/raw/{}.json", definition.name);
            let bytes = resources
                .pipeline
                .output()
                .pull_file_at(&commit.id, &path)
                .await
                .map_err(|e| match e {
                    EngineError::Transport {
                        status_code: Some(404),
                        ..
                    } => EngineError::MissingOutput {
                        processor: definition.name.clone(),
                        path: path.clone(),
                    },
                    other => other.for_processor(&definition.name),
                })?;
            let report = Report::load(bytes.as_slice()).map_err(|e| EngineError::MalformedOutput {
                processor: definition.name.clone(),
                message: e.to_string(),
            })?;
            reports.push(report);
        }

        let mut base = Report::empty(reports[0].preset());
        if let Some(filename) = resources.data_file() {
            base = base.with_filename(filename);
        }
        Ok(combine_reports(&reports, Some(base))?)
    }

    /// The run proper. Starts once data is committed, so processors may be
    /// attached after monitoring begins.
    ///
    /// Cancellation is observed at every wait, so that background work such
    /// as the commit watch is wound down before the run returns.
    async fn run_pipeline(&self, session: &Session, cancel: &CancellationToken) -> Result<Report> {
        let resources = Self::resources(session)?;
        tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            data = resources.wait_for_data() => data?,
        };
        let processors = session.processors();
        if processors.is_empty() {
            return Err(EngineError::Configuration(
                "no processors attached to session".to_string(),
            ));
        }

        let commit = self.await_output(resources, cancel).await?;
        info!(session = %session.name(), commit = %commit.id, "Output committed");
        tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            report = self.collect_reports(resources, &commit, &processors) => report,
        }
    }

    /// Remove whatever `make_session` managed to create before failing.
    async fn abandon(repos: &[&Repo]) {
        for repo in repos {
            if let Err(e) = repo.delete().await {
                warn!(repo = %repo.name(), error = %e, "Failed to remove repo of abandoned session");
            }
        }
    }
}

#[async_trait]
impl Engine for ClusterEngine {
    fn description(&self) -> &'static str {
        "Run processors as a pipeline on a cluster"
    }

    async fn make_session(&self) -> Result<Arc<Session>> {
        let name = format!("doorstep-{}", Uuid::new_v4());
        let branch = self.config.branch.as_str();
        let client = Arc::clone(&self.client);

        let retry = self.config.retry_policy();

        let data = Repo::create(Arc::clone(&client), format!("{name}-data"), branch, retry).await?;
        let processors = match Repo::create(
            Arc::clone(&client),
            format!("{name}-processors"),
            branch,
            retry,
        )
        .await
        {
                Ok(repo) => repo,
                Err(e) => {
                    Self::abandon(&[&data]).await;
                    return Err(e);
                }
            };

        let pipeline = match self.template.render(
            &name,
            data.name(),
            processors.name(),
            &self.config.default_docker_image(),
        ) {
            Ok(definition) => {
                Pipeline::create(client, definition, branch, retry).await
            }
            Err(e) => Err(e),
        };
        let pipeline = match pipeline {
            Ok(pipeline) => pipeline,
            Err(e) => {
                Self::abandon(&[&processors, &data]).await;
                return Err(e);
            }
        };

        let resources = ClusterResources {
            data,
            processors,
            pipeline,
            data_file: watch::channel(None).0,
            released: AtomicBool::new(false),
        };
        info!(session = %name, "Cluster session ready");
        Ok(Arc::new(Session::named(name).with_resources(Arc::new(resources))))
    }

    async fn add_data(
        &self,
        session: &Session,
        filename: &str,
        content: Vec<u8>,
        redirect: bool,
    ) -> Result<()> {
        let content = match DataSource::from_post(content, redirect)? {
            DataSource::Url(url) => FileContent::Url(url),
            local => FileContent::Bytes(DataFile::new(filename, local).content().await?),
        };
        self.commit_data(session, filename, content).await
    }

    async fn add_processor(
        &self,
        session: &Session,
        modules: &HashMap<String, Vec<u8>>,
        ini: &ProcessorIni,
    ) -> Result<()> {
        let resources = Self::resources(session)?;
        let definitions = ProcessorDefinition::collect(modules, ini)?;

        let mut files = Vec::new();
        for definition in &definitions {
            files.extend(self.processor_files(definition)?);
        }
        let commit = resources.processors.commit(files).await?;
        debug!(session = %session.name(), commit = %commit.full_name(), "Committed processors");

        session.add_processors(definitions);
        Ok(())
    }

    async fn monitor_pipeline(&self, session: &Arc<Session>) -> Result<(CancelHandle, Completion)> {
        Self::resources(session)?;
        let slot = session.take_result_slot()?;
        let token = session.cancel_token();
        let engine = self.clone();
        let task_session = Arc::clone(session);

        let handle = tokio::spawn(async move {
            let outcome = engine.run_pipeline(&task_session, &token).await;
            slot.fill(outcome);
        });
        session.track(handle);

        Ok((session.cancel_handle(), session.completion()))
    }

    /// One-shot run. With a bucket, the cluster reads `filename` from the
    /// bucket itself instead of receiving its bytes.
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
        let modules = HashMap::from([(module_name.clone(), module)]);
        let ini = ProcessorIni::single(
            "processor",
            ProcessorMetadata {
                module: Some(module_name),
                ..metadata
            },
        );

        with_session(self, |session| async move {
            match bucket {
                Some(bucket) => {
                    self.add_data_from_bucket(&session, filename, bucket, filename)
                        .await?
                }
                None => {
                    let content = tokio::fs::read(filename)
                        .await
                        .map_err(|e| EngineError::io(format!("reading {filename}"), e))?;
                    self.add_data(&session, filename, content, false).await?
                }
            }
            self.add_processor(&session, &modules, &ini).await?;
            self.monitor_pipeline(&session).await?;
            self.get_output(&session).await
        })
        .await
    }
}
