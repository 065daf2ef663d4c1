//! Pipelines: definition, creation and job polling.

use std::sync::Arc;
use doorstep_config::ImageRef;
use doorstep_engine::{EngineError, Result, RetryPolicy};
use parking_lot::Mutex;
use serde_json::Value;
use tera::{Context, Tera};
use tracing::{debug, error, info};

use crate::client::{ClusterClient, call};
use crate::error::ClusterError;
use crate::job::{JobInfo, JobState};
use crate::repo::Repo;

const TEMPLATE_NAME: &str = "doorstep.json";
const TEMPLATE: &str = include_str!("../templates/doorstep.json");

/// Renders pipeline definitions from the bundled template.
pub struct PipelineTemplate {
    tera: Tera,
    allowed_images: Vec<ImageRef>,
}

impl PipelineTemplate {
    pub fn new(allowed_images: Vec<ImageRef>) -> Result<Self> {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        tera.add_raw_template(TEMPLATE_NAME, TEMPLATE)
            .map_err(ClusterError::from)?;
        Ok(Self {
            tera,
            allowed_images,
        })
    }

    /// Definition of pipeline `name` crossing `processors` with `data`,
    /// running `image`. The image must be on the allow-list.
    pub fn render(&self, name: &str, data: &str, processors: &str, image: &str) -> Result<Value> {
        if !self.allowed_images.iter().any(|allowed| allowed.matches(image)) {
            return Err(EngineError::DisallowedImage(image.to_string()));
        }

        let valid_images: Vec<String> = self.allowed_images.iter().map(ToString::to_string).collect();
        let mut context = Context::new();
        context.insert("name", name);
        context.insert("data", data);
        context.insert("processors", processors);
        context.insert("image", image);
        context.insert("valid_images", &valid_images);

        let rendered = self
            .tera
            .render(TEMPLATE_NAME, &context)
            .map_err(ClusterError::from)?;
        serde_json::from_str(&rendered)
            .map_err(|e| EngineError::Configuration(format!("pipeline definition: {e}")))
    }
}

/// A pipeline on the cluster. Its output repo shares its name.
pub struct Pipeline {
    name: String,
    client: Arc<dyn ClusterClient>,
    output: Repo,
    retry: RetryPolicy,
    current_job: Mutex<Option<JobInfo>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("current_job", &*self.current_job.lock())
            .finish()
    }
}

impl Pipeline {
    /// Handle on an existing pipeline.
    ///
    /// `retry` governs both the retry of failed calls and the delay between
    /// job polls.
    pub fn new(
        client: Arc<dyn ClusterClient>,
        name: impl Into<String>,
        branch: &str,
        retry: RetryPolicy,
    ) -> Self {
        let name = name.into();
        Self {
            output: Repo::new(Arc::clone(&client), name.clone(), branch, retry),
            name,
            client,
            retry,
            current_job: Mutex::new(None),
        }
    }

    /// Submit `definition` and return a handle on the new pipeline.
    pub async fn create(
        client: Arc<dyn ClusterClient>,
        definition: Value,
        branch: &str,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let name = definition["pipeline"]["name"]
            .as_str()
            .ok_or_else(|| EngineError::Configuration("pipeline definition has no name".into()))?
            .to_string();
        call(&client, retry, move |c| c.create_pipeline(&definition)).await?;
        info!(pipeline = %name, "Created pipeline");
        Ok(Self::new(client, name, branch, retry))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output(&self) -> &Repo {
        &self.output
    }

    pub fn current_job(&self) -> Option<JobInfo> {
        self.current_job.lock().clone()
    }

    /// The pipeline's job, if one has been observed.
    async fn check_started(&self) -> Result<Option<JobInfo>> {
        let name = self.name.clone();
        let jobs = call(&self.client, self.retry, move |c| c.list_jobs(&name)).await?;
        Ok(jobs.into_iter().next())
    }

    /// Poll until the job reaches a state outside `ignore_states`.
    ///
    /// Polls at most `retry_count` times, calling `tick` with the attempt
    /// number before each poll and sleeping the retry delay between polls.
    /// A poll that fails transiently is retried before it counts as failed.
    /// A job that is not observed yet counts as `NOT_STARTED`. A job found
    /// `FAILURE` or `KILLED` fails with its logs.
    pub async fn wait_for_run(
        &self,
        retry_count: u32,
        ignore_states: &[JobState],
        mut tick: impl FnMut(u32) + Send,
    ) -> Result<JobInfo> {
        for attempt in 1..=retry_count {
            if attempt > 1 {
                tokio::time::sleep(self.retry.delay).await;
            }
            tick(attempt);

            let job = self.check_started().await?;
            let state = job.as_ref().map_or(JobState::NotStarted, |j| j.state);
            debug!(pipeline = %self.name, attempt, %state, "Polled job");

            if let Some(job) = job {
                *self.current_job.lock() = Some(job.clone());
                if !ignore_states.contains(&job.state) {
                    self.check(&job).await?;
                    return Ok(job);
                }
            }
        }

        Err(EngineError::PipelineWaitTimeout {
            attempts: retry_count,
            stage: "change state".to_string(),
        })
    }

    /// Fail if the job ended unsuccessfully.
    async fn check(&self, job: &JobInfo) -> Result<()> {
        if !matches!(job.state, JobState::Failure | JobState::Killed) {
            return Ok(());
        }
        let id = job.id.clone();
        let logs = call(&self.client, self.retry, move |c| c.get_logs(&id)).await?;
        for line in &logs {
            error!(pipeline = %self.name, job = %job.id, "{}", line.trim_end());
        }
        match job.failure(logs) {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    /// Wait for the job to start, then to finish.
    ///
    /// Each stage has its own poll budget; running out is a
    /// [`EngineError::PipelineWaitTimeout`] naming the stage.
    pub async fn wait_for_completion(
        &self,
        start_retries: u32,
        finish_retries: u32,
    ) -> Result<JobInfo> {
        let tick = |stage: &'static str| {
            let name = self.name.clone();
            move |attempt: u32| debug!(pipeline = %name, stage, attempt, "Waiting for job")
        };

        self.wait_for_run(start_retries, &[], tick("start"))
            .await
            .map_err(|e| restage(e, "start"))?;
        self.wait_for_run(
            finish_retries,
            &[JobState::Starting, JobState::Running],
            tick("finish"),
        )
        .await
        .map_err(|e| restage(e, "finish"))
    }

    /// Delete the pipeline, its jobs and its output repo.
    pub async fn delete(&self) -> Result<()> {
        let name = self.name.clone();
        call(&self.client, self.retry, move |c| c.delete_pipeline(&name)).await
    }
}

fn restage(err: EngineError, stage: &str) -> EngineError {
    match err {
        EngineError::PipelineWaitTimeout { attempts, .. } => EngineError::PipelineWaitTimeout {
            attempts,
            stage: stage.to_string(),
        },
        other => other,
    }
}
