//! The cluster API capability.
//!
//! [`ClusterClient`] is blocking: the commit subscription it exposes is a
//! blocking stream with no native cancellation, and the rest of the calls
//! follow suit. Async code reaches it through [`call`], which runs the call
//! on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use doorstep_engine::{EngineError, RetryPolicy, with_retry};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::runtime::Handle;

use crate::error::{ClusterError, Result};
use crate::job::JobInfo;

/// A commit as reported by the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub repo: String,
    pub id: String,
    /// Repos whose commits this one was derived from.
    #[serde(default)]
    pub provenance: Vec<String>,
}

/// Repo, commit, pipeline and job calls against a cluster.
pub trait ClusterClient: Send + Sync {
    fn create_repo(&self, name: &str) -> Result<()>;
    fn delete_repo(&self, name: &str) -> Result<()>;

    /// Open a commit on `branch`, returning its id.
    fn start_commit(&self, repo: &str, branch: &str) -> Result<String>;
    fn finish_commit(&self, repo: &str, commit: &str) -> Result<()>;
    fn put_file_bytes(&self, repo: &str, commit: &str, path: &str, content: &[u8]) -> Result<()>;
    /// Have the cluster fetch `url` into `path`.
    fn put_file_url(&self, repo: &str, commit: &str, path: &str, url: &str) -> Result<()>;
    /// Read a file at a commit id or branch name.
    fn get_file(&self, repo: &str, commit: &str, path: &str) -> Result<Vec<u8>>;

    fn create_pipeline(&self, definition: &Value) -> Result<()>;
    /// Delete a pipeline with its jobs and output repo.
    fn delete_pipeline(&self, name: &str) -> Result<()>;
    fn list_jobs(&self, pipeline: &str) -> Result<Vec<JobInfo>>;
    fn get_logs(&self, job_id: &str) -> Result<Vec<String>>;

    /// Block until a commit newer than `from` lands on `branch`, or until
    /// `timeout` passes (`Ok(None)`).
    fn subscribe_commit(
        &self,
        repo: &str,
        branch: &str,
        from: Option<&str>,
        timeout: Duration,
    ) -> Result<Option<CommitInfo>>;
}

/// Run a blocking cluster call from async code.
///
/// Transient failures are retried under `retry`, each attempt running `f`
/// afresh on the blocking pool.
pub async fn call<T, F>(
    client: &Arc<dyn ClusterClient>,
    retry: RetryPolicy,
    f: F,
) -> doorstep_engine::Result<T>
where
    T: Send + 'static,
    F: Fn(&dyn ClusterClient) -> Result<T> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    with_retry(retry, "cluster call", || {
        let client = Arc::clone(client);
        let f = Arc::clone(&f);
        async move {
            tokio::task::spawn_blocking(move || f(client.as_ref()))
                .await
                .map_err(|e| EngineError::Transport {
                    status_code: None,
                    processor: None,
                    underlying: "cluster".to_string(),
                    message: format!("cluster call did not complete: {e}"),
                })?
                .map_err(EngineError::from)
        }
    })
    .await
}

/// Client for a cluster's JSON API gateway.
///
/// Must be used from blocking context (see [`call`]); each call drives the
/// async HTTP client on the runtime it was created in.
#[derive(Debug, Clone)]
pub struct HttpClusterClient {
    endpoint: String,
    http: reqwest::Client,
    runtime: Handle,
}

impl HttpClusterClient {
    /// Create a client for `endpoint`. Must be called within a tokio runtime.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            runtime: Handle::current(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.endpoint)
    }

    fn file_url(&self, repo: &str, commit: &str, path: &str) -> String {
        let path = path.trim_start_matches('/');
        self.url(&format!("/pfs/repos/{repo}/commits/{commit}/files/{path}"))
    }

    fn send(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        self.runtime.block_on(async {
            let response = request
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        ClusterError::Timeout { operation }
                    } else {
                        ClusterError::call(operation, e.to_string())
                    }
                })?;
            let status = response.status();
            if status.is_success() {
                Ok(response)
            } else {
                let message = response.text().await.unwrap_or_default();
                Err(ClusterError::Status {
                    operation,
                    status: status.as_u16(),
                    message,
                })
            }
        })
    }

    fn decode<T: serde::de::DeserializeOwned>(
        &self,
        operation: &'static str,
        response: reqwest::Response,
    ) -> Result<T> {
        self.runtime.block_on(async {
            response.json::<T>().await.map_err(|e| ClusterError::Decode {
                operation,
                message: e.to_string(),
            })
        })
    }
}

#[derive(Deserialize)]
struct StartedCommit {
    id: String,
}

impl ClusterClient for HttpClusterClient {
    fn create_repo(&self, name: &str) -> Result<()> {
        let request = self
            .http
            .post(self.url("/pfs/repos"))
            .json(&json!({ "name": name }));
        self.send("create_repo", request).map(drop)
    }

    fn delete_repo(&self, name: &str) -> Result<()> {
        let request = self.http.delete(self.url(&format!("/pfs/repos/{name}")));
        self.send("delete_repo", request).map(drop)
    }

    fn start_commit(&self, repo: &str, branch: &str) -> Result<String> {
        let request = self
            .http
            .post(self.url(&format!("/pfs/repos/{repo}/commits")))
            .json(&json!({ "branch": branch }));
        let response = self.send("start_commit", request)?;
        let started: StartedCommit = self.decode("start_commit", response)?;
        Ok(started.id)
    }

    fn finish_commit(&self, repo: &str, commit: &str) -> Result<()> {
        let request = self
            .http
            .post(self.url(&format!("/pfs/repos/{repo}/commits/{commit}/finish")));
        self.send("finish_commit", request).map(drop)
    }

    fn put_file_bytes(&self, repo: &str, commit: &str, path: &str, content: &[u8]) -> Result<()> {
        let request = self
            .http
            .put(self.file_url(repo, commit, path))
            .body(content.to_vec());
        self.send("put_file_bytes", request).map(drop)
    }

    fn put_file_url(&self, repo: &str, commit: &str, path: &str, url: &str) -> Result<()> {
        let request = self
            .http
            .put(self.file_url(repo, commit, path))
            .query(&[("url", url)]);
        self.send("put_file_url", request).map(drop)
    }

    fn get_file(&self, repo: &str, commit: &str, path: &str) -> Result<Vec<u8>> {
        let request = self.http.get(self.file_url(repo, commit, path));
        let response = self.send("get_file", request)?;
        self.runtime.block_on(async {
            response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| ClusterError::call("get_file", e.to_string()))
        })
    }

    fn create_pipeline(&self, definition: &Value) -> Result<()> {
        let request = self.http.post(self.url("/pps/pipelines")).json(definition);
        self.send("create_pipeline", request).map(drop)
    }

    fn delete_pipeline(&self, name: &str) -> Result<()> {
        let request = self
            .http
            .delete(self.url(&format!("/pps/pipelines/{name}")))
            .query(&[("delete_jobs", "true"), ("delete_repo", "true")]);
        self.send("delete_pipeline", request).map(drop)
    }

    fn list_jobs(&self, pipeline: &str) -> Result<Vec<JobInfo>> {
        let request = self
            .http
            .get(self.url(&format!("/pps/pipelines/{pipeline}/jobs")));
        let response = self.send("list_jobs", request)?;
        self.decode("list_jobs", response)
    }

    fn get_logs(&self, job_id: &str) -> Result<Vec<String>> {
        let request = self.http.get(self.url(&format!("/pps/jobs/{job_id}/logs")));
        let response = self.send("get_logs", request)?;
        self.decode("get_logs", response)
    }

    fn subscribe_commit(
        &self,
        repo: &str,
        branch: &str,
        from: Option<&str>,
        timeout: Duration,
    ) -> Result<Option<CommitInfo>> {
        let mut request = self
            .http
            .get(self.url(&format!("/pfs/repos/{repo}/branches/{branch}/subscribe")))
            .timeout(timeout);
        if let Some(from) = from {
            request = request.query(&[("from", from)]);
        }
        let response = match self.send("subscribe_commit", request) {
            Ok(response) => response,
            Err(ClusterError::Timeout { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        self.decode("subscribe_commit", response).map(Some)
    }
}
