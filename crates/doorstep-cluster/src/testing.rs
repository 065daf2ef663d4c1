//! An in-memory cluster with scripted jobs and commits, for tests.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use crate::client::{ClusterClient, CommitInfo};
use crate::error::{ClusterError, Result};
use crate::job::{JobInfo, JobState};

/// A commit the scripted output repo will publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedCommit {
    /// Derived from exactly the pipeline's two input repos.
    Output,
    /// Derived from the inputs plus another repo.
    Downstream,
}

#[derive(Default)]
struct State {
    repos: BTreeSet<String>,
    deleted_repos: Vec<String>,
    files: HashMap<(String, String), Vec<u8>>,
    urls: HashMap<(String, String), String>,
    open_commits: usize,
    pipelines: Vec<Value>,
    deleted_pipelines: Vec<String>,
    jobs: VecDeque<Option<JobState>>,
    last_job: Option<JobState>,
    logs: Vec<String>,
    commits: VecDeque<ScriptedCommit>,
    outputs: HashMap<String, Vec<u8>>,
    fail_puts: bool,
    fail_deletes: bool,
    unavailable_polls: u32,
}

/// Scripted [`ClusterClient`].
///
/// `list_jobs` replays the job script one state per poll and then keeps
/// answering with the last state; `None` entries mean no job yet. The
/// output repo serves files registered with [`ScriptedCluster::output`]
/// whatever the commit.
#[derive(Default)]
pub struct ScriptedCluster {
    state: Mutex<State>,
    polls: AtomicU32,
    commit_ids: AtomicU32,
    subscriptions: AtomicU32,
    subscribing: AtomicU32,
}

impl ScriptedCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Job states answered by successive polls.
    pub fn with_jobs(self, states: impl IntoIterator<Item = Option<JobState>>) -> Self {
        self.state.lock().jobs = states.into_iter().collect();
        self
    }

    /// Commits published on the output repo, in order.
    pub fn with_commits(self, commits: impl IntoIterator<Item = ScriptedCommit>) -> Self {
        self.state.lock().commits = commits.into_iter().collect();
        self
    }

    pub fn with_logs(self, logs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.state.lock().logs = logs.into_iter().map(Into::into).collect();
        self
    }

    /// Serve `content` at `path` of the output repo.
    pub fn output(self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.state.lock().outputs.insert(path.into(), content.into());
        self
    }

    /// Answer the next `count` job polls with a 503.
    pub fn with_unavailable_polls(self, count: u32) -> Self {
        self.state.lock().unavailable_polls = count;
        self
    }

    pub fn fail_puts(&self) {
        self.state.lock().fail_puts = true;
    }

    pub fn fail_deletes(&self) {
        self.state.lock().fail_deletes = true;
    }

    /// Number of `list_jobs` calls so far.
    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }

    /// Number of `subscribe_commit` calls so far.
    pub fn subscriptions(&self) -> u32 {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Number of `subscribe_commit` calls in progress.
    pub fn subscribing(&self) -> u32 {
        self.subscribing.load(Ordering::SeqCst)
    }

    pub fn repos(&self) -> Vec<String> {
        self.state.lock().repos.iter().cloned().collect()
    }

    pub fn deleted_repos(&self) -> Vec<String> {
        self.state.lock().deleted_repos.clone()
    }

    pub fn pipelines(&self) -> Vec<Value> {
        self.state.lock().pipelines.clone()
    }

    pub fn deleted_pipelines(&self) -> Vec<String> {
        self.state.lock().deleted_pipelines.clone()
    }

    pub fn file(&self, repo: &str, path: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .files
            .get(&(repo.to_string(), path.to_string()))
            .cloned()
    }

    pub fn url(&self, repo: &str, path: &str) -> Option<String> {
        self.state
            .lock()
            .urls
            .get(&(repo.to_string(), path.to_string()))
            .cloned()
    }

    pub fn open_commits(&self) -> usize {
        self.state.lock().open_commits
    }

    fn missing(operation: &'static str, what: String) -> ClusterError {
        ClusterError::Status {
            operation,
            status: 404,
            message: format!("{what} not found"),
        }
    }

    fn input_repos(definition: &Value) -> Vec<String> {
        definition["input"]["cross"]
            .as_array()
            .map(|inputs| {
                inputs
                    .iter()
                    .filter_map(|i| i["atom"]["repo"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl ClusterClient for ScriptedCluster {
    fn create_repo(&self, name: &str) -> Result<()> {
        self.state.lock().repos.insert(name.to_string());
        Ok(())
    }

    fn delete_repo(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_deletes {
            return Err(ClusterError::call("delete_repo", format!("cannot delete {name}")));
        }
        if !state.repos.remove(name) {
            return Err(Self::missing("delete_repo", format!("repo {name}")));
        }
        state.deleted_repos.push(name.to_string());
        Ok(())
    }

    fn start_commit(&self, repo: &str, _branch: &str) -> Result<String> {
        let mut state = self.state.lock();
        if !state.repos.contains(repo) {
            return Err(Self::missing("start_commit", format!("repo {repo}")));
        }
        state.open_commits += 1;
        Ok(format!("c{}", self.commit_ids.fetch_add(1, Ordering::SeqCst)))
    }

    fn finish_commit(&self, _repo: &str, _commit: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.open_commits = state.open_commits.saturating_sub(1);
        Ok(())
    }

    fn put_file_bytes(&self, repo: &str, _commit: &str, path: &str, content: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_puts {
            return Err(ClusterError::call("put_file_bytes", "disk full"));
        }
        state
            .files
            .insert((repo.to_string(), path.to_string()), content.to_vec());
        Ok(())
    }

    fn put_file_url(&self, repo: &str, _commit: &str, path: &str, url: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_puts {
            return Err(ClusterError::call("put_file_url", "disk full"));
        }
        state
            .urls
            .insert((repo.to_string(), path.to_string()), url.to_string());
        Ok(())
    }

    fn get_file(&self, repo: &str, _commit: &str, path: &str) -> Result<Vec<u8>> {
        let state = self.state.lock();
        state
            .files
            .get(&(repo.to_string(), path.to_string()))
            .or_else(|| state.outputs.get(path))
            .cloned()
            .ok_or_else(|| Self::missing("get_file", format!("{repo}{path}")))
    }

    fn create_pipeline(&self, definition: &Value) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(name) = definition["pipeline"]["name"].as_str() {
            state.repos.insert(name.to_string());
        }
        state.pipelines.push(definition.clone());
        Ok(())
    }

    fn delete_pipeline(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_deletes {
            return Err(ClusterError::call("delete_pipeline", format!("cannot delete {name}")));
        }
        state.repos.remove(name);
        state.deleted_pipelines.push(name.to_string());
        Ok(())
    }

    fn list_jobs(&self, _pipeline: &str) -> Result<Vec<JobInfo>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if state.unavailable_polls > 0 {
            state.unavailable_polls -= 1;
            return Err(ClusterError::Status {
                operation: "list_jobs",
                status: 503,
                message: "unavailable".into(),
            });
        }
        let next = match state.jobs.pop_front() {
            Some(next) => next,
            None => state.last_job,
        };
        state.last_job = next;
        Ok(next.map(|s| JobInfo::new("job-1", s)).into_iter().collect())
    }

    fn get_logs(&self, _job_id: &str) -> Result<Vec<String>> {
        Ok(self.state.lock().logs.clone())
    }

    fn subscribe_commit(
        &self,
        repo: &str,
        _branch: &str,
        _from: Option<&str>,
        timeout: Duration,
    ) -> Result<Option<CommitInfo>> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        self.subscribing.fetch_add(1, Ordering::SeqCst);
        let result = self.next_commit(repo, timeout);
        self.subscribing.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl ScriptedCluster {
    fn next_commit(&self, repo: &str, timeout: Duration) -> Result<Option<CommitInfo>> {
        let next = {
            let mut state = self.state.lock();
            let inputs = state
                .pipelines
                .last()
                .map(Self::input_repos)
                .unwrap_or_default();
            state.commits.pop_front().map(|kind| {
                let mut provenance = inputs;
                if kind == ScriptedCommit::Downstream {
                    provenance.push(format!("{repo}-upstream"));
                }
                provenance
            })
        };
        match next {
            Some(provenance) => Ok(Some(CommitInfo {
                repo: repo.to_string(),
                id: format!("c{}", self.commit_ids.fetch_add(1, Ordering::SeqCst)),
                provenance,
            })),
            None => {
                std::thread::sleep(timeout.min(Duration::from_millis(5)));
                Ok(None)
            }
        }
    }
}
