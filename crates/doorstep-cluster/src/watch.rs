//! Watching a repo for new commits.
//!
//! The cluster's commit subscription blocks and cannot be interrupted, so
//! it runs on the blocking pool, one bounded attempt at a time. Between
//! attempts the worker checks a shared flag; [`CommitWatcher::stop`] sets
//! the flag and waits for the worker to notice.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use doorstep_engine::{EngineError, Result};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::{ClusterClient, CommitInfo};

const QUEUE_CAPACITY: usize = 16;

/// Background subscription to one branch of one repo.
pub struct CommitWatcher {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CommitWatcher {
    /// Start watching `repo`/`branch`. New commits arrive on the returned
    /// receiver, each at most once.
    ///
    /// `timeout` bounds each subscription attempt and so how long a stop
    /// request can go unnoticed.
    pub fn start(
        client: Arc<dyn ClusterClient>,
        repo: impl Into<String>,
        branch: impl Into<String>,
        timeout: Duration,
    ) -> (Self, mpsc::Receiver<CommitInfo>) {
        let (repo, branch) = (repo.into(), branch.into());
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let worker = tokio::task::spawn_blocking(move || {
            let mut last: Option<String> = None;
            while !flag.load(Ordering::SeqCst) {
                let commit =
                    match client.subscribe_commit(&repo, &branch, last.as_deref(), timeout) {
                        Ok(Some(commit)) => commit,
                        Ok(None) => continue,
                        Err(e) => {
                            warn!(repo = %repo, error = %e, "Commit subscription failed, retrying");
                            std::thread::sleep(timeout);
                            continue;
                        }
                    };
                if last.as_deref() == Some(commit.id.as_str()) {
                    continue;
                }
                debug!(repo = %repo, commit = %commit.id, "Observed commit");
                last = Some(commit.id.clone());

                let mut pending = commit;
                loop {
                    match tx.try_send(pending) {
                        Ok(()) => break,
                        Err(TrySendError::Closed(_)) => return,
                        Err(TrySendError::Full(back)) => {
                            if flag.load(Ordering::SeqCst) {
                                return;
                            }
                            pending = back;
                            std::thread::sleep(Duration::from_millis(10));
                        }
                    }
                }
            }
            debug!(repo = %repo, "Commit watch stopped");
        });

        (
            Self {
                stop,
                worker: Some(worker),
            },
            rx,
        )
    }

    /// Ask the worker to stop and wait until it has.
    pub async fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take()
            && let Err(e) = worker.await
        {
            warn!(error = %e, "Commit watch worker panicked");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

impl Drop for CommitWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Wait for the first commit derived from exactly `inputs`.
///
/// Commits with any other provenance belong to other stages and are
/// skipped.
pub async fn wait_for_output(
    commits: &mut mpsc::Receiver<CommitInfo>,
    inputs: &BTreeSet<String>,
) -> Result<CommitInfo> {
    while let Some(commit) = commits.recv().await {
        let provenance: BTreeSet<String> = commit.provenance.iter().cloned().collect();
        if &provenance == inputs {
            return Ok(commit);
        }
        debug!(commit = %commit.id, ?provenance, "Skipping commit from another stage");
    }
    Err(EngineError::Session("commit watch ended".to_string()))
}
