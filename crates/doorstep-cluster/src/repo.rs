//! Repos and commits.

use std::sync::Arc;

use doorstep_engine::{Result, RetryPolicy};
use tracing::{debug, warn};

use crate::client::{ClusterClient, call};

/// Content of one file in a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    Bytes(Vec<u8>),
    /// A URL the cluster fetches itself.
    Url(String),
}

/// A named storage root on the cluster.
#[derive(Clone)]
pub struct Repo {
    name: String,
    branch: String,
    client: Arc<dyn ClusterClient>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Repo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repo")
            .field("name", &self.name)
            .field("branch", &self.branch)
            .finish()
    }
}

impl Repo {
    /// Handle on an existing repo. Calls are retried under `retry`.
    pub fn new(
        client: Arc<dyn ClusterClient>,
        name: impl Into<String>,
        branch: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            branch: branch.into(),
            client,
            retry,
        }
    }

    /// Create the repo on the cluster.
    pub async fn create(
        client: Arc<dyn ClusterClient>,
        name: impl Into<String>,
        branch: impl Into<String>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let repo = Self::new(client, name, branch, retry);
        let name = repo.name.clone();
        call(&repo.client, repo.retry, move |c| c.create_repo(&name)).await?;
        debug!(repo = %repo.name, "Created repo");
        Ok(repo)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Write `files` in a single commit on the repo's branch.
    ///
    /// The commit is finished even when a put fails; the put's error wins.
    /// A retry starts a fresh commit.
    pub async fn commit(&self, files: Vec<(String, FileContent)>) -> Result<Commit> {
        let (repo, branch) = (self.name.clone(), self.branch.clone());
        let id = call(&self.client, self.retry, move |c| {
            let id = c.start_commit(&repo, &branch)?;
            let put = files.iter().try_for_each(|(path, content)| match content {
                FileContent::Bytes(bytes) => c.put_file_bytes(&repo, &id, path, bytes),
                FileContent::Url(url) => c.put_file_url(&repo, &id, path, url),
            });
            let finish = c.finish_commit(&repo, &id);
            put.and(finish).map(|()| id)
        })
        .await?;
        debug!(repo = %self.name, commit = %id, "Finished commit");
        Ok(Commit {
            repo: self.name.clone(),
            id,
        })
    }

    /// Read a file from the head of the repo's branch.
    pub async fn pull_file(&self, path: &str) -> Result<Vec<u8>> {
        self.pull_file_at(&self.branch, path).await
    }

    /// Read a file at a specific commit.
    pub async fn pull_file_at(&self, commit: &str, path: &str) -> Result<Vec<u8>> {
        let (repo, commit, path) = (self.name.clone(), commit.to_string(), path.to_string());
        call(&self.client, self.retry, move |c| c.get_file(&repo, &commit, &path)).await
    }

    /// Delete the repo. Failures are returned for the caller to collect.
    pub async fn delete(&self) -> Result<()> {
        let name = self.name.clone();
        let result = call(&self.client, self.retry, move |c| c.delete_repo(&name)).await;
        if let Err(e) = &result {
            warn!(repo = %self.name, error = %e, "Failed to delete repo");
        }
        result
    }
}

/// A finished commit, addressable as `repo/id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub repo: String,
    pub id: String,
}

impl Commit {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.repo, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedCluster;

    #[tokio::test]
    async fn test_commit_puts_every_file() {
        let cluster = Arc::new(ScriptedCluster::new());
        let repo = Repo::create(cluster.clone(), "r", "master", RetryPolicy::once())
            .await
            .unwrap();
        let commit = repo
            .commit(vec![
                ("/a.csv".into(), FileContent::Bytes(b"x".to_vec())),
                ("/b.csv".into(), FileContent::Url("s3://bucket/b.csv".into())),
            ])
            .await
            .unwrap();

        assert_eq!(commit.full_name(), format!("r/{}", commit.id));
        assert_eq!(cluster.file("r", "/a.csv"), Some(b"x".to_vec()));
        assert_eq!(cluster.url("r", "/b.csv").as_deref(), Some("s3://bucket/b.csv"));
        assert_eq!(cluster.open_commits(), 0);
    }

    #[tokio::test]
    async fn test_failed_put_still_finishes_commit() {
        let cluster = Arc::new(ScriptedCluster::new());
        cluster.fail_puts();
        let repo = Repo::create(cluster.clone(), "r", "master", RetryPolicy::once())
            .await
            .unwrap();
        let err = repo
            .commit(vec![("/a.csv".into(), FileContent::Bytes(b"x".to_vec()))])
            .await
            .unwrap_err();
        assert_eq!(err.underlying_type(), "cluster");
        assert_eq!(cluster.open_commits(), 0);
    }
}
