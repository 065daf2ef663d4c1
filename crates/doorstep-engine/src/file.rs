//! File managers: given a logical file name, produce a local path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::TempDir;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::retry::RetryPolicy;

/// Resolves logical file names to local paths.
#[async_trait]
pub trait FileManager: Send + Sync {
    async fn get(&self, name: &str) -> Result<PathBuf>;
}

/// Names are already local paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileManager;

#[async_trait]
impl FileManager for LocalFileManager {
    async fn get(&self, name: &str) -> Result<PathBuf> {
        let path = PathBuf::from(name);
        if !tokio::fs::try_exists(&path)
            .await
            .map_err(|e| EngineError::io(format!("checking {name}"), e))?
        {
            return Err(EngineError::Io {
                context: format!("opening {name}"),
                message: "file does not exist".to_string(),
            });
        }
        Ok(path)
    }
}

/// Writes in-memory contents to a private temporary directory.
///
/// The directory, and every file in it, is removed when the manager is
/// dropped.
#[derive(Debug)]
pub struct ContentFileManager {
    dir: TempDir,
    files: HashMap<String, PathBuf>,
}

impl ContentFileManager {
    /// Write each `(name, content)` pair, keyed by its base name.
    pub fn new<'a, I>(contents: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a [u8])>,
    {
        let dir = tempfile::Builder::new()
            .prefix("doorstep-content-")
            .tempdir()
            .map_err(|e| EngineError::io("creating content directory", e))?;

        let mut files = HashMap::new();
        for (name, content) in contents {
            let path = dir.path().join(base_name(name));
            std::fs::write(&path, content)
                .map_err(|e| EngineError::io(format!("writing {}", path.display()), e))?;
            files.insert(name.to_string(), path);
        }

        Ok(Self { dir, files })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Path of a written file, without going through the async trait.
    pub fn path(&self, name: &str) -> Result<PathBuf> {
        self.files.get(name).cloned().ok_or_else(|| EngineError::Io {
            context: format!("opening {name}"),
            message: "no content was supplied for this file".to_string(),
        })
    }
}

#[async_trait]
impl FileManager for ContentFileManager {
    async fn get(&self, name: &str) -> Result<PathBuf> {
        self.path(name)
    }
}

/// Downloads objects from a public storage bucket into a temporary
/// directory.
#[derive(Debug)]
pub struct BucketFileManager {
    base_url: String,
    dir: TempDir,
    http: reqwest::Client,
}

impl BucketFileManager {
    /// Manager for an S3-style bucket name.
    pub fn new(bucket: &str) -> Result<Self> {
        Self::with_base_url(format!("https://{bucket}.s3.amazonaws.com"))
    }

    /// Manager for any HTTP endpoint serving objects at `<base>/<key>`.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("doorstep-bucket-")
            .tempdir()
            .map_err(|e| EngineError::io("creating bucket directory", e))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            dir,
            http: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl FileManager for BucketFileManager {
    async fn get(&self, name: &str) -> Result<PathBuf> {
        let url = format!("{}/{}", self.base_url, name.trim_start_matches('/'));
        debug!(%url, "Downloading bucket object");
        let bytes = crate::data::fetch_url(&self.http, &url, RetryPolicy::default()).await?;
        let path = self.dir.path().join(base_name(name));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| EngineError::io(format!("writing {}", path.display()), e))?;
        Ok(path)
    }
}

/// File manager for an optional bucket: the bucket if given, otherwise
/// local paths.
pub fn make_file_manager(bucket: Option<&str>) -> Result<Box<dyn FileManager>> {
    Ok(match bucket {
        Some(bucket) => Box::new(BucketFileManager::new(bucket)?),
        None => Box::new(LocalFileManager),
    })
}

/// Final component of a `/`-separated name.
pub fn base_name(name: &str) -> &str {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_content_manager_writes_files() {
        let manager =
            ContentFileManager::new([("dir/data.csv", &b"a,b\n1,2\n"[..]), ("p.py", &b"x"[..])])
                .unwrap();
        let path = manager.get("dir/data.csv").await.unwrap();
        assert_eq!(path.file_name().unwrap(), "data.csv");
        assert_eq!(std::fs::read(&path).unwrap(), b"a,b\n1,2\n");
        assert!(manager.get("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_content_manager_cleans_up() {
        let manager = ContentFileManager::new([("f", &b"1"[..])]).unwrap();
        let root = manager.root().to_path_buf();
        assert!(root.exists());
        drop(manager);
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_local_manager() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.csv");
        std::fs::write(&path, "1").unwrap();
        let found = LocalFileManager.get(path.to_str().unwrap()).await.unwrap();
        assert_eq!(found, path);
        assert!(LocalFileManager.get("/nonexistent/x.csv").await.is_err());
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("/a/b/c.csv"), "c.csv");
        assert_eq!(base_name("c.csv"), "c.csv");
    }
}
