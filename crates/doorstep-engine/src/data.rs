//! Input data attached to a session.

use std::fmt;

use tracing::debug;

use crate::error::{EngineError, Result};
use crate::retry::{RetryPolicy, with_retry};

/// Where the bytes of an input file come from.
#[derive(Clone, PartialEq)]
pub enum DataSource {
    /// Literal content.
    Bytes(Vec<u8>),
    /// A local path to read.
    Path(String),
    /// A remote URL to download.
    Url(String),
}

impl DataSource {
    /// Interpret posted content.
    ///
    /// Without `redirect` the content is the data itself. With it, the
    /// content is a reference: `file://` and bare paths are local, anything
    /// with an `http(s)` scheme is downloaded.
    pub fn from_post(content: Vec<u8>, redirect: bool) -> Result<Self> {
        if !redirect {
            return Ok(DataSource::Bytes(content));
        }

        let reference = String::from_utf8(content)
            .map_err(|_| EngineError::Configuration("redirect target is not UTF-8".to_string()))?;
        let reference = reference.trim();

        if let Some(path) = reference.strip_prefix("file://") {
            Ok(DataSource::Path(path.to_string()))
        } else if reference.starts_with("http://") || reference.starts_with("https://") {
            Ok(DataSource::Url(reference.to_string()))
        } else if reference.contains("://") {
            Err(EngineError::Configuration(format!(
                "unsupported redirect scheme: {reference}"
            )))
        } else {
            Ok(DataSource::Path(reference.to_string()))
        }
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            DataSource::Path(p) => f.debug_tuple("Path").field(p).finish(),
            DataSource::Url(u) => f.debug_tuple("Url").field(u).finish(),
        }
    }
}

/// One input file: its name as the processor will see it, and its source.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFile {
    pub filename: String,
    pub source: DataSource,
}

impl DataFile {
    pub fn new(filename: impl Into<String>, source: DataSource) -> Self {
        Self {
            filename: filename.into(),
            source,
        }
    }

    /// Materialise the file's bytes.
    pub async fn content(&self) -> Result<Vec<u8>> {
        match &self.source {
            DataSource::Bytes(bytes) => Ok(bytes.clone()),
            DataSource::Path(path) => tokio::fs::read(path)
                .await
                .map_err(|e| EngineError::io(format!("reading {path}"), e)),
            DataSource::Url(url) => {
                fetch_url(&reqwest::Client::new(), url, RetryPolicy::default()).await
            }
        }
    }
}

/// GET a URL, treating any non-success status as a transport failure.
///
/// Transient failures (connection errors, 5xx, 429) are retried under
/// `retry`.
pub async fn fetch_url(http: &reqwest::Client, url: &str, retry: RetryPolicy) -> Result<Vec<u8>> {
    with_retry(retry, url, || fetch_once(http, url)).await
}

async fn fetch_once(http: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    debug!(%url, "Fetching");
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| EngineError::transport(&e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(EngineError::Transport {
            status_code: Some(status.as_u16()),
            processor: None,
            underlying: "http".to_string(),
            message: format!("GET {url} returned {status}"),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| EngineError::transport(&e))?;
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one connection per status line, in order, then stop.
    async fn serve(statuses: Vec<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for status in statuses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let body = "a,b\n";
                let reply = format!(
                    "HTTP/1.1 {status}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}/d.csv")
    }

    #[tokio::test]
    async fn test_fetch_retries_unavailable_server() {
        let url = serve(vec!["503 Service Unavailable", "200 OK"]).await;
        let bytes = fetch_url(
            &reqwest::Client::new(),
            &url,
            RetryPolicy::new(3, Duration::from_millis(5)),
        )
        .await
        .unwrap();
        assert_eq!(bytes, b"a,b\n");
    }

    #[tokio::test]
    async fn test_fetch_does_not_retry_not_found() {
        let url = serve(vec!["404 Not Found"]).await;
        let err = fetch_url(
            &reqwest::Client::new(),
            &url,
            RetryPolicy::new(3, Duration::from_millis(5)),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), Some(404));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_from_post_literal() {
        let source = DataSource::from_post(b"file://not-a-redirect".to_vec(), false).unwrap();
        assert_eq!(source, DataSource::Bytes(b"file://not-a-redirect".to_vec()));
    }

    #[test]
    fn test_from_post_redirects() {
        assert_eq!(
            DataSource::from_post(b"file:///tmp/x.csv".to_vec(), true).unwrap(),
            DataSource::Path("/tmp/x.csv".into())
        );
        assert_eq!(
            DataSource::from_post(b" https://example.org/x.csv\n".to_vec(), true).unwrap(),
            DataSource::Url("https://example.org/x.csv".into())
        );
        assert_eq!(
            DataSource::from_post(b"data/x.csv".to_vec(), true).unwrap(),
            DataSource::Path("data/x.csv".into())
        );
        assert!(DataSource::from_post(b"ftp://x".to_vec(), true).is_err());
    }

    #[tokio::test]
    async fn test_content_from_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("d.csv");
        std::fs::write(&path, "a\n").unwrap();
        let file = DataFile::new(
            "d.csv",
            DataSource::Path(path.to_string_lossy().into_owned()),
        );
        assert_eq!(file.content().await.unwrap(), b"a\n");

        let missing = DataFile::new("m.csv", DataSource::Path("/nonexistent/m.csv".into()));
        assert!(matches!(missing.content().await, Err(EngineError::Io { .. })));
    }
}
