//! Sessions a server holds open.

use std::collections::HashMap;
use std::sync::Arc;

use doorstep_engine::{Engine, Session};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::{Result, ServerError};

/// Open sessions by name. Every session is closed on [`SessionSet::close_all`].
#[derive(Default)]
pub struct SessionSet {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session on `engine` and keep it.
    pub async fn add(&self, engine: &dyn Engine) -> Result<Arc<Session>> {
        let session = engine.make_session().await?;
        self.sessions
            .lock()
            .insert(session.name().to_string(), Arc::clone(&session));
        Ok(session)
    }

    pub fn get(&self, name: &str) -> Result<Arc<Session>> {
        self.sessions
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| ServerError::UnknownSession(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Close one session and forget it.
    pub async fn close(&self, name: &str) -> Result<()> {
        let session = self
            .sessions
            .lock()
            .remove(name)
            .ok_or_else(|| ServerError::UnknownSession(name.to_string()))?;
        session.close().await?;
        Ok(())
    }

    /// Close every session, attempting each one, and report all failures
    /// together.
    pub async fn close_all(&self) -> Result<()> {
        let sessions: Vec<_> = self.sessions.lock().drain().collect();
        let mut failures = Vec::new();

        for (name, session) in sessions {
            if let Err(e) = session.close().await {
                warn!(session = %name, error = %e, "Failed to close session");
                failures.push(format!("{name}: {e}"));
            }
        }

        if failures.is_empty() {
            info!("All sessions closed");
            Ok(())
        } else {
            Err(ServerError::Shutdown(failures))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doorstep_engine::{LocalEngine, ProcessorRegistry};

    #[tokio::test]
    async fn test_add_get_close() {
        let engine = LocalEngine::new(ProcessorRegistry::new());
        let set = SessionSet::new();
        let session = set.add(&engine).await.unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(session.name()).unwrap().name(), session.name());

        set.close(session.name()).await.unwrap();
        assert!(set.is_empty());
        assert!(session.is_closed());
        assert!(matches!(
            set.get(session.name()),
            Err(ServerError::UnknownSession(_))
        ));
    }

    #[tokio::test]
    async fn test_close_all() {
        let engine = LocalEngine::new(ProcessorRegistry::new());
        let set = SessionSet::new();
        let a = set.add(&engine).await.unwrap();
        let b = set.add(&engine).await.unwrap();
        set.close_all().await.unwrap();
        assert!(a.is_closed() && b.is_closed());
        assert!(set.is_empty());
    }
}
