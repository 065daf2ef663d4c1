//! Per-run session state.
//!
//! A [`Session`] is created by an engine's `make_session`, filled with one
//! data file and some processors, and then monitored exactly once. The
//! outcome of the run travels through a one-shot [`ResultSlot`]:
//! `monitor_pipeline` takes the slot out of the session (a second attempt
//! fails) and hands it to the task doing the work, which consumes it with
//! [`ResultSlot::fill`]. Readers wait on a [`Completion`], which cannot
//! observe anything before the slot is filled.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use doorstep_report::Report;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::data::DataFile;
use crate::definition::ProcessorDefinition;
use crate::error::{EngineError, Result};

/// Result of one run.
pub type Outcome = Result<Report>;

/// Backend resources owned by a session and released when it closes.
#[async_trait]
pub trait SessionResources: Send + Sync {
    /// Release everything. Called once, when the session closes.
    async fn release(&self) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
}

/// The write side of a session's outcome. Filling it consumes it.
#[derive(Debug)]
pub struct ResultSlot {
    tx: watch::Sender<Option<Outcome>>,
}

impl ResultSlot {
    pub fn fill(self, outcome: Outcome) {
        self.tx.send_replace(Some(outcome));
    }
}

/// The read side of a session's outcome.
#[derive(Debug, Clone)]
pub struct Completion {
    rx: watch::Receiver<Option<Outcome>>,
}

impl Completion {
    /// Wait for the outcome.
    ///
    /// Resolves to [`EngineError::Cancelled`] if the slot is dropped without
    /// being filled (the working task was aborted).
    pub async fn wait(mut self) -> Outcome {
        let outcome = match self.rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        };
        outcome.unwrap_or(Err(EngineError::Cancelled))
    }

    /// Whether the outcome is already available.
    pub fn is_ready(&self) -> bool {
        self.rx.borrow().is_some()
    }
}

/// Cancels a session's background work.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// State of one run.
pub struct Session {
    name: String,
    data_tx: mpsc::Sender<DataFile>,
    data_rx: Mutex<Option<mpsc::Receiver<DataFile>>>,
    processors: Mutex<Vec<ProcessorDefinition>>,
    slot: Mutex<Option<ResultSlot>>,
    completion: watch::Receiver<Option<Outcome>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    resources: Option<Arc<dyn SessionResources>>,
    closed: AtomicBool,
}

impl Session {
    /// New session named `doorstep-<uuid>`.
    pub fn new() -> Self {
        Self::named(format!("doorstep-{}", Uuid::new_v4()))
    }

    pub fn named(name: impl Into<String>) -> Self {
        let (data_tx, data_rx) = mpsc::channel(1);
        let (tx, completion) = watch::channel(None);
        Self {
            name: name.into(),
            data_tx,
            data_rx: Mutex::new(Some(data_rx)),
            processors: Mutex::new(Vec::new()),
            slot: Mutex::new(Some(ResultSlot { tx })),
            completion,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            resources: None,
            closed: AtomicBool::new(false),
        }
    }

    /// Attach backend resources to be released on close.
    pub fn with_resources(mut self, resources: Arc<dyn SessionResources>) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend resources of a specific type.
    pub fn resources<T: 'static>(&self) -> Option<&T> {
        self.resources.as_deref()?.as_any().downcast_ref::<T>()
    }

    /// Queue the session's input file. The queue holds one file.
    pub fn offer_data(&self, data: DataFile) -> Result<()> {
        debug!(session = %self.name, filename = %data.filename, "Data attached");
        self.data_tx.try_send(data).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                EngineError::Session("session already has pending data".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                EngineError::Session("session is no longer accepting data".to_string())
            }
        })
    }

    /// The receiving end of the data queue. Available once.
    pub fn take_data(&self) -> Result<mpsc::Receiver<DataFile>> {
        self.data_rx
            .lock()
            .take()
            .ok_or_else(|| EngineError::Session("data queue already taken".to_string()))
    }

    pub fn add_processors(&self, definitions: impl IntoIterator<Item = ProcessorDefinition>) {
        let mut processors = self.processors.lock();
        for definition in definitions {
            debug!(session = %self.name, processor = %definition.name, "Processor attached");
            processors.push(definition);
        }
    }

    /// Snapshot of the attached processors.
    pub fn processors(&self) -> Vec<ProcessorDefinition> {
        self.processors.lock().clone()
    }

    /// Take the result slot. Succeeds once per session.
    pub fn take_result_slot(&self) -> Result<ResultSlot> {
        if self.is_closed() {
            return Err(EngineError::Session(format!(
                "session {} is closed",
                self.name
            )));
        }
        self.slot
            .lock()
            .take()
            .ok_or_else(|| EngineError::Session("session is already being monitored".to_string()))
    }

    /// Whether `monitor_pipeline` has taken the result slot.
    pub fn is_monitored(&self) -> bool {
        self.slot.lock().is_none()
    }

    pub fn completion(&self) -> Completion {
        Completion {
            rx: self.completion.clone(),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            token: self.cancel.clone(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Keep a background task so closing the session can wait for it.
    pub fn track(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    /// Wait for the run's outcome.
    ///
    /// Fails immediately if the session has not been monitored, since
    /// nothing would ever fill the result.
    pub async fn output(&self) -> Outcome {
        if !self.is_monitored() {
            return Err(EngineError::Session(
                "get_output called before monitor_pipeline".to_string(),
            ));
        }
        self.completion().wait().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Tear the session down.
    ///
    /// Cancels background work, waits for it to exit, resolves any waiter
    /// that would otherwise hang, then releases backend resources. Closing
    /// twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.cancel.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await
                && !e.is_cancelled()
            {
                warn!(session = %self.name, error = %e, "Session task panicked");
            }
        }

        if let Some(slot) = self.slot.lock().take() {
            slot.fill(Err(EngineError::Cancelled));
        }

        if let Some(resources) = &self.resources {
            resources.release().await?;
        }

        info!(session = %self.name, "Session closed");
        Ok(())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("processors", &self.processors.lock().len())
            .field("monitored", &self.is_monitored())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataSource;
    use doorstep_report::Preset;

    #[test]
    fn test_session_name() {
        let session = Session::new();
        assert!(session.name().starts_with("doorstep-"));
        assert_ne!(Session::new().name(), session.name());
    }

    #[test]
    fn test_slot_taken_once() {
        let session = Session::new();
        assert!(session.take_result_slot().is_ok());
        assert!(matches!(
            session.take_result_slot(),
            Err(EngineError::Session(_))
        ));
    }

    #[test]
    fn test_data_slot_holds_one_file() {
        let session = Session::new();
        let file = || DataFile::new("a.csv", DataSource::Bytes(b"1".to_vec()));
        session.offer_data(file()).unwrap();
        assert!(session.offer_data(file()).is_err());
    }

    #[tokio::test]
    async fn test_completion_sees_fill() {
        let session = Session::new();
        let slot = session.take_result_slot().unwrap();
        let completion = session.completion();
        assert!(!completion.is_ready());

        slot.fill(Ok(Report::empty(Preset::Tabular)));
        let first = session.output().await.unwrap();
        let second = session.output().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_stored_failure_returned_every_time() {
        let session = Session::new();
        session
            .take_result_slot()
            .unwrap()
            .fill(Err(EngineError::Configuration("bad".into())));
        for _ in 0..2 {
            assert_eq!(
                session.output().await,
                Err(EngineError::Configuration("bad".into()))
            );
        }
    }

    #[tokio::test]
    async fn test_output_before_monitor_fails() {
        let session = Session::new();
        assert!(matches!(
            session.output().await,
            Err(EngineError::Session(_))
        ));
    }

    #[tokio::test]
    async fn test_dropped_slot_resolves_cancelled() {
        let session = Session::new();
        let slot = session.take_result_slot().unwrap();
        drop(slot);
        assert_eq!(session.completion().wait().await, Err(EngineError::Cancelled));
    }

    #[tokio::test]
    async fn test_close_cancels_and_joins_tasks() {
        let session = Arc::new(Session::new());
        let slot = session.take_result_slot().unwrap();
        let token = session.cancel_token();
        session.track(tokio::spawn(async move {
            token.cancelled().await;
            slot.fill(Err(EngineError::Cancelled));
        }));

        session.close().await.unwrap();
        assert!(session.is_closed());
        assert_eq!(session.output().await, Err(EngineError::Cancelled));
        session.close().await.unwrap();
    }

    struct Flag(AtomicBool);

    #[async_trait]
    impl SessionResources for Flag {
        async fn release(&self) -> Result<()> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[tokio::test]
    async fn test_close_releases_resources() {
        let flag = Arc::new(Flag(AtomicBool::new(false)));
        let session = Session::new().with_resources(flag.clone());
        assert!(session.resources::<Flag>().is_some());
        session.close().await.unwrap();
        assert!(flag.0.load(Ordering::SeqCst));
        assert!(session.take_result_slot().is_err());
    }
}
