//! The doorstep server: sessions over one engine, driven by RPC calls.

use std::collections::HashMap;
use std::sync::Arc;

use doorstep_config::DoorstepConfig;
use doorstep_engine::{Engine, EngineError, ProcessorIni, Session};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, ServerError};
use crate::protocol::{Engagement, RpcReply, RpcRequest, ServerEvent};
use crate::sessions::SessionSet;

const EVENT_CAPACITY: usize = 64;

/// Server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `report.get` refuses compiled reports longer than this.
    pub max_report_chars: usize,
}

impl ServerConfig {
    pub fn from_config(config: &DoorstepConfig) -> Self {
        Self {
            max_report_chars: config.report().max_length_chars,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_config(&DoorstepConfig::default())
    }
}

/// Serves `engage`, `processor.post`, `data.post` and `report.get` over
/// one engine.
pub struct DoorstepServer {
    id: String,
    engine: Arc<dyn Engine>,
    sessions: SessionSet,
    config: ServerConfig,
    events: broadcast::Sender<ServerEvent>,
}

impl DoorstepServer {
    pub fn new(engine: Arc<dyn Engine>, config: ServerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            id: format!("ltlwc-{}", Uuid::new_v4()),
            engine,
            sessions: SessionSet::new(),
            config,
            events,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionSet {
        &self.sessions
    }

    /// Receive [`ServerEvent`]s published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Open a session and start monitoring it.
    ///
    /// A result event is published once the run finishes, whatever its
    /// outcome.
    pub async fn engage(&self) -> Result<Engagement> {
        let session = self.sessions.add(self.engine.as_ref()).await?;
        let engagement = Engagement {
            server_id: self.id.clone(),
            session_id: session.name().to_string(),
        };

        match self.engine.monitor_pipeline(&session).await {
            Ok((_cancel, completion)) => {
                let events = self.events.clone();
                let event = ServerEvent::Result {
                    server_id: engagement.server_id.clone(),
                    session_id: engagement.session_id.clone(),
                };
                session.track(tokio::spawn(async move {
                    let outcome = completion.wait().await;
                    debug!(ok = outcome.is_ok(), "Run finished, publishing result");
                    // No subscribers is fine.
                    let _ = events.send(event);
                }));
            }
            Err(e) => {
                warn!(session = %engagement.session_id, error = %e, "Could not start monitoring");
            }
        }

        info!(session = %engagement.session_id, "Engaged");
        Ok(engagement)
    }

    /// Attach processors to a session.
    pub async fn processor_post(
        &self,
        session: &str,
        modules: HashMap<String, String>,
        definitions: Value,
    ) -> Result<()> {
        let session = self.sessions.get(session)?;
        let ini = ProcessorIni::from_value(definitions)?;
        let modules: HashMap<String, Vec<u8>> = modules
            .into_iter()
            .map(|(name, source)| (name, source.into_bytes()))
            .collect();

        self.engine.add_processor(&session, &modules, &ini).await?;
        debug!(session = %session.name(), count = ini.definitions.len(), "Processors posted");
        Ok(())
    }

    /// Attach the data file to a session.
    pub async fn data_post(
        &self,
        session: &str,
        filename: &str,
        content: String,
        redirect: bool,
    ) -> Result<()> {
        let session = self.sessions.get(session)?;
        self.engine
            .add_data(&session, filename, content.into_bytes(), redirect)
            .await?;
        debug!(session = %session.name(), filename, redirect, "Data posted");
        Ok(())
    }

    /// The session's compiled report as JSON, waiting for the run.
    pub async fn report_get(&self, session: &str) -> Result<String> {
        let session: Arc<Session> = self.sessions.get(session)?;
        let report = self.engine.get_output(&session).await?;
        let json = report
            .compile(None, None)
            .to_json()
            .map_err(EngineError::from)?;

        let length = json.chars().count();
        if length > self.config.max_report_chars {
            warn!(session = %session.name(), length, "Report too long to return");
            return Err(ServerError::ReportTooLong {
                length,
                limit: self.config.max_report_chars,
            });
        }
        Ok(json)
    }

    /// Dispatch one request.
    pub async fn handle(&self, request: RpcRequest) -> RpcReply {
        debug!(method = request.method(), "Handling request");
        self.dispatch(request).await.into()
    }

    async fn dispatch(&self, request: RpcRequest) -> Result<Value> {
        match request {
            RpcRequest::Engage => {
                let engagement = self.engage().await?;
                serde_json::to_value(engagement)
                    .map_err(|e| ServerError::InvalidRequest(e.to_string()))
            }
            RpcRequest::ProcessorPost {
                server,
                session,
                modules,
                definitions,
            } => {
                self.check_server(&server)?;
                self.processor_post(&session, modules, definitions).await?;
                Ok(Value::Null)
            }
            RpcRequest::DataPost {
                server,
                session,
                filename,
                content,
                redirect,
            } => {
                self.check_server(&server)?;
                self.data_post(&session, &filename, content, redirect).await?;
                Ok(Value::Null)
            }
            RpcRequest::ReportGet { server, session } => {
                self.check_server(&server)?;
                Ok(Value::String(self.report_get(&session).await?))
            }
        }
    }

    fn check_server(&self, requested: &str) -> Result<()> {
        if requested == self.id {
            Ok(())
        } else {
            Err(ServerError::WrongServer {
                requested: requested.to_string(),
                actual: self.id.clone(),
            })
        }
    }

    /// Close every session.
    pub async fn shutdown(&self) -> Result<()> {
        info!(server = %self.id, sessions = self.sessions.len(), "Shutting down");
        self.sessions.close_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doorstep_engine::{LocalEngine, ProcessorRegistry};

    fn server() -> DoorstepServer {
        DoorstepServer::new(
            Arc::new(LocalEngine::new(ProcessorRegistry::new())),
            ServerConfig::default(),
        )
    }

    #[test]
    fn test_server_id_prefix() {
        assert!(server().id().starts_with("ltlwc-"));
        assert_eq!(ServerConfig::default().max_report_chars, 10_000_000);
    }

    #[tokio::test]
    async fn test_wrong_server_rejected() {
        let server = server();
        let engagement = server.engage().await.unwrap();
        let reply = server
            .handle(RpcRequest::ReportGet {
                server: "ltlwc-other".into(),
                session: engagement.session_id,
            })
            .await;
        assert!(matches!(
            reply.into_result(),
            Err(ServerError::WrongServer { .. })
        ));
        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let server = server();
        let err = server.report_get("doorstep-missing").await.unwrap_err();
        assert_eq!(err, ServerError::UnknownSession("doorstep-missing".into()));
    }

    #[tokio::test]
    async fn test_shutdown_publishes_cancelled_result() {
        let server = server();
        let mut events = server.subscribe();
        let engagement = server.engage().await.unwrap();
        server.shutdown().await.unwrap();

        let ServerEvent::Result { session_id, .. } = events.recv().await.unwrap();
        assert_eq!(session_id, engagement.session_id);
        assert!(server.sessions().is_empty());
    }
}
