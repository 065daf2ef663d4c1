//! Typed client for a doorstep server.

use std::collections::HashMap;
use std::sync::Arc;

use doorstep_engine::{EngineError, ProcessorIni};
use doorstep_report::Report;
use serde_json::Value;
use tracing::debug;

use crate::channel::RpcChannel;
use crate::error::{Result, ServerError};
use crate::protocol::{Engagement, RpcRequest};

/// Client side of the four server calls.
///
/// `engage` must come first; the server and session ids it returns address
/// every later call.
#[derive(Clone)]
pub struct DoorstepClient {
    channel: Arc<dyn RpcChannel>,
}

impl DoorstepClient {
    pub fn new(channel: Arc<dyn RpcChannel>) -> Self {
        Self { channel }
    }

    async fn call(&self, request: RpcRequest) -> Result<Value> {
        debug!(method = request.method(), "Calling server");
        self.channel.call(request).await?.into_result()
    }

    /// Open a session, returning `(server_id, session_id)`.
    pub async fn engage(&self) -> Result<Engagement> {
        let value = self.call(RpcRequest::Engage).await?;
        serde_json::from_value(value).map_err(|e| ServerError::Channel(e.to_string()))
    }

    pub async fn post_processor(
        &self,
        engagement: &Engagement,
        modules: HashMap<String, String>,
        definitions: &ProcessorIni,
    ) -> Result<()> {
        let definitions = serde_json::to_value(definitions)
            .map_err(|e| ServerError::InvalidRequest(e.to_string()))?;
        self.call(RpcRequest::ProcessorPost {
            server: engagement.server_id.clone(),
            session: engagement.session_id.clone(),
            modules,
            definitions,
        })
        .await?;
        Ok(())
    }

    /// Post the data file. With `redirect`, `content` is a URL or path the
    /// server fetches itself.
    pub async fn post_data(
        &self,
        engagement: &Engagement,
        filename: &str,
        content: impl Into<String>,
        redirect: bool,
    ) -> Result<()> {
        self.call(RpcRequest::DataPost {
            server: engagement.server_id.clone(),
            session: engagement.session_id.clone(),
            filename: filename.to_string(),
            content: content.into(),
            redirect,
        })
        .await?;
        Ok(())
    }

    /// Wait for the run and fetch its report.
    pub async fn get_report(&self, engagement: &Engagement) -> Result<Report> {
        let value = self
            .call(RpcRequest::ReportGet {
                server: engagement.server_id.clone(),
                session: engagement.session_id.clone(),
            })
            .await?;
        let json = value
            .as_str()
            .ok_or_else(|| ServerError::Channel("report is not a JSON string".to_string()))?;
        Ok(Report::parse_str(json).map_err(EngineError::from)?)
    }
}
