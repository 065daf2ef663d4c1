//! Transport between a client and a server.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Result, ServerError};
use crate::protocol::{RpcReply, RpcRequest};
use crate::server::DoorstepServer;

/// Carries one request to a server and its reply back.
#[async_trait]
pub trait RpcChannel: Send + Sync {
    async fn call(&self, request: RpcRequest) -> Result<RpcReply>;
}

/// Channel to a server in this process.
///
/// Requests and replies still pass through their JSON encoding, so what a
/// client sees is exactly what a remote one would.
#[derive(Clone)]
pub struct LocalChannel {
    server: Arc<DoorstepServer>,
}

impl LocalChannel {
    pub fn new(server: Arc<DoorstepServer>) -> Self {
        Self { server }
    }

    pub fn server(&self) -> &Arc<DoorstepServer> {
        &self.server
    }
}

fn channel_error(e: serde_json::Error) -> ServerError {
    ServerError::Channel(e.to_string())
}

#[async_trait]
impl RpcChannel for LocalChannel {
    async fn call(&self, request: RpcRequest) -> Result<RpcReply> {
        let wire = serde_json::to_string(&request).map_err(channel_error)?;
        let request: RpcRequest = serde_json::from_str(&wire)
            .map_err(|e| ServerError::InvalidRequest(e.to_string()))?;

        let reply = self.server.handle(request).await;

        let wire = serde_json::to_string(&reply).map_err(channel_error)?;
        serde_json::from_str(&wire).map_err(channel_error)
    }
}
