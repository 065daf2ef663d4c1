//! Wire types for calls between a client and a doorstep server.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ServerError};

/// Calls from client to server.
///
/// Every call after `engage` names the server and session it was given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum RpcRequest {
    /// Open a session.
    #[serde(rename = "engage")]
    Engage,
    /// Attach processors.
    #[serde(rename = "processor.post")]
    ProcessorPost {
        server: String,
        session: String,
        /// Module filename to source text.
        modules: HashMap<String, String>,
        /// The processor definitions document.
        definitions: Value,
    },
    /// Attach the data file.
    #[serde(rename = "data.post")]
    DataPost {
        server: String,
        session: String,
        filename: String,
        content: String,
        #[serde(default)]
        redirect: bool,
    },
    /// Fetch the compiled report, waiting for the run if needed.
    #[serde(rename = "report.get")]
    ReportGet { server: String, session: String },
}

impl RpcRequest {
    pub fn method(&self) -> &'static str {
        match self {
            RpcRequest::Engage => "engage",
            RpcRequest::ProcessorPost { .. } => "processor.post",
            RpcRequest::DataPost { .. } => "data.post",
            RpcRequest::ReportGet { .. } => "report.get",
        }
    }
}

/// Reply to one [`RpcRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum RpcReply {
    Ok(Value),
    Error(ServerError),
}

impl RpcReply {
    pub fn ack() -> Self {
        RpcReply::Ok(Value::Null)
    }

    pub fn into_result(self) -> Result<Value> {
        match self {
            RpcReply::Ok(value) => Ok(value),
            RpcReply::Error(err) => Err(err),
        }
    }
}

impl From<Result<Value>> for RpcReply {
    fn from(result: Result<Value>) -> Self {
        match result {
            Ok(value) => RpcReply::Ok(value),
            Err(err) => RpcReply::Error(err),
        }
    }
}

/// Body of a successful `engage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    pub server_id: String,
    pub session_id: String,
}

/// Events the server publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A session's run has finished; its report can be fetched.
    Result {
        server_id: String,
        session_id: String,
    },
}
