//! RPC surface of doorstep.
//!
//! A [`DoorstepServer`] holds sessions over one engine and answers four
//! calls:
//!
//! | Method | Input | Output |
//! |---|---|---|
//! | `engage` | | server and session ids |
//! | `processor.post` | module sources, definitions document | ack |
//! | `data.post` | filename, content, redirect flag | ack |
//! | `report.get` | | compiled report JSON |
//!
//! Failures travel as [`ServerError`], tagged so the client rebuilds the
//! same variant. When a run finishes the server publishes a
//! [`ServerEvent::Result`]. [`DoorstepClient`] speaks to a server through
//! any [`RpcChannel`]; [`LocalChannel`] reaches one in the same process.

pub mod channel;
pub mod client;
pub mod error;
pub mod protocol;
pub mod server;
pub mod sessions;

pub use channel::{LocalChannel, RpcChannel};
pub use client::DoorstepClient;
pub use error::{Result, ServerError};
pub use protocol::{Engagement, RpcReply, RpcRequest, ServerEvent};
pub use server::{DoorstepServer, ServerConfig};
pub use sessions::SessionSet;
