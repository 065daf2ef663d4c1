//! Serve command - answer doorstep RPC calls over stdin and stdout.
//!
//! Each input line is one JSON [`RpcRequest`]; each reply is written as one
//! JSON line, in request order. With `--events`, [`ServerEvent`]s are
//! interleaved as they happen. Sessions are closed when input ends.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use doorstep_server::{DoorstepServer, RpcReply, RpcRequest, ServerConfig, ServerError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use super::Context;

/// Arguments for the serve command.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Also write run-finished events to stdout
    #[arg(long)]
    pub events: bool,
}

/// Run the serve command.
pub async fn run(args: ServeArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.make_engine()?;
    let server = Arc::new(DoorstepServer::new(
        engine,
        ServerConfig::from_config(&ctx.config),
    ));
    info!(server = server.id(), engine = %ctx.engine, "Serving on stdin");

    let (lines_tx, mut lines_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = lines_rx.recv().await {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let forwarder = args.events.then(|| {
        let mut events = server.subscribe();
        let lines_tx = lines_tx.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(line) => {
                            if lines_tx.send(line).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "Unserializable event"),
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    });

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = input.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => server.handle(request).await,
            Err(e) => RpcReply::Error(ServerError::InvalidRequest(e.to_string())),
        };
        lines_tx.send(serde_json::to_string(&reply)?)?;
    }

    let closed = server.shutdown().await;
    if let Some(forwarder) = forwarder {
        forwarder.abort();
    }
    drop(lines_tx);
    writer.await??;
    closed?;
    Ok(())
}
