//! Newline-delimited JSON-RPC over the relay's own stdin/stdout
//!
//! Host lines are dispatched concurrently; every response and notification is
//! queued and written by a single writer task so lines never interleave.

use std::sync::Arc;

use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::{mpsc, oneshot},
    task::JoinSet,
};
use tracing::{info, warn};

use crate::mcp::{
    rpc::{json_rpc_error, INVALID_REQUEST, PARSE_ERROR},
    server::handle_json_rpc_value,
};
use crate::relay::Relay;

/// Serves the host until `input` reaches EOF, then kills the child and flushes
/// everything still queued on `outbound`.
pub async fn serve<R, W>(
    relay: Arc<Relay>,
    input: R,
    output: W,
    outbound: mpsc::UnboundedSender<Value>,
    queued: mpsc::UnboundedReceiver<Value>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (stop_writer, writer_stopped) = oneshot::channel();
    let writer = tokio::spawn(write_messages(output, queued, writer_stopped));

    let mut lines = BufReader::new(input).lines();
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }

                let relay = relay.clone();
                let outbound = outbound.clone();
                in_flight.spawn(async move {
                    if let Some(response) = handle_line(&relay, &line).await {
                        let _ = outbound.send(response);
                    }
                });
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(err) = joined {
                    warn!(error = %err, "host request task failed");
                }
            }
        }
    }

    info!("host closed stdin; shutting down");
    relay.shutdown().await;
    while let Some(joined) = in_flight.join_next().await {
        if let Err(err) = joined {
            warn!(error = %err, "host request task failed");
        }
    }

    let _ = stop_writer.send(());
    match writer.await {
        Ok(result) => result,
        Err(err) => Err(std::io::Error::other(err)),
    }
}

pub async fn handle_line(relay: &Relay, line: &str) -> Option<Value> {
    let payload: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(_) => return Some(json_rpc_error(None, PARSE_ERROR, "Parse error")),
    };

    let Value::Array(batch) = payload else {
        return handle_json_rpc_value(relay, payload).await;
    };

    if batch.is_empty() {
        return Some(json_rpc_error(None, INVALID_REQUEST, "Invalid Request"));
    }

    let mut responses = Vec::new();
    for item in batch {
        if let Some(response) = handle_json_rpc_value(relay, item).await {
            responses.push(response);
        }
    }

    if responses.is_empty() {
        return None;
    }
    Some(Value::Array(responses))
}

async fn write_messages<W>(
    mut output: W,
    mut queued: mpsc::UnboundedReceiver<Value>,
    mut stop: oneshot::Receiver<()>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            message = queued.recv() => match message {
                Some(message) => write_message(&mut output, &message).await?,
                None => break,
            },
            _ = &mut stop => {
                while let Ok(message) = queued.try_recv() {
                    write_message(&mut output, &message).await?;
                }
                break;
            }
        }
    }
    output.flush().await
}

async fn write_message<W>(output: &mut W, message: &Value) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    output.write_all(&line).await?;
    output.flush().await
}
