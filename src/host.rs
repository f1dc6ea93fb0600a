//! Host server loop joining the two boundary collaborators to the mailbox:
//! the runtime attaches its method channel over a WebSocket, and activation
//! frames deliver deep links on the same port.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::activation::{ActivationAck, ActivationFrame};
use crate::bridge::MethodChannel;
use crate::mailbox::MailboxError;
use crate::HostContext;

// ─── JSON-RPC 2.0 types ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RpcRequest {
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

#[derive(Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Serialize)]
struct RpcError {
    code: i32,
    message: String,
}

// ─── Error codes — must match the runtime side of the bridge ─────────────────
//
// unknownChannel         = -32001  (handshake named a channel this host does not serve)
// channelAlreadyAttached = -32002  (a runtime already holds the channel — one-shot binding)

const PARSE_ERROR: i32 = -32700;
const INVALID_REQUEST: i32 = -32600;
const UNKNOWN_CHANNEL: i32 = -32001;
const CHANNEL_ALREADY_ATTACHED: i32 = -32002;

/// How long the runtime gets to send `channel.open` after connecting.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// ─── Server ──────────────────────────────────────────────────────────────────

pub async fn run(ctx: Arc<HostContext>) -> Result<()> {
    let addr = ctx.config.socket_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "host shell listening (runtime WebSocket + activations on same port)");

    // Graceful shutdown: resolve on SIGTERM (Unix) or Ctrl-C (all platforms).
    // Pinned so we can use it in the select! loop without moving.
    let shutdown = make_shutdown_future();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("shutdown signal received — stopping host shell");
                break;
            }

            conn = listener.accept() => {
                let (stream, peer) = match conn {
                    Ok(c) => c,
                    Err(e) => {
                        error!(err = %e, "accept error");
                        continue;
                    }
                };
                debug!(peer = %peer, "new connection");
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, ctx).await {
                        warn!(peer = %peer, err = %e, "connection error");
                    }
                });
            }
        }
    }

    info!("host shell stopped");
    Ok(())
}

/// Returns a future that resolves when a shutdown signal is received.
///
/// On Unix we listen for SIGTERM *and* Ctrl-C.
/// On other platforms we listen for Ctrl-C only.
async fn make_shutdown_future() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

async fn handle_connection(stream: TcpStream, ctx: Arc<HostContext>) -> Result<()> {
    // Both collaborators share the one local port. The runtime's WebSocket
    // upgrade starts with "GET "; activation frames are JSON lines and never
    // do, so peeking the first bytes is enough to tell them apart.
    let mut peek_buf = [0u8; 4];
    let n = stream.peek(&mut peek_buf).await.unwrap_or(0);
    if n >= 4 && &peek_buf[..4] == b"GET " {
        return attach_runtime(stream, ctx).await;
    }
    handle_activation(stream, ctx).await
}

// ─── Activation path ─────────────────────────────────────────────────────────

/// Read one activation frame, route its link through the mailbox, acknowledge.
///
/// A delivery failure propagates out of this handler before the ack is
/// written — the forwarding process sees the connection drop instead of a
/// success line.
async fn handle_activation(stream: TcpStream, ctx: Arc<HostContext>) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let frame: ActivationFrame =
        serde_json::from_str(line.trim()).context("malformed activation frame")?;

    match frame.link {
        Some(link) => {
            ctx.deliver_link(&link).await?;
        }
        // The platform re-activated us without routing data — nothing to do.
        None => debug!("activation without a link — ignored"),
    }

    let ack = serde_json::to_string(&ActivationAck { ok: true })?;
    write_half.write_all(ack.as_bytes()).await?;
    write_half.write_all(b"\n").await?;
    Ok(())
}

// ─── Runtime attach path ─────────────────────────────────────────────────────

/// Upgrade to WebSocket, run the `channel.open` handshake, bind the method
/// channel, then pump queued invocations until the runtime disconnects.
async fn attach_runtime(stream: TcpStream, ctx: Arc<HostContext>) -> Result<()> {
    let ws = accept_async(stream).await?;
    let (mut sink, mut stream) = ws.split();

    // ── channel.open handshake ───────────────────────────────────────────────
    // The first message must be a `channel.open` request naming the channel
    // this host serves. Anything else is rejected before the mailbox ever
    // sees the connection.
    let first = tokio::time::timeout(HANDSHAKE_TIMEOUT, stream.next()).await;

    let text = match first {
        Ok(Some(Ok(Message::Text(t)))) => t,
        // Timeout, connection closed, or non-text frame — reject silently.
        _ => {
            debug!("runtime connection dropped before channel.open");
            return Ok(());
        }
    };

    let req: RpcRequest = match serde_json::from_str(&text) {
        Ok(r) => r,
        Err(_) => {
            let _ = sink
                .send(Message::Text(error_response(
                    Value::Null,
                    PARSE_ERROR,
                    "Parse error",
                )))
                .await;
            return Ok(());
        }
    };

    let id = req.id.unwrap_or(Value::Null);

    if req.jsonrpc != "2.0" || req.method != "channel.open" {
        let _ = sink
            .send(Message::Text(error_response(
                id,
                INVALID_REQUEST,
                "Expected channel.open",
            )))
            .await;
        return Ok(());
    }

    let requested = req
        .params
        .as_ref()
        .and_then(|p| p.get("channel"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    if requested != ctx.config.channel.name {
        let _ = sink
            .send(Message::Text(error_response(
                id,
                UNKNOWN_CHANNEL,
                &format!("Unknown channel '{requested}'"),
            )))
            .await;
        return Ok(());
    }

    // Handshake accepted — bind the channel. Binding flushes any buffered
    // link into the queue, so it lands on the wire right after the response.
    let (tx, mut rx) = mpsc::unbounded_channel();
    let channel = MethodChannel::new(&ctx.config.channel.name, tx);
    match ctx.attach_runtime(channel).await {
        Ok(()) => {}
        Err(MailboxError::AlreadyAttached) => {
            let _ = sink
                .send(Message::Text(error_response(
                    id,
                    CHANNEL_ALREADY_ATTACHED,
                    "A runtime is already attached to this channel",
                )))
                .await;
            return Ok(());
        }
        Err(MailboxError::Channel(e)) => return Err(e.into()),
    }

    let resp = serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": { "attached": true }
    });
    sink.send(Message::Text(resp.to_string())).await?;
    info!(channel = %ctx.config.channel.name, "runtime attached");

    // ── Invocation pump ──────────────────────────────────────────────────────
    loop {
        tokio::select! {
            // Queued invocation from the mailbox
            frame = rx.recv() => {
                match frame {
                    Some(msg) => {
                        if let Err(e) = sink.send(msg).await {
                            warn!(err = %e, "runtime send error");
                            break;
                        }
                    }
                    // Every MethodChannel clone dropped — nothing left to pump.
                    None => break,
                }
            }
            // Incoming runtime traffic — the bridge is outbound-only, so only
            // liveness matters here.
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(err = %e, "runtime ws error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    // The binding is one-shot: the channel stays attached, and deliveries
    // from here on fail with a closed-channel error at the call site.
    warn!(
        channel = %ctx.config.channel.name,
        "runtime disconnected — deep links can no longer be delivered"
    );
    Ok(())
}

fn error_response(id: Value, code: i32, message: &str) -> String {
    let resp = RpcResponse {
        jsonrpc: "2.0",
        id,
        result: None,
        error: Some(RpcError {
            code,
            message: message.to_string(),
        }),
    };
    serde_json::to_string(&resp).unwrap_or_default()
}
