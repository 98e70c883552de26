//! Raw line-protocol observers.
//!
//! The TCP listener speaks exactly what travels on the authority's byte
//! stream: one JSON message per line. It lets byte-stream tools attach to
//! the bridge the same way they would attach to a board.
//!
//! The line protocol has no ping, so frames delivered to the observer count
//! as activity too. A session is closed only after the idle period passes
//! with nothing going either way.

use std::sync::Arc;
use std::time::Duration;

use dispatch_proto::{FramedReader, FramedWriter, Message, encode_line};
use dispatch_types::InfoMessage;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::hub::Frame;
use crate::session::handle_inbound;
use crate::state::AppState;
use crate::ws::{IDLE_DISABLED, idle_deadline};

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accept observers on `listener` until the task is aborted.
pub async fn serve_tcp(listener: TcpListener, state: Arc<AppState>) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let (read, write) = socket.into_split();
                    let origin = state.next_origin("tcp");
                    info!(%origin, %peer, "TCP observer connected");
                    serve_observer(read, write, &state, &origin).await;
                });
            }
            Err(err) => {
                warn!(error = %err, "TCP accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

fn line(frame: &Frame) -> Vec<u8> {
    let mut line = Vec::with_capacity(frame.len().saturating_add(1));
    line.extend_from_slice(frame.as_bytes());
    line.push(b'\n');
    line
}

/// Run one observer session over any byte stream pair.
pub async fn serve_observer<R, W>(reader: R, writer: W, state: &AppState, origin: &str)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = FramedReader::new(reader, state.session.max_frame_bytes);
    let mut writer = FramedWriter::new(writer);

    let (replay, mut rx) = state.hub.connect();
    for frame in &replay {
        if writer.send_frame(&line(frame)).await.is_err() {
            debug!(origin, "TCP observer left during replay");
            return;
        }
    }

    let idle_timeout = state.session.idle_timeout;
    let idle = tokio::time::sleep(idle_timeout.unwrap_or(IDLE_DISABLED));
    tokio::pin!(idle);

    let reason = loop {
        tokio::select! {
            result = rx.recv() => match result {
                Ok(frame) => {
                    if writer.send_frame(&line(&frame)).await.is_err() {
                        break "send failed";
                    }
                    if let Some(timeout) = idle_timeout {
                        idle.as_mut().reset(idle_deadline(timeout));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(origin, skipped, "TCP observer lagged, skipping ahead");
                }
                Err(RecvError::Closed) => break "hub closed",
            },
            next = reader.next_line() => {
                if let Some(timeout) = idle_timeout {
                    idle.as_mut().reset(idle_deadline(timeout));
                }
                let reply = match next {
                    Ok(Some(Ok(text))) => handle_inbound(state, origin, &text).await,
                    Ok(Some(Err(err))) => {
                        warn!(origin, error = %err, "Observer frame dropped");
                        Some(Message::Info(InfoMessage::warn(err.to_string())))
                    }
                    Ok(None) => break "closed by client",
                    Err(err) => {
                        debug!(origin, error = %err, "TCP read failed");
                        break "read failed";
                    }
                };
                if let Some(reply) = reply {
                    match encode_line(&reply) {
                        Ok(frame) => {
                            if writer.send_frame(&frame).await.is_err() {
                                break "send failed";
                            }
                        }
                        Err(err) => warn!(origin, error = %err, "Reply not encoded"),
                    }
                }
            }
            () = &mut idle, if idle_timeout.is_some() => {
                info!(origin, "Closing idle TCP observer");
                break "idle timeout";
            }
        }
    };

    debug!(origin, reason, "TCP observer disconnected");
}
