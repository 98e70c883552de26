//! `WebSocket` observers.
//!
//! Clients connect to `GET /ws`. Each connection gets the greeting, the
//! bridge history and the latest state, then every frame the hub
//! publishes. Text frames from the client are treated as protocol lines;
//! commands are forwarded and answered with an `info` result.
//!
//! A client that falls behind skips the frames it missed; the next `state`
//! brings it back in sync.
//!
//! When the idle timer runs out the bridge sends a Ping and waits one more
//! period. Any inbound frame, the Pong included, keeps the connection open,
//! so a display that only listens survives as long as its socket answers.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use dispatch_proto::encode_text;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::hub::Frame;
use crate::session::handle_inbound;
use crate::state::AppState;

/// Stand-in duration for a disabled idle timer; the branch is never polled.
pub(crate) const IDLE_DISABLED: Duration = Duration::from_secs(86_400);

pub(crate) fn idle_deadline(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or(now)
}

/// What to do when the idle timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IdleAction {
    /// Ask the client to prove it is alive.
    Ping,
    /// The client ignored the Ping.
    Close,
}

/// Liveness tracking for one `WebSocket` observer.
#[derive(Debug, Default)]
pub(crate) struct IdleProbe {
    pinged: bool,
}

impl IdleProbe {
    pub(crate) const fn on_inbound(&mut self) {
        self.pinged = false;
    }

    pub(crate) const fn on_deadline(&mut self) -> IdleAction {
        if self.pinged {
            IdleAction::Close
        } else {
            self.pinged = true;
            IdleAction::Ping
        }
    }
}

/// Upgrade an HTTP request to an observer connection.
///
/// # Route
///
/// `GET /ws`
pub async fn ws_observer(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let limit = state.session.max_frame_bytes;
    ws.max_message_size(limit)
        .on_upgrade(|socket| handle_ws(socket, state))
}

fn text(frame: &Frame) -> WsMessage {
    WsMessage::Text(frame.to_string().into())
}

async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
    let origin = state.next_origin("ws");
    debug!(%origin, "WebSocket observer connected");

    let (replay, mut rx) = state.hub.connect();
    for frame in &replay {
        if socket.send(text(frame)).await.is_err() {
            debug!(%origin, "WebSocket observer left during replay");
            return;
        }
    }

    let idle_timeout = state.session.idle_timeout;
    let idle = tokio::time::sleep(idle_timeout.unwrap_or(IDLE_DISABLED));
    tokio::pin!(idle);
    let mut probe = IdleProbe::default();

    let reason = loop {
        tokio::select! {
            result = rx.recv() => match result {
                Ok(frame) => {
                    if socket.send(text(&frame)).await.is_err() {
                        break "send failed";
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(%origin, skipped, "WebSocket observer lagged, skipping ahead");
                }
                Err(RecvError::Closed) => break "hub closed",
            },
            msg = socket.recv() => {
                probe.on_inbound();
                if let Some(timeout) = idle_timeout {
                    idle.as_mut().reset(idle_deadline(timeout));
                }
                match msg {
                    Some(Ok(WsMessage::Text(body))) => {
                        let Some(reply) = handle_inbound(&state, &origin, body.as_str()).await else {
                            continue;
                        };
                        match encode_text(&reply) {
                            Ok(json) => {
                                if socket.send(WsMessage::Text(json.into())).await.is_err() {
                                    break "send failed";
                                }
                            }
                            Err(err) => warn!(%origin, error = %err, "Reply not encoded"),
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if socket.send(WsMessage::Pong(data)).await.is_err() {
                            break "pong failed";
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break "closed by client",
                    Some(Err(err)) => {
                        debug!(%origin, error = %err, "WebSocket error");
                        break "socket error";
                    }
                    Some(Ok(WsMessage::Binary(_) | WsMessage::Pong(_))) => {}
                }
            }
            () = &mut idle, if idle_timeout.is_some() => match probe.on_deadline() {
                IdleAction::Ping => {
                    debug!(%origin, "Idle WebSocket observer, sending ping");
                    if socket.send(WsMessage::Ping(Bytes::new())).await.is_err() {
                        break "ping failed";
                    }
                    if let Some(timeout) = idle_timeout {
                        idle.as_mut().reset(idle_deadline(timeout));
                    }
                }
                IdleAction::Close => {
                    info!(%origin, "Closing idle WebSocket observer");
                    socket.send(WsMessage::Close(None)).await.ok();
                    break "idle timeout";
                }
            },
        }
    };

    debug!(%origin, reason, "WebSocket observer disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_client_is_pinged_before_close() {
        let mut probe = IdleProbe::default();
        assert_eq!(probe.on_deadline(), IdleAction::Ping);
        assert_eq!(probe.on_deadline(), IdleAction::Close);
    }

    #[test]
    fn pong_keeps_a_listening_client() {
        let mut probe = IdleProbe::default();
        for _ in 0..5 {
            assert_eq!(probe.on_deadline(), IdleAction::Ping);
            probe.on_inbound();
        }
    }
}
