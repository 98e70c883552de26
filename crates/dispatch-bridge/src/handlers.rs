//! HTTP control surface.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | Minimal HTML status page |
//! | `GET` | `/api/state` | Latest mirrored snapshot |
//! | `GET` | `/api/history` | Bridge history (`?limit=N`) |
//! | `GET` | `/api/status` | Upstream, observers, authority status |
//! | `POST` | `/api/command` | Forward one command |
//! | `GET` | `/ports` | Available upstream sources |
//! | `POST` | `/open` | Open or switch the upstream source |

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::response::{Html, IntoResponse};
use dispatch_core::AuthorityStatus;
use dispatch_types::{Command, InfoMessage, OrderState};
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::session::command_info;
use crate::state::AppState;
use crate::upstream::CommandDelivery;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Query parameters for `GET /api/history`.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Return only the newest `limit` entries.
    pub limit: Option<usize>,
}

/// Request body for `POST /open`.
#[derive(Debug, Deserialize)]
pub struct OpenRequest {
    /// `sim`, a configured source name, or `tcp://host:port`.
    pub path: String,
}

/// Response body of `GET /api/status`.
#[derive(Debug, Serialize)]
pub struct BridgeStatus {
    /// Open upstream source.
    pub upstream: Option<String>,
    /// Connected observers (both transports).
    pub observers: usize,
    /// Entries in the bridge history.
    pub history_len: usize,
    /// Most entries the bridge history keeps.
    pub history_capacity: usize,
    /// Commands forwarded since the last snapshot.
    pub pending_commands: usize,
    /// Simulated time of the latest snapshot.
    pub t: u64,
    /// Local authority status, when the simulator is open.
    pub authority: Option<AuthorityStatus>,
}

// ---------------------------------------------------------------------------
// GET /
// ---------------------------------------------------------------------------

/// Serve a minimal HTML page with bridge status and links.
pub async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let upstream = state
        .upstream
        .active_name()
        .await
        .unwrap_or_else(|| String::from("none"));
    let observers = state.hub.observer_count();
    let snapshot = state.hub.snapshot();
    let (t, orders, delivered, drivers) = snapshot.as_ref().map_or((0, 0, 0, 0), |s| {
        (
            s.t,
            s.world.orders.len(),
            s.world
                .orders
                .iter()
                .filter(|o| o.state == OrderState::Delivered)
                .count(),
            s.world.drivers.len(),
        )
    });

    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <title>Dispatch Bridge</title>
    <style>
        body {{ background: #0d1117; color: #c9d1d9; font-family: monospace; padding: 2rem; max-width: 800px; margin: 0 auto; }}
        h1 {{ color: #58a6ff; }}
        .metric {{ display: inline-block; background: #161b22; border: 1px solid #30363d; border-radius: 6px; padding: 1rem 1.5rem; margin: 0.5rem 0.5rem 0.5rem 0; }}
        .metric .label {{ color: #8b949e; font-size: 0.85rem; }}
        .metric .value {{ color: #58a6ff; font-size: 1.5rem; font-weight: bold; }}
        a {{ color: #58a6ff; }}
    </style>
</head>
<body>
    <h1>Dispatch Bridge</h1>
    <div>
        <div class="metric"><div class="label">Upstream</div><div class="value">{upstream}</div></div>
        <div class="metric"><div class="label">Observers</div><div class="value">{observers}</div></div>
        <div class="metric"><div class="label">t (ms)</div><div class="value">{t}</div></div>
        <div class="metric"><div class="label">Orders</div><div class="value">{orders}</div></div>
        <div class="metric"><div class="label">Delivered</div><div class="value">{delivered}</div></div>
        <div class="metric"><div class="label">Drivers</div><div class="value">{drivers}</div></div>
    </div>
    <h2>API</h2>
    <ul>
        <li><a href="/api/state">/api/state</a></li>
        <li><a href="/api/history">/api/history</a></li>
        <li><a href="/api/status">/api/status</a></li>
        <li><a href="/ports">/ports</a></li>
        <li><code>ws://host:port/ws</code></li>
    </ul>
</body>
</html>"#
    ))
}

// ---------------------------------------------------------------------------
// Mirror reads
// ---------------------------------------------------------------------------

/// Return the latest snapshot in its wire shape.
pub async fn get_state(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, BridgeError> {
    state
        .hub
        .snapshot()
        .map(Json)
        .ok_or_else(|| BridgeError::NotFound(String::from("no state received yet")))
}

/// Return the bridge history, oldest first.
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryQuery>,
) -> impl IntoResponse {
    let mut items = state.hub.history();
    if let Some(limit) = params.limit {
        let skip = items.len().saturating_sub(limit);
        items.drain(..skip);
    }
    Json(serde_json::json!({
        "count": items.len(),
        "items": items,
    }))
}

/// Return bridge and authority status.
pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(BridgeStatus {
        upstream: state.upstream.active_name().await,
        observers: state.hub.observer_count(),
        history_len: state.hub.history().len(),
        history_capacity: state.hub.history_capacity(),
        pending_commands: state.hub.pending().len(),
        t: state.hub.current_t(),
        authority: state.upstream.authority_status().await,
    })
}

// ---------------------------------------------------------------------------
// Commands and sources
// ---------------------------------------------------------------------------

/// Forward one command to the upstream authority.
///
/// Rejections answer 422 and an unreachable upstream 503; both carry the
/// JSON error body.
pub async fn post_command(
    State(state): State<Arc<AppState>>,
    Json(command): Json<Command>,
) -> Result<Json<InfoMessage>, BridgeError> {
    let cmd = command.name();
    let result = state.upstream.forward("http", command).await;
    match result {
        Ok(CommandDelivery::Rejected(reason)) => Err(BridgeError::Rejected {
            cmd,
            reason: reason.to_string(),
        }),
        Err(err) => Err(err.into()),
        ok => Ok(Json(command_info(cmd, &ok))),
    }
}

/// List the upstream sources that can be opened.
pub async fn list_ports(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.upstream.sources().await)
}

/// Open (or switch to) an upstream source.
pub async fn open_port(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OpenRequest>,
) -> Result<impl IntoResponse, BridgeError> {
    let name = state.upstream.open(&request.path).await?;
    Ok(Json(serde_json::json!({
        "ok": true,
        "path": name,
    })))
}
