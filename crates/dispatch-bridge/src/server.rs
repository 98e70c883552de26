//! Listener lifecycle for the HTTP and raw TCP surfaces.
//!
//! Both listeners are bound eagerly by [`bind`] so address errors surface
//! at startup; serving then runs on background tasks until aborted.

use std::net::SocketAddr;
use std::sync::Arc;

use dispatch_core::config::BridgeConfig;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::router::build_router;
use crate::state::AppState;
use crate::tcp::serve_tcp;

/// Errors that can occur when starting or running a listener.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to the network address.
    #[error("bind error: {0}")]
    Bind(String),

    /// The server encountered a fatal error while serving.
    #[error("serve error: {0}")]
    Serve(String),
}

/// Listeners bound but not yet serving.
#[derive(Debug)]
pub struct Listeners {
    /// HTTP + `WebSocket`.
    pub http: TcpListener,
    /// Raw line protocol, absent when `tcp_port` is 0.
    pub tcp: Option<TcpListener>,
}

/// Running listener tasks.
#[derive(Debug)]
pub struct ServerHandles {
    /// HTTP + `WebSocket` task.
    pub http: JoinHandle<()>,
    /// Raw line-protocol task.
    pub tcp: Option<JoinHandle<()>>,
}

impl ServerHandles {
    /// Stop accepting connections.
    pub fn abort(&self) {
        self.http.abort();
        if let Some(tcp) = &self.tcp {
            tcp.abort();
        }
    }
}

async fn bind_one(host: &str, port: u16) -> Result<TcpListener, ServerError> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| ServerError::Bind(format!("invalid address {host}:{port}: {e}")))?;
    TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(format!("bind failed on {addr}: {e}")))
}

/// Bind the listeners named in `config`.
pub async fn bind(config: &BridgeConfig) -> Result<Listeners, ServerError> {
    let http = bind_one(&config.host, config.http_port).await?;
    let tcp = if config.tcp_port == 0 {
        None
    } else {
        Some(bind_one(&config.host, config.tcp_port).await?)
    };
    Ok(Listeners { http, tcp })
}

/// Serve HTTP on `listener` until the process ends.
pub async fn start_server(listener: TcpListener, state: Arc<AppState>) -> Result<(), ServerError> {
    let router = build_router(state);
    axum::serve(listener, router)
        .await
        .map_err(|e| ServerError::Serve(format!("serve error: {e}")))
}

/// Spawn both listeners on background tasks.
pub fn spawn(listeners: Listeners, state: &Arc<AppState>) -> ServerHandles {
    if let Ok(addr) = listeners.http.local_addr() {
        info!(%addr, "Bridge HTTP listening");
    }
    let http_state = Arc::clone(state);
    let http = tokio::spawn(async move {
        if let Err(e) = start_server(listeners.http, http_state).await {
            error!(error = %e, "Bridge HTTP server exited with error");
        }
    });

    let tcp = listeners.tcp.map(|listener| {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "Bridge line protocol listening");
        }
        tokio::spawn(serve_tcp(listener, Arc::clone(state)))
    });

    ServerHandles { http, tcp }
}
