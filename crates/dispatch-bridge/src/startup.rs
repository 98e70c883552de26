//! Bridge startup helper for the engine binary.
//!
//! [`start_bridge`] builds the shared state, binds the listeners, opens the
//! configured upstream and spawns everything on background tasks.
//!
//! ```rust,ignore
//! let bridge = dispatch_bridge::start_bridge(&config).await?;
//! // ... wait for ctrl-c ...
//! bridge.shutdown().await;
//! ```

use std::sync::Arc;

use dispatch_core::SimulationConfig;
use tracing::{info, warn};

use crate::server::{self, ServerError, ServerHandles};
use crate::state::AppState;

/// Errors that can occur when starting the bridge.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// A listener failed to bind.
    #[error("server start error: {0}")]
    Server(#[from] ServerError),
}

/// A running bridge.
#[derive(Debug)]
pub struct Bridge {
    /// Shared state, for in-process publishers such as the console hook.
    pub state: Arc<AppState>,
    handles: ServerHandles,
}

impl Bridge {
    /// Stop the listeners and close the upstream.
    pub async fn shutdown(self) {
        self.handles.abort();
        if let Some(name) = self.state.upstream.close().await {
            info!(upstream = %name, "Upstream closed");
        }
    }
}

/// Start the bridge described by `config`.
///
/// A failure to open the configured upstream is logged, not fatal: the
/// bridge still serves observers and `POST /open` can pick a source later.
pub async fn start_bridge(config: &SimulationConfig) -> Result<Bridge, StartupError> {
    let state = Arc::new(AppState::new(config));
    let listeners = server::bind(&config.bridge).await?;

    let upstream = config.bridge.upstream.trim();
    if !upstream.is_empty() {
        match state.upstream.open(upstream).await {
            Ok(name) => info!(upstream = %name, "Initial upstream opened"),
            Err(err) => warn!(upstream, error = %err, "Initial upstream unavailable"),
        }
    }

    let handles = server::spawn(listeners, &state);
    Ok(Bridge { state, handles })
}
