//! Dispatch engine binary.
//!
//! Wires the bridge to its configured upstream and runs until Ctrl-C.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `dispatch-config.yaml` (or `DISPATCH_CONFIG`)
//! 2. Apply environment overrides and validate
//! 3. Initialize structured logging (tracing)
//! 4. Start the bridge: bind listeners, open the upstream
//! 5. Start the console hook
//! 6. Wait for Ctrl-C, then shut everything down

mod console;
mod error;

use std::path::PathBuf;
use std::sync::Arc;

use dispatch_core::SimulationConfig;
use dispatch_core::config::LoggingConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

/// Config file looked up in the working directory.
const DEFAULT_CONFIG_PATH: &str = "dispatch-config.yaml";

#[tokio::main]
async fn main() -> Result<(), EngineError> {
    let (config, source) = load_config()?;
    init_logging(&config.logging);

    info!("dispatch-engine starting");
    match &source {
        Some(path) => info!(path = %path.display(), "Configuration loaded"),
        None => info!("Config file not found, using defaults"),
    }
    info!(
        world_name = config.world.name,
        seed = config.world.seed,
        tick_interval_ms = config.world.tick_interval_ms,
        http_port = config.bridge.http_port,
        tcp_port = config.bridge.tcp_port,
        upstream = config.bridge.upstream,
        "Configuration ready"
    );

    let bridge = dispatch_bridge::start_bridge(&config).await?;
    let console = console::spawn(Arc::clone(&bridge.state.hub));
    info!("Type `{}` to broadcast a test event", console::TEST_COMMAND);

    tokio::signal::ctrl_c()
        .await
        .map_err(|source| EngineError::Signal { source })?;

    info!("Shutdown requested");
    console.abort();
    bridge.shutdown().await;
    info!("dispatch-engine shutdown complete");
    Ok(())
}

/// Load, override and validate the configuration.
///
/// Returns the file it came from, or `None` when defaults were used.
fn load_config() -> Result<(SimulationConfig, Option<PathBuf>), EngineError> {
    let path = std::env::var_os("DISPATCH_CONFIG")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let (mut config, source) = if path.exists() {
        (SimulationConfig::from_file(&path)?, Some(path))
    } else {
        (SimulationConfig::default(), None)
    };
    config.apply_env_overrides()?;
    config.validate()?;
    Ok((config, source))
}

/// `RUST_LOG` wins over the configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}
