//! Error types for the engine binary.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading or validation failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: dispatch_core::config::ConfigError,
    },

    /// The bridge could not start.
    #[error("bridge error: {source}")]
    Bridge {
        /// The underlying startup error.
        #[from]
        source: dispatch_bridge::StartupError,
    },

    /// Waiting for the shutdown signal failed.
    #[error("signal error: {source}")]
    Signal {
        /// The underlying I/O error.
        source: std::io::Error,
    },
}
