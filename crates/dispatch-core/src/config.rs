//! Configuration loading and typed config structures.
//!
//! The configuration lives in `dispatch-config.yaml` (path overridable with
//! `DISPATCH_CONFIG`). Every field has a default, so a missing file or a
//! partial file is fine. A handful of environment variables override the
//! YAML for deployment convenience:
//!
//! - `PORT` overrides `bridge.http_port`
//! - `TCP_PORT` overrides `bridge.tcp_port`
//! - `UPSTREAM` overrides `bridge.upstream`

use std::path::Path;

use dispatch_types::KitchenAlgorithm;
use serde::Deserialize;

use crate::command::MAX_SPEED;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// An environment override could not be parsed.
    #[error("invalid value {value:?} for environment variable {var}")]
    Env {
        /// Variable name.
        var: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A value is outside its permitted range.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// Grid, timing and seed.
    #[serde(default)]
    pub world: WorldConfig,

    /// Kitchen sequencing and preparation times.
    #[serde(default)]
    pub kitchen: KitchenConfig,

    /// Driver capacity and assignment odds.
    #[serde(default)]
    pub fleet: FleetConfig,

    /// Synthetic order generation.
    #[serde(default)]
    pub ingestion: IngestionConfig,

    /// `STRESS` command behaviour.
    #[serde(default)]
    pub stress: StressConfig,

    /// Bridge listeners and upstream sources.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SimulationConfig {
    /// Load configuration from a YAML file and apply environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string. No environment overrides.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_env_overrides_from(|var| std::env::var(var).ok())
    }

    /// Apply overrides using `lookup` to resolve variables.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("PORT") {
            self.bridge.http_port = parse_port("PORT", value)?;
        }
        if let Some(value) = lookup("TCP_PORT") {
            self.bridge.tcp_port = parse_port("TCP_PORT", value)?;
        }
        if let Some(value) = lookup("UPSTREAM") {
            self.bridge.upstream = value;
        }
        Ok(())
    }

    /// Reject values the simulator cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.world;
        if w.rows == 0 || w.cols == 0 {
            return Err(invalid("world.rows and world.cols must be at least 1"));
        }
        if w.tick_interval_ms == 0 {
            return Err(invalid("world.tick_interval_ms must be at least 1"));
        }
        if w.speed == 0 || w.speed > MAX_SPEED {
            return Err(invalid(&format!("world.speed must be within 1..={MAX_SPEED}")));
        }
        if w.tick_interval_ms.checked_mul(u64::from(MAX_SPEED)).is_none() {
            return Err(invalid(&format!(
                "world.tick_interval_ms must leave room for speed {MAX_SPEED}"
            )));
        }
        if self.kitchen.prep_min_s == 0 || self.kitchen.prep_min_s > self.kitchen.prep_max_s {
            return Err(invalid(
                "kitchen.prep_min_s must be at least 1 and not above kitchen.prep_max_s",
            ));
        }
        if self.fleet.driver_capacity == 0 {
            return Err(invalid("fleet.driver_capacity must be at least 1"));
        }
        for (name, p) in [
            ("fleet.assign_probability", self.fleet.assign_probability),
            ("fleet.wander_probability", self.fleet.wander_probability),
            (
                "ingestion.auto_order_probability",
                self.ingestion.auto_order_probability,
            ),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(invalid(&format!("{name} must be within [0, 1]")));
            }
        }
        let b = &self.bridge;
        if b.history_capacity == 0 || b.broadcast_capacity == 0 || b.max_frame_bytes == 0 {
            return Err(invalid(
                "bridge.history_capacity, broadcast_capacity and max_frame_bytes must be at least 1",
            ));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.to_owned(),
    }
}

fn parse_port(var: &'static str, value: String) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_parse| ConfigError::Env { var, value })
}

/// Grid, timing and seed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorldConfig {
    /// Human-readable session name.
    #[serde(default = "default_world_name")]
    pub name: String,

    /// Random seed for reproducibility.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Number of streets.
    #[serde(default = "default_grid_side")]
    pub rows: u32,

    /// Number of avenues.
    #[serde(default = "default_grid_side")]
    pub cols: u32,

    /// Wall-clock milliseconds between ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Simulated-time multiplier applied to every tick.
    #[serde(default = "default_speed")]
    pub speed: u32,

    /// Houses placed on the default map.
    #[serde(default = "default_house_count")]
    pub house_count: u32,

    /// Stop after this many ticks. 0 runs until shutdown.
    #[serde(default)]
    pub max_ticks: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            name: default_world_name(),
            seed: default_seed(),
            rows: default_grid_side(),
            cols: default_grid_side(),
            tick_interval_ms: default_tick_interval_ms(),
            speed: default_speed(),
            house_count: default_house_count(),
            max_ticks: 0,
        }
    }
}

/// Kitchen sequencing and preparation times.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KitchenConfig {
    /// Initial algorithm of every restaurant.
    #[serde(default)]
    pub algorithm: KitchenAlgorithm,

    /// Shortest random preparation time in seconds.
    #[serde(default = "default_prep_min_s")]
    pub prep_min_s: u32,

    /// Longest random preparation time in seconds.
    #[serde(default = "default_prep_max_s")]
    pub prep_max_s: u32,

    /// Simulated milliseconds between acceptance and the start of preparation.
    #[serde(default = "default_handoff_delay_ms")]
    pub handoff_delay_ms: u64,
}

impl Default for KitchenConfig {
    fn default() -> Self {
        Self {
            algorithm: KitchenAlgorithm::default(),
            prep_min_s: default_prep_min_s(),
            prep_max_s: default_prep_max_s(),
            handoff_delay_ms: default_handoff_delay_ms(),
        }
    }
}

/// Driver capacity and assignment odds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FleetConfig {
    /// Orders a driver may carry at once.
    #[serde(default = "default_driver_capacity")]
    pub driver_capacity: u32,

    /// Per-tick chance an idle driver looks for pending work.
    #[serde(default = "default_assign_probability")]
    pub assign_probability: f64,

    /// Per-tick chance an idle driver with no work relocates to a random house.
    #[serde(default = "default_wander_probability")]
    pub wander_probability: f64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            driver_capacity: default_driver_capacity(),
            assign_probability: default_assign_probability(),
            wander_probability: default_wander_probability(),
        }
    }
}

/// Synthetic order generation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IngestionConfig {
    /// Per-tick chance of a random order. 0 disables ingestion.
    #[serde(default = "default_auto_order_probability")]
    pub auto_order_probability: f64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            auto_order_probability: default_auto_order_probability(),
        }
    }
}

/// `STRESS` command behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StressConfig {
    /// Orders submitted when the command omits `n`.
    #[serde(default = "default_stress_count")]
    pub default_count: u32,

    /// Wall-clock milliseconds between staggered submissions.
    #[serde(default = "default_stagger_ms")]
    pub stagger_ms: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            default_count: default_stress_count(),
            stagger_ms: default_stagger_ms(),
        }
    }
}

/// Kind of upstream authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// The in-process dispatch simulator.
    Simulator,
    /// A remote authority speaking the line protocol over TCP.
    Tcp,
}

/// A named upstream source offered by `GET /ports`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceConfig {
    /// Name used with `POST /open`.
    pub name: String,

    /// Source kind.
    pub kind: SourceKind,

    /// `host:port` for TCP sources.
    #[serde(default)]
    pub addr: Option<String>,
}

/// Bridge listeners and upstream sources.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BridgeConfig {
    /// Bind address for both listeners.
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP / WebSocket port.
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Raw line-protocol TCP port. 0 disables the listener.
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,

    /// Source opened at startup: a source name or `tcp://host:port`.
    #[serde(default = "default_upstream")]
    pub upstream: String,

    /// Additional named sources. `sim` is always available.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    /// Seconds without inbound traffic before an observer is closed.
    /// 0 disables the timeout.
    #[serde(default = "default_idle_timeout_s")]
    pub idle_timeout_s: u64,

    /// Entries kept in the bridge history ring.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Messages buffered per observer before it starts lagging.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,

    /// Longest accepted frame in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Milliseconds to wait for the authority to answer a command.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Drop snapshots older than the one the bridge already holds.
    #[serde(default)]
    pub ignore_stale_snapshots: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            tcp_port: default_tcp_port(),
            upstream: default_upstream(),
            sources: Vec::new(),
            idle_timeout_s: default_idle_timeout_s(),
            history_capacity: default_history_capacity(),
            broadcast_capacity: default_broadcast_capacity(),
            max_frame_bytes: default_max_frame_bytes(),
            command_timeout_ms: default_command_timeout_ms(),
            ignore_stale_snapshots: false,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_world_name() -> String {
    "dispatch".to_owned()
}

const fn default_seed() -> u64 {
    42
}

const fn default_grid_side() -> u32 {
    8
}

const fn default_tick_interval_ms() -> u64 {
    200
}

const fn default_speed() -> u32 {
    1
}

const fn default_house_count() -> u32 {
    12
}

const fn default_prep_min_s() -> u32 {
    20
}

const fn default_prep_max_s() -> u32 {
    44
}

const fn default_handoff_delay_ms() -> u64 {
    500
}

const fn default_driver_capacity() -> u32 {
    1
}

const fn default_assign_probability() -> f64 {
    1.0
}

const fn default_wander_probability() -> f64 {
    0.05
}

const fn default_auto_order_probability() -> f64 {
    0.08
}

const fn default_stress_count() -> u32 {
    dispatch_types::DEFAULT_STRESS_COUNT
}

const fn default_stagger_ms() -> u64 {
    80
}

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

const fn default_http_port() -> u16 {
    3000
}

const fn default_tcp_port() -> u16 {
    9000
}

fn default_upstream() -> String {
    "sim".to_owned()
}

const fn default_idle_timeout_s() -> u64 {
    300
}

const fn default_history_capacity() -> usize {
    200
}

const fn default_broadcast_capacity() -> usize {
    256
}

const fn default_max_frame_bytes() -> usize {
    1024 * 1024
}

const fn default_command_timeout_ms() -> u64 {
    2000
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SimulationConfig::default();
        assert_eq!(config.world.seed, 42);
        assert_eq!(config.world.rows, 8);
        assert_eq!(config.world.tick_interval_ms, 200);
        assert_eq!(config.kitchen.prep_min_s, 20);
        assert_eq!(config.bridge.http_port, 3000);
        assert_eq!(config.bridge.tcp_port, 9000);
        assert_eq!(config.bridge.history_capacity, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_partial_yaml() {
        let yaml = r#"
world:
  seed: 7
  speed: 4
kitchen:
  algorithm: FCFS
bridge:
  upstream: "tcp://10.0.0.5:7000"
  sources:
    - name: board
      kind: tcp
      addr: "10.0.0.5:7000"
logging:
  level: debug
  json: true
"#;
        let config = SimulationConfig::parse(yaml).unwrap();
        assert_eq!(config.world.seed, 7);
        assert_eq!(config.world.speed, 4);
        assert_eq!(config.world.cols, 8);
        assert_eq!(config.kitchen.algorithm, KitchenAlgorithm::FirstComeFirstServed);
        assert_eq!(config.bridge.sources.len(), 1);
        assert_eq!(config.bridge.sources.first().map(|s| s.kind), Some(SourceKind::Tcp));
        assert!(config.logging.json);
    }

    #[test]
    fn shipped_sample_is_valid() {
        let config =
            SimulationConfig::parse(include_str!("../../../dispatch-config.yaml")).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.world.name, "downtown");
        assert_eq!(config.bridge.upstream, "sim");
    }

    #[test]
    fn empty_yaml_gives_defaults() {
        let config = SimulationConfig::parse("{}").unwrap();
        assert_eq!(config, SimulationConfig::default());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = SimulationConfig::default();
        config
            .apply_env_overrides_from(|var| match var {
                "PORT" => Some("8080".to_owned()),
                "UPSTREAM" => Some("tcp://board:9100".to_owned()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.bridge.http_port, 8080);
        assert_eq!(config.bridge.tcp_port, 9000);
        assert_eq!(config.bridge.upstream, "tcp://board:9100");
    }

    #[test]
    fn bad_port_override_is_rejected() {
        let mut config = SimulationConfig::default();
        let result = config.apply_env_overrides_from(|var| {
            (var == "TCP_PORT").then(|| "ninety".to_owned())
        });
        assert!(matches!(result, Err(ConfigError::Env { var: "TCP_PORT", .. })));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = SimulationConfig::default();
        config.world.speed = 0;
        assert!(config.validate().is_err());

        let mut config = SimulationConfig::default();
        config.fleet.wander_probability = 1.5;
        assert!(config.validate().is_err());

        let mut config = SimulationConfig::default();
        config.kitchen.prep_min_s = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn tick_interval_must_survive_the_fastest_speed() {
        let mut config = SimulationConfig::default();
        config.world.tick_interval_ms = u64::MAX / 2;
        assert!(config.validate().is_err());

        config.world.tick_interval_ms = u64::MAX / u64::from(MAX_SPEED);
        assert!(config.validate().is_ok());

        config.world.speed = MAX_SPEED + 1;
        assert!(config.validate().is_err());
    }
}
