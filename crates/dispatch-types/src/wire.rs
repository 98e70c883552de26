//! Payloads carried by the line protocol: snapshots, events, history and
//! diagnostics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{EventKind, InfoLevel, KitchenAlgorithm};
use crate::ids::{DriverId, OrderId, RestaurantId};
use crate::world::WorldModel;

/// Aggregate figures derived from the World Model at snapshot time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(default)]
#[ts(export, export_to = "bindings/")]
pub struct Metrics {
    /// Mean seconds between READY and pickup, over picked-up orders.
    pub avg_wait_s: f64,
    /// Mean seconds between creation and delivery, over delivered orders.
    pub avg_delivery_s: f64,
    /// Kitchen algorithm of the first restaurant.
    pub kitchen_algo: KitchenAlgorithm,
    /// Name of the driver assignment policy.
    pub driver_policy: String,
    /// Queue length per restaurant.
    pub queues: BTreeMap<RestaurantId, u32>,
    /// Orders accepted so far.
    pub orders_total: u64,
    /// Orders delivered so far.
    pub orders_delivered: u64,
    /// Whether tick advancement is frozen.
    pub paused: bool,
    /// Current speed multiplier.
    pub speed: u32,
}

/// Full replace-style projection of the World Model at one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Snapshot {
    /// Logical simulated time in milliseconds.
    #[serde(default)]
    pub t: u64,
    /// Tick number that produced this snapshot.
    #[serde(default)]
    pub tick: u64,
    /// The entity collections and grid.
    #[serde(flatten)]
    pub world: WorldModel,
    /// Derived aggregates.
    #[serde(default)]
    pub metrics: Metrics,
}

/// A single state-delta assertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryEvent {
    /// Event name.
    pub ev: EventKind,
    /// Order the event is about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<OrderId>,
    /// Driver involved, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<DriverId>,
    /// Creation-to-delivery latency in simulated seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_s: Option<f64>,
    /// Simulated time the event happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<u64>,
    /// Free-form extra data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl DeliveryEvent {
    /// An event about `order` at simulated time `t`.
    pub const fn for_order(ev: EventKind, order: OrderId, t: u64) -> Self {
        Self {
            ev,
            order: Some(order),
            driver: None,
            latency_s: None,
            t: Some(t),
            payload: None,
        }
    }

    /// Attaches the driver involved.
    #[must_use]
    pub fn with_driver(mut self, driver: DriverId) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Attaches a delivery latency.
    #[must_use]
    pub fn with_latency(mut self, latency_s: f64) -> Self {
        self.latency_s = Some(latency_s);
        self
    }

    /// The board's button event.
    pub fn button_pressed(payload: serde_json::Value) -> Self {
        Self {
            ev: EventKind::ButtonPressed,
            order: None,
            driver: None,
            latency_s: None,
            t: None,
            payload: Some(payload),
        }
    }
}

/// One entry of the append-only log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    /// Simulated time in milliseconds.
    #[serde(default)]
    pub ts: u64,
    /// Human-readable text.
    pub msg: String,
}

impl HistoryItem {
    /// Creates an entry.
    pub fn new(ts: u64, msg: impl Into<String>) -> Self {
        Self {
            ts,
            msg: msg.into(),
        }
    }
}

/// Diagnostic notice. Also used to report command results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoMessage {
    /// Human-readable text.
    pub msg: String,
    /// Severity.
    #[serde(default)]
    pub level: InfoLevel,
    /// Command this notice answers, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    /// Outcome of that command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
}

impl InfoMessage {
    /// A plain informational notice.
    pub fn info(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            level: InfoLevel::Info,
            cmd: None,
            ok: None,
        }
    }

    /// A warning notice.
    pub fn warn(msg: impl Into<String>) -> Self {
        Self {
            level: InfoLevel::Warn,
            ..Self::info(msg)
        }
    }

    /// An error notice.
    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            level: InfoLevel::Error,
            ..Self::info(msg)
        }
    }

    /// Result of a command: `ok` is reported at `info`, failure at `error`.
    pub fn command_result(cmd: &str, ok: bool, msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            level: if ok { InfoLevel::Info } else { InfoLevel::Error },
            cmd: Some(cmd.to_owned()),
            ok: Some(ok),
        }
    }
}

/// A line from upstream that was not valid structured text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    /// The line as received.
    pub raw: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::structs::Grid;

    #[test]
    fn snapshot_flattens_world_collections() {
        let snapshot = Snapshot {
            t: 400,
            tick: 2,
            world: WorldModel {
                grid: Grid { rows: 8, cols: 8 },
                ..WorldModel::default()
            },
            metrics: Metrics::default(),
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["t"], 400);
        assert_eq!(json["grid"]["rows"], 8);
        assert!(json["orders"].is_array());
        assert!(json.get("world").is_none());
    }

    #[test]
    fn board_snapshot_without_metrics_decodes() {
        let line = r#"{"t":5,"grid":{"rows":8,"cols":8},"restaurants":[],"houses":[],"drivers":[],"orders":[]}"#;
        let snapshot: Snapshot = serde_json::from_str(line).unwrap();
        assert_eq!(snapshot.t, 5);
        assert_eq!(snapshot.tick, 0);
        assert_eq!(snapshot.metrics, Metrics::default());
    }

    #[test]
    fn event_omits_absent_fields() {
        let event = DeliveryEvent::for_order(EventKind::OrderReady, OrderId(7), 1200);
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"ev":"ORDER_READY","order":7,"t":1200}"#);
    }

    #[test]
    fn command_result_levels() {
        let ok = InfoMessage::command_result("PAUSE", true, "paused");
        let failed = InfoMessage::command_result("PAUSE", false, "no upstream");
        assert_eq!(ok.level, InfoLevel::Info);
        assert_eq!(failed.level, InfoLevel::Error);
        assert_eq!(failed.ok, Some(false));
    }
}
