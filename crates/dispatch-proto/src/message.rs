//! The closed message envelope.
//!
//! Every frame is one JSON object whose `type` field selects the kind.
//! Decoding goes through a [`serde_json::Value`] first so a missing or
//! unknown `type` is reported as a [`ProtocolError`] instead of a generic
//! deserializer message.

use dispatch_types::{Command, DeliveryEvent, HistoryItem, InfoMessage, RawMessage, Snapshot};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Every `type` value this protocol defines.
pub const KINDS: [&str; 6] = ["state", "event", "cmd", "history", "info", "raw"];

/// Body of a `history` message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryBatch {
    /// Entries, oldest first.
    #[serde(default)]
    pub items: Vec<HistoryItem>,
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    /// Full snapshot. Observers replace their mirror.
    State(Box<Snapshot>),
    /// Single state delta.
    Event(DeliveryEvent),
    /// Operator command, authority-bound only.
    Cmd(Command),
    /// Batch of log entries.
    History(HistoryBatch),
    /// Diagnostic notice.
    Info(InfoMessage),
    /// Upstream line that was not structured text.
    Raw(RawMessage),
}

impl Message {
    /// The wire `type` of this message.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::State(_) => "state",
            Self::Event(_) => "event",
            Self::Cmd(_) => "cmd",
            Self::History(_) => "history",
            Self::Info(_) => "info",
            Self::Raw(_) => "raw",
        }
    }

    /// A `state` message.
    pub fn state(snapshot: Snapshot) -> Self {
        Self::State(Box::new(snapshot))
    }

    /// A `history` message.
    pub const fn history(items: Vec<HistoryItem>) -> Self {
        Self::History(HistoryBatch { items })
    }

    /// A `raw` message wrapping `line`.
    pub fn raw(line: impl Into<String>) -> Self {
        Self::Raw(RawMessage { raw: line.into() })
    }

    /// Interpret a parsed frame.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let Some(kind) = value.get("type").and_then(Value::as_str) else {
            return Err(ProtocolError::MissingKind);
        };
        let Some(&kind) = KINDS.iter().find(|&&known| known == kind) else {
            return Err(ProtocolError::UnknownKind {
                kind: kind.to_owned(),
            });
        };
        serde_json::from_value(value).map_err(|err| ProtocolError::InvalidFields {
            kind,
            reason: err.to_string(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use dispatch_types::{EventKind, OrderId};
    use serde_json::json;

    use super::*;

    #[test]
    fn command_frames_carry_both_tags() {
        let msg = Message::Cmd(Command::Stress { n: 30 });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, json!({"type": "cmd", "cmd": "STRESS", "n": 30}));
        assert_eq!(Message::from_value(json).unwrap(), msg);
    }

    #[test]
    fn state_frames_are_flat() {
        let line = json!({
            "type": "state", "t": 10,
            "grid": {"rows": 8, "cols": 8},
            "restaurants": [], "houses": [], "drivers": [], "orders": []
        });
        let Message::State(snapshot) = Message::from_value(line).unwrap() else {
            panic!("expected a state message");
        };
        assert_eq!(snapshot.t, 10);
        assert_eq!(snapshot.world.grid.cols, 8);
    }

    #[test]
    fn event_frames_decode() {
        let msg = Message::from_value(json!({"type": "event", "ev": "ORDER_READY", "order": 101})).unwrap();
        let Message::Event(event) = msg else {
            panic!("expected an event");
        };
        assert_eq!(event.ev, EventKind::OrderReady);
        assert_eq!(event.order, Some(OrderId(101)));
    }

    #[test]
    fn missing_and_unknown_kinds() {
        assert_eq!(
            Message::from_value(json!({"ev": "ORDER_READY"})),
            Err(ProtocolError::MissingKind)
        );
        assert_eq!(
            Message::from_value(json!({"type": "telemetry"})),
            Err(ProtocolError::UnknownKind {
                kind: "telemetry".to_owned()
            })
        );
        assert!(matches!(
            Message::from_value(json!({"type": "cmd", "cmd": "LAUNCH"})),
            Err(ProtocolError::InvalidFields { kind: "cmd", .. })
        ));
    }

    #[test]
    fn kind_matches_wire_tag() {
        for msg in [
            Message::raw("garbage"),
            Message::history(Vec::new()),
            Message::Info(InfoMessage::info("hello")),
        ] {
            let json = serde_json::to_value(&msg).unwrap();
            assert_eq!(json["type"], msg.kind());
        }
    }
}
