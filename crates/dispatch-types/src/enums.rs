//! Enumeration types shared by the authority and its observers.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Order states
// ---------------------------------------------------------------------------

/// Life-cycle state of a single order.
///
/// States are listed in the only order an order may visit them. The
/// transition rules live in [`crate::lifecycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum OrderState {
    /// Accepted by the authority, waiting for the kitchen hand-off.
    #[serde(alias = "CREADO")]
    Created,
    /// In the kitchen; `t_left_ms` is counting down.
    Preparing,
    /// Cooked and waiting for the authority to look for a driver.
    Ready,
    /// The authority is looking for a free driver.
    SearchingDriver,
    /// Picked up by its assigned driver and travelling to the house.
    #[serde(alias = "EN_REPARTO", alias = "ON_ROUTE")]
    EnRoute,
    /// Handed over at the house. Terminal.
    Delivered,
}

impl OrderState {
    /// Wire label of the state, as it appears in snapshots.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Preparing => "PREPARING",
            Self::Ready => "READY",
            Self::SearchingDriver => "SEARCHING_DRIVER",
            Self::EnRoute => "EN_ROUTE",
            Self::Delivered => "DELIVERED",
        }
    }
}

impl core::fmt::Display for OrderState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Kitchen sequencing
// ---------------------------------------------------------------------------

/// Order-sequencing policy of a restaurant queue.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[ts(export, export_to = "bindings/")]
pub enum KitchenAlgorithm {
    /// Shortest job first: shorter preparation times queue ahead.
    #[default]
    #[serde(rename = "SJF")]
    ShortestJobFirst,
    /// First come, first served: queue in arrival order.
    #[serde(rename = "FCFS", alias = "FIFO")]
    FirstComeFirstServed,
}

impl KitchenAlgorithm {
    /// Short wire label (`SJF` / `FCFS`).
    pub const fn label(self) -> &'static str {
        match self {
            Self::ShortestJobFirst => "SJF",
            Self::FirstComeFirstServed => "FCFS",
        }
    }
}

impl core::fmt::Display for KitchenAlgorithm {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Name of an incremental state-delta event.
///
/// Unknown names deserialize to [`EventKind::Unrecognized`] so a newer
/// authority never breaks an older observer; the observer drops them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// The kitchen accepted the order (`CREATED -> PREPARING`).
    OrderPreparing,
    /// Preparation finished (`PREPARING -> READY`).
    OrderReady,
    /// The authority started looking for a driver (`READY -> SEARCHING_DRIVER`).
    SearchingDriver,
    /// A driver was assigned and picked the order up (`-> EN_ROUTE`).
    DriverAssigned,
    /// The order reached its house (`EN_ROUTE -> DELIVERED`).
    Delivered,
    /// The physical board's button was pressed. Diagnostic only.
    ButtonPressed,
    /// Any event name this build does not know.
    #[serde(other)]
    Unrecognized,
}

impl EventKind {
    /// The order state this event moves its order into, if any.
    pub const fn target_state(self) -> Option<OrderState> {
        match self {
            Self::OrderPreparing => Some(OrderState::Preparing),
            Self::OrderReady => Some(OrderState::Ready),
            Self::SearchingDriver => Some(OrderState::SearchingDriver),
            Self::DriverAssigned => Some(OrderState::EnRoute),
            Self::Delivered => Some(OrderState::Delivered),
            Self::ButtonPressed | Self::Unrecognized => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Severity of an `info` message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InfoLevel {
    /// Informational notice.
    #[default]
    Info,
    /// Something was ignored or degraded.
    Warn,
    /// A request failed.
    Error,
}
