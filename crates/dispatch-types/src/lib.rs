//! Shared type definitions for the delivery-dispatch world.
//!
//! Everything the authority, the bridge and observers exchange is defined
//! here. World-model types flow downstream to `TypeScript` via `ts-rs` for
//! the display client.
//!
//! # Modules
//!
//! - [`ids`] -- Identifier newtypes for restaurants, houses, drivers, orders
//! - [`enums`] -- Order states, kitchen algorithms, event names
//! - [`structs`] -- Grid geometry and entity structs
//! - [`world`] -- The World Model and its invariants
//! - [`lifecycle`] -- Order life-cycle state machine
//! - [`commands`] -- Operator commands
//! - [`wire`] -- Snapshot, event, history and diagnostic payloads

pub mod commands;
pub mod enums;
pub mod ids;
pub mod lifecycle;
pub mod structs;
pub mod wire;
pub mod world;

pub use commands::{Command, DEFAULT_STRESS_COUNT, HouseRef};
pub use enums::{EventKind, InfoLevel, KitchenAlgorithm, OrderState};
pub use ids::{DriverId, HouseId, OrderId, RestaurantId};
pub use lifecycle::{LifecycleError, ORDER_STATES};
pub use structs::{Driver, Grid, House, Order, Position, Restaurant};
pub use wire::{DeliveryEvent, HistoryItem, InfoMessage, Metrics, RawMessage, Snapshot};
pub use world::{InvariantViolation, WorldModel};
