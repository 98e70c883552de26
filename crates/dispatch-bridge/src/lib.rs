//! Broadcast router between one dispatch authority and many observers.
//!
//! This crate provides:
//!
//! - **Hub** ([`hub`]): encodes each authority message once and fans it
//!   out to every observer through a [`tokio::sync::broadcast`] channel,
//!   keeping a mirror for late joiners
//! - **Upstream slot** ([`upstream`]): the single active authority, either
//!   the in-process simulator or a remote line-protocol peer over TCP
//! - **Observer transports**: `WebSocket` ([`ws`]) and raw TCP lines
//!   ([`tcp`]), one task per connection
//! - **Control surface** ([`handlers`]): state, history, status, command
//!   forwarding, source listing and switching
//!
//! # Isolation
//!
//! A failing observer only ends its own task. Commands reach the authority
//! through its single-consumer queue; when no authority is reachable the
//! sender gets an error reply instead of a silent drop.

pub mod error;
pub mod handlers;
pub mod hub;
pub mod router;
pub mod server;
pub mod session;
pub mod startup;
pub mod state;
pub mod tcp;
pub mod upstream;
pub mod ws;

pub use error::{BridgeError, RouteError};
pub use hub::{Frame, GREETING, Hub};
pub use router::build_router;
pub use server::{ServerError, ServerHandles};
pub use startup::{Bridge, StartupError, start_bridge};
pub use state::{AppState, SessionSettings};
pub use upstream::{CommandDelivery, SIMULATOR_SOURCE, SourceInfo, UpstreamSlot};
