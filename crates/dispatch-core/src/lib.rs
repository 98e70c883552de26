//! Dispatch Simulator and authority loop for the delivery-dispatch world.
//!
//! This crate owns the authoritative World Model when no physical board is
//! attached: it advances the world tick by tick, applies operator commands,
//! and hands every snapshot, event and note to a callback.
//!
//! # Modules
//!
//! - [`clock`] -- Simulated time with a runtime speed multiplier.
//! - [`config`] -- Configuration loading from `dispatch-config.yaml`.
//! - [`kitchen`] -- Per-restaurant order queues (SJF / FCFS).
//! - [`fleet`] -- Driver movement and the "RR+nearest" assignment policy.
//! - [`starting_world`] -- The default map.
//! - [`sim`] -- The [`Simulator`] and its tick.
//! - [`command`] -- Command validation and application.
//! - [`operator`] -- Shared control state for the HTTP surface.
//! - [`runner`] -- The async single-writer authority loop.
//!
//! [`Simulator`]: sim::Simulator

pub mod clock;
pub mod command;
pub mod config;
pub mod fleet;
pub mod kitchen;
pub mod operator;
pub mod runner;
pub mod sim;
pub mod starting_world;

pub use command::{CommandOutcome, CommandRejected};
pub use config::SimulationConfig;
pub use operator::{AuthorityEndReason, AuthorityStatus, OperatorState};
pub use runner::{
    AuthorityCallback, AuthorityHandle, CommandReply, CommandRequest, NoOpCallback, RunSummary,
    RunnerSettings, SubmitError, run_authority, spawn_authority,
};
pub use sim::{Simulator, TickError, TickOutcome};
