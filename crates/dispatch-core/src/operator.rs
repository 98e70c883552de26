//! Operator-visible control state of the authority.
//!
//! The authority task is the only writer of the simulation itself; this
//! struct mirrors the few values the HTTP surface reports (paused, speed,
//! last tick) and carries the stop flag the other way. Atomics keep the
//! tick loop free of locks.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};

/// Reason the authority loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityEndReason {
    /// Reached the configured `max_ticks` limit.
    MaxTicksReached,
    /// A stop was requested.
    OperatorStop,
    /// Every command sender was dropped.
    ChannelClosed,
}

/// Shared control state.
#[derive(Debug)]
pub struct OperatorState {
    paused: AtomicBool,
    stop_requested: AtomicBool,
    stop_notify: Notify,
    speed: AtomicU32,
    last_tick: AtomicU64,
    last_t_ms: AtomicU64,
    tick_interval_ms: u64,
    max_ticks: u64,
    started_at: DateTime<Utc>,
    end_reason: Mutex<Option<AuthorityEndReason>>,
}

impl OperatorState {
    /// Fresh state for a loop ticking every `tick_interval_ms`.
    pub fn new(tick_interval_ms: u64, speed: u32, max_ticks: u64) -> Self {
        Self {
            paused: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            stop_notify: Notify::new(),
            speed: AtomicU32::new(speed),
            last_tick: AtomicU64::new(0),
            last_t_ms: AtomicU64::new(0),
            tick_interval_ms,
            max_ticks,
            started_at: Utc::now(),
            end_reason: Mutex::new(None),
        }
    }

    /// Whether ticks are currently skipped.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Record the simulator's paused flag.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    /// Current speed multiplier.
    pub fn speed(&self) -> u32 {
        self.speed.load(Ordering::Acquire)
    }

    /// Record the simulator's speed multiplier.
    pub fn set_speed(&self, speed: u32) {
        self.speed.store(speed, Ordering::Release);
    }

    /// Record a completed tick.
    pub fn record_tick(&self, tick: u64, t_ms: u64) {
        self.last_tick.store(tick, Ordering::Release);
        self.last_t_ms.store(t_ms, Ordering::Release);
    }

    /// Last completed tick.
    pub fn last_tick(&self) -> u64 {
        self.last_tick.load(Ordering::Acquire)
    }

    /// Ask the loop to stop after its current step.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.stop_notify.notify_one();
    }

    /// Whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Resolves once a stop is requested.
    pub async fn stopped(&self) {
        while !self.is_stop_requested() {
            self.stop_notify.notified().await;
        }
    }

    /// Whether `tick` has reached `max_ticks`. A limit of 0 never triggers.
    pub const fn tick_limit_reached(&self, tick: u64) -> bool {
        self.max_ticks > 0 && tick >= self.max_ticks
    }

    /// Record why the loop ended.
    pub async fn set_end_reason(&self, reason: AuthorityEndReason) {
        *self.end_reason.lock().await = Some(reason);
    }

    /// Why the loop ended, if it has.
    pub async fn end_reason(&self) -> Option<AuthorityEndReason> {
        *self.end_reason.lock().await
    }

    /// Wall-clock start time.
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Seconds since start.
    pub fn elapsed_seconds(&self) -> u64 {
        let elapsed = Utc::now()
            .signed_duration_since(self.started_at)
            .num_seconds();
        u64::try_from(elapsed.max(0)).unwrap_or(u64::MAX)
    }

    /// Point-in-time status for the control surface.
    pub async fn status(&self) -> AuthorityStatus {
        AuthorityStatus {
            tick: self.last_tick(),
            t_ms: self.last_t_ms.load(Ordering::Acquire),
            paused: self.is_paused(),
            speed: self.speed(),
            stop_requested: self.is_stop_requested(),
            tick_interval_ms: self.tick_interval_ms,
            max_ticks: self.max_ticks,
            elapsed_seconds: self.elapsed_seconds(),
            end_reason: self.end_reason().await,
            started_at: self.started_at.to_rfc3339(),
        }
    }
}

/// JSON-serializable status of the local authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityStatus {
    /// Last completed tick.
    pub tick: u64,
    /// Simulated time of that tick in milliseconds.
    pub t_ms: u64,
    /// Whether ticks are skipped.
    pub paused: bool,
    /// Speed multiplier.
    pub speed: u32,
    /// Whether a stop has been requested.
    pub stop_requested: bool,
    /// Wall-clock milliseconds between ticks.
    pub tick_interval_ms: u64,
    /// Configured tick limit (0 = unlimited).
    pub max_ticks: u64,
    /// Wall-clock seconds since start.
    pub elapsed_seconds: u64,
    /// Why the loop ended, if it has.
    pub end_reason: Option<AuthorityEndReason>,
    /// RFC 3339 start time.
    pub started_at: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn initial_state() {
        let state = OperatorState::new(200, 1, 0);
        assert!(!state.is_paused());
        assert!(!state.is_stop_requested());
        assert_eq!(state.speed(), 1);
    }

    #[test]
    fn tick_limit_zero_means_unlimited() {
        let state = OperatorState::new(200, 1, 0);
        assert!(!state.tick_limit_reached(999_999));
        let bounded = OperatorState::new(200, 1, 10);
        assert!(!bounded.tick_limit_reached(9));
        assert!(bounded.tick_limit_reached(10));
    }

    #[tokio::test]
    async fn stop_wakes_waiters() {
        let state = std::sync::Arc::new(OperatorState::new(200, 1, 0));
        let waiter = {
            let state = std::sync::Arc::clone(&state);
            tokio::spawn(async move { state.stopped().await })
        };
        state.request_stop();
        waiter.await.unwrap();
        assert!(state.is_stop_requested());
    }

    #[tokio::test]
    async fn status_reflects_recorded_values() {
        let state = OperatorState::new(200, 1, 0);
        state.set_paused(true);
        state.set_speed(3);
        state.record_tick(7, 1400);
        state.set_end_reason(AuthorityEndReason::OperatorStop).await;
        let status = state.status().await;
        assert_eq!(status.tick, 7);
        assert_eq!(status.t_ms, 1400);
        assert!(status.paused);
        assert_eq!(status.speed, 3);
        assert_eq!(status.end_reason, Some(AuthorityEndReason::OperatorStop));
    }
}
