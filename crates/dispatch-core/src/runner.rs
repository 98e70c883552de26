//! The authority loop.
//!
//! [`run_authority`] owns the [`Simulator`] and is its only writer. Ticks
//! come from a wall-clock interval; commands arrive on an mpsc channel from
//! any number of connection tasks and are applied between ticks, one at a
//! time, in arrival order. `STRESS` expands into `CREATE_ORDER` commands
//! that a helper task feeds back into the loop `stagger_ms` apart.
//!
//! A failed tick never ends the loop. The error is reported through the
//! callback and the simulator is paused until an operator resumes it.

use std::sync::Arc;
use std::time::Duration;

use dispatch_types::{Command, Snapshot};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::command::{CommandOutcome, CommandRejected};
use crate::operator::{AuthorityEndReason, OperatorState};
use crate::sim::{Simulator, TickError, TickOutcome};

/// Commands buffered before senders wait.
pub const COMMAND_QUEUE_CAPACITY: usize = 256;

/// Result of applying one command.
pub type CommandReply = Result<CommandOutcome, CommandRejected>;

/// A command on its way into the authority.
#[derive(Debug)]
pub struct CommandRequest {
    /// The command.
    pub command: Command,
    /// Who sent it, for logs and history.
    pub origin: String,
    /// Where to send the result. `None` for fire-and-forget.
    pub reply: Option<oneshot::Sender<CommandReply>>,
}

/// Why a command could not reach the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The authority loop has ended.
    #[error("authority is not running")]
    Closed,
}

/// Summary returned when the loop ends.
#[derive(Debug)]
pub struct RunSummary {
    /// Why the loop ended.
    pub end_reason: AuthorityEndReason,
    /// Ticks executed (paused ticks excluded).
    pub total_ticks: u64,
    /// Ticks that failed and paused the simulator.
    pub failed_ticks: u64,
    /// Commands applied successfully.
    pub commands_applied: u64,
    /// Commands rejected.
    pub commands_rejected: u64,
}

/// Receives everything the authority produces.
pub trait AuthorityCallback: Send {
    /// Called after every executed tick.
    fn on_tick(&mut self, outcome: &TickOutcome);

    /// Called after every command, with the state right after it.
    fn on_command(&mut self, origin: &str, command: &Command, reply: &CommandReply, snapshot: &Snapshot);

    /// Called when a tick fails. `t` is the simulated time the tick started from.
    fn on_tick_failed(&mut self, error: &TickError, t: u64);
}

/// A callback that ignores everything.
pub struct NoOpCallback;

impl AuthorityCallback for NoOpCallback {
    fn on_tick(&mut self, _outcome: &TickOutcome) {}

    fn on_command(&mut self, _origin: &str, _command: &Command, _reply: &CommandReply, _snapshot: &Snapshot) {}

    fn on_tick_failed(&mut self, _error: &TickError, _t: u64) {}
}

/// Timing parameters of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerSettings {
    /// Wall-clock milliseconds between ticks.
    pub tick_interval_ms: u64,
    /// Wall-clock milliseconds between staggered `STRESS` submissions.
    pub stagger_ms: u64,
}

/// Run the authority until a stop is requested, the tick limit is hit, or
/// every command sender is dropped.
pub async fn run_authority(
    mut sim: Simulator,
    settings: RunnerSettings,
    operator: Arc<OperatorState>,
    mut commands: mpsc::Receiver<CommandRequest>,
    callback: &mut dyn AuthorityCallback,
) -> RunSummary {
    let (staged_tx, mut staged_rx) = mpsc::unbounded_channel::<Command>();
    let mut ticker = tokio::time::interval(Duration::from_millis(settings.tick_interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut summary = RunSummary {
        end_reason: AuthorityEndReason::OperatorStop,
        total_ticks: 0,
        failed_ticks: 0,
        commands_applied: 0,
        commands_rejected: 0,
    };

    info!(
        tick_interval_ms = settings.tick_interval_ms,
        speed = sim.clock().speed(),
        "Authority starting"
    );

    let end_reason = loop {
        if operator.is_stop_requested() {
            break AuthorityEndReason::OperatorStop;
        }

        tokio::select! {
            biased;

            () = operator.stopped() => break AuthorityEndReason::OperatorStop,

            request = commands.recv() => {
                let Some(request) = request else {
                    break AuthorityEndReason::ChannelClosed;
                };
                let reply = apply(&mut sim, &request.origin, &request.command, &operator, &staged_tx, settings, callback, &mut summary);
                if let Some(tx) = request.reply {
                    // The requester may have given up waiting.
                    let _ = tx.send(reply);
                }
            }

            Some(command) = staged_rx.recv() => {
                let _ = apply(&mut sim, "stress", &command, &operator, &staged_tx, settings, callback, &mut summary);
            }

            _ = ticker.tick() => {
                let outcome = match sim.tick() {
                    Ok(Some(outcome)) => outcome,
                    Ok(None) => continue,
                    Err(err) => {
                        summary.failed_ticks = summary.failed_ticks.saturating_add(1);
                        error!(tick = sim.clock().tick(), error = %err, "Tick failed, pausing authority");
                        sim.set_paused(true);
                        operator.set_paused(true);
                        callback.on_tick_failed(&err, sim.clock().now_ms());
                        continue;
                    }
                };
                summary.total_ticks = summary.total_ticks.saturating_add(1);
                operator.record_tick(outcome.tick, outcome.t);
                callback.on_tick(&outcome);
                if operator.tick_limit_reached(outcome.tick) {
                    info!(tick = outcome.tick, "Tick limit reached");
                    break AuthorityEndReason::MaxTicksReached;
                }
            }
        }
    };

    summary.end_reason = end_reason;
    operator.set_end_reason(end_reason).await;
    info!(
        reason = ?end_reason,
        total_ticks = summary.total_ticks,
        failed_ticks = summary.failed_ticks,
        commands_applied = summary.commands_applied,
        commands_rejected = summary.commands_rejected,
        "Authority stopped"
    );
    summary
}

#[allow(clippy::too_many_arguments)]
fn apply(
    sim: &mut Simulator,
    origin: &str,
    command: &Command,
    operator: &OperatorState,
    staged: &mpsc::UnboundedSender<Command>,
    settings: RunnerSettings,
    callback: &mut dyn AuthorityCallback,
    summary: &mut RunSummary,
) -> CommandReply {
    let reply = sim.apply_command(command);
    match &reply {
        Ok(outcome) => {
            summary.commands_applied = summary.commands_applied.saturating_add(1);
            if let CommandOutcome::StressPlanned { commands } = outcome {
                spawn_stagger(commands.clone(), settings.stagger_ms, staged.clone());
            }
        }
        Err(rejected) => {
            summary.commands_rejected = summary.commands_rejected.saturating_add(1);
            info!(origin, cmd = command.name(), reason = %rejected, "Command rejected");
        }
    }
    operator.set_paused(sim.is_paused());
    operator.set_speed(sim.clock().speed());
    callback.on_command(origin, command, &reply, &sim.snapshot());
    reply
}

fn spawn_stagger(commands: Vec<Command>, stagger_ms: u64, tx: mpsc::UnboundedSender<Command>) {
    let count = commands.len();
    tokio::spawn(async move {
        for (i, command) in commands.into_iter().enumerate() {
            if i > 0 && stagger_ms > 0 {
                tokio::time::sleep(Duration::from_millis(stagger_ms)).await;
            }
            if tx.send(command).is_err() {
                warn!(submitted = i, total = count, "Authority gone, stress run cut short");
                return;
            }
        }
        debug!(total = count, "Stress submissions complete");
    });
}

/// Handle to a spawned authority.
#[derive(Debug)]
pub struct AuthorityHandle {
    commands: mpsc::Sender<CommandRequest>,
    operator: Arc<OperatorState>,
    join: JoinHandle<RunSummary>,
}

impl AuthorityHandle {
    /// Submit a command and wait for its result.
    pub async fn submit(&self, command: Command, origin: &str) -> Result<CommandReply, SubmitError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(CommandRequest {
                command,
                origin: origin.to_owned(),
                reply: Some(tx),
            })
            .await
            .map_err(|_closed| SubmitError::Closed)?;
        rx.await.map_err(|_dropped| SubmitError::Closed)
    }

    /// A clone of the command sender, for fire-and-forget submission.
    pub fn sender(&self) -> mpsc::Sender<CommandRequest> {
        self.commands.clone()
    }

    /// Shared control state.
    pub const fn operator(&self) -> &Arc<OperatorState> {
        &self.operator
    }

    /// Whether the loop has ended.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop the loop and wait for it to finish.
    pub async fn shutdown(self) -> Option<RunSummary> {
        self.operator.request_stop();
        drop(self.commands);
        match self.join.await {
            Ok(summary) => Some(summary),
            Err(err) => {
                warn!(error = %err, "Authority task failed");
                None
            }
        }
    }
}

/// Spawn the authority loop on the current runtime.
pub fn spawn_authority<C>(sim: Simulator, settings: RunnerSettings, max_ticks: u64, mut callback: C) -> AuthorityHandle
where
    C: AuthorityCallback + 'static,
{
    let operator = Arc::new(OperatorState::new(
        settings.tick_interval_ms,
        sim.clock().speed(),
        max_ticks,
    ));
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let loop_operator = Arc::clone(&operator);
    let join = tokio::spawn(async move {
        run_authority(sim, settings, loop_operator, rx, &mut callback).await
    });
    AuthorityHandle {
        commands: tx,
        operator,
        join,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use dispatch_types::{HouseRef, OrderId, Position, RestaurantId};

    use super::*;
    use crate::config::SimulationConfig;

    fn quiet_sim() -> Simulator {
        let mut config = SimulationConfig::default();
        config.ingestion.auto_order_probability = 0.0;
        Simulator::new(&config).unwrap()
    }

    const SETTINGS: RunnerSettings = RunnerSettings {
        tick_interval_ms: 200,
        stagger_ms: 80,
    };

    #[derive(Default)]
    struct Recorder {
        ticks: Arc<Mutex<Vec<Snapshot>>>,
        commands: Arc<Mutex<Vec<(String, bool)>>>,
        failures: Arc<Mutex<Vec<String>>>,
    }

    impl AuthorityCallback for Recorder {
        fn on_tick(&mut self, outcome: &TickOutcome) {
            self.ticks.lock().unwrap().push(outcome.snapshot.clone());
        }

        fn on_command(&mut self, origin: &str, _command: &Command, reply: &CommandReply, _snapshot: &Snapshot) {
            self.commands
                .lock()
                .unwrap()
                .push((origin.to_owned(), reply.is_ok()));
        }

        fn on_tick_failed(&mut self, error: &TickError, _t: u64) {
            self.failures.lock().unwrap().push(error.to_string());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_by_max_ticks() {
        let handle = spawn_authority(quiet_sim(), SETTINGS, 5, NoOpCallback);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(handle.is_finished());
        let summary = handle.shutdown().await.unwrap();
        assert_eq!(summary.end_reason, AuthorityEndReason::MaxTicksReached);
        assert_eq!(summary.total_ticks, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn commands_are_applied_and_answered() {
        let recorder = Recorder::default();
        let commands = Arc::clone(&recorder.commands);
        let handle = spawn_authority(quiet_sim(), SETTINGS, 0, recorder);

        let reply = handle
            .submit(
                Command::CreateOrder {
                    house: HouseRef::Coords(Position::new(3, 3)),
                    restaurant: Some(RestaurantId::new("R1")),
                    prep_s: None,
                },
                "test",
            )
            .await
            .unwrap();
        assert!(matches!(
            reply,
            Ok(CommandOutcome::OrderCreated { order: OrderId(100), .. })
        ));

        let rejected = handle
            .submit(
                Command::SetAlgorithm {
                    restaurant: Some(RestaurantId::new("R77")),
                    algo: dispatch_types::KitchenAlgorithm::FirstComeFirstServed,
                },
                "test",
            )
            .await
            .unwrap();
        assert!(rejected.is_err());

        let summary = handle.shutdown().await.unwrap();
        assert_eq!(summary.commands_applied, 1);
        assert_eq!(summary.commands_rejected, 1);
        assert_eq!(commands.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_stops_snapshots() {
        let recorder = Recorder::default();
        let ticks = Arc::clone(&recorder.ticks);
        let handle = spawn_authority(quiet_sim(), SETTINGS, 0, recorder);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        handle.submit(Command::Pause, "test").await.unwrap().unwrap();
        assert!(handle.operator().is_paused());
        let frozen = ticks.lock().unwrap().len();

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(ticks.lock().unwrap().len(), frozen);

        handle.submit(Command::Resume, "test").await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(ticks.lock().unwrap().len() > frozen);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stress_creates_exactly_n_unique_orders() {
        let recorder = Recorder::default();
        let ticks = Arc::clone(&recorder.ticks);
        let handle = spawn_authority(quiet_sim(), SETTINGS, 0, recorder);

        tokio::time::sleep(Duration::from_millis(400)).await;
        let before = ticks
            .lock()
            .unwrap()
            .last()
            .map_or(0, |s| s.world.orders.len());
        handle.submit(Command::Stress { n: 30 }, "test").await.unwrap().unwrap();

        // 29 gaps of 80 ms, plus a tick to publish the result.
        tokio::time::sleep(Duration::from_millis(29 * 80 + 400)).await;
        let last = ticks.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.world.orders.len(), before + 30);
        let mut ids: Vec<_> = last.world.orders.iter().map(|o| o.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), before + 30);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failing_tick_pauses_instead_of_ending() {
        let mut config = SimulationConfig::default();
        config.ingestion.auto_order_probability = 0.0;
        config.world.tick_interval_ms = u64::MAX / 2;
        config.world.speed = 3;
        let sim = Simulator::new(&config).unwrap();

        let recorder = Recorder::default();
        let failures = Arc::clone(&recorder.failures);
        let ticks = Arc::clone(&recorder.ticks);
        let handle = spawn_authority(sim, SETTINGS, 0, recorder);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(!handle.is_finished());
        assert!(handle.operator().is_paused());
        assert_eq!(failures.lock().unwrap().len(), 1);
        assert!(ticks.lock().unwrap().is_empty());

        // Still answering commands.
        let reply = handle
            .submit(
                Command::SetAlgorithm {
                    restaurant: Some(RestaurantId::new("R1")),
                    algo: dispatch_types::KitchenAlgorithm::FirstComeFirstServed,
                },
                "test",
            )
            .await
            .unwrap();
        assert!(reply.is_ok());

        // Resuming retries, fails again, and pauses again.
        handle.submit(Command::Resume, "test").await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(handle.operator().is_paused());
        assert_eq!(failures.lock().unwrap().len(), 2);

        let summary = handle.shutdown().await.unwrap();
        assert_eq!(summary.failed_ticks, 2);
        assert_eq!(summary.end_reason, AuthorityEndReason::OperatorStop);
    }

    #[tokio::test]
    async fn operator_stop_before_first_tick() {
        let operator = Arc::new(OperatorState::new(200, 1, 0));
        operator.request_stop();
        let (_tx, rx) = mpsc::channel(1);
        let summary = run_authority(quiet_sim(), SETTINGS, operator, rx, &mut NoOpCallback).await;
        assert_eq!(summary.end_reason, AuthorityEndReason::OperatorStop);
        assert_eq!(summary.total_ticks, 0);
    }

    #[tokio::test]
    async fn dropped_senders_close_the_loop() {
        let operator = Arc::new(OperatorState::new(60_000, 1, 0));
        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        let summary = run_authority(quiet_sim(), SETTINGS, operator, rx, &mut NoOpCallback).await;
        assert_eq!(summary.end_reason, AuthorityEndReason::ChannelClosed);
    }
}
