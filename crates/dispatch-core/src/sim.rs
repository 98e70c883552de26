//! The Dispatch Simulator: the reference authority.
//!
//! Each tick runs these steps in order:
//!
//! 1. **Movement** -- every driver with a target moves one cell (avenue gap
//!    first, then street gap) and arrivals deliver or pick up.
//! 2. **Assignment** -- READY orders start searching and idle drivers are
//!    given pickups (see [`crate::fleet`]).
//! 3. **Ingestion** -- with `auto_order_probability`, a random order is
//!    placed at a random house and restaurant.
//! 4. **Preparation** -- PREPARING orders count down by the tick's simulated
//!    milliseconds and become READY at exactly zero; CREATED orders whose
//!    hand-off delay has passed enter PREPARING.
//! 5. **Snapshot** -- derived fields and metrics are refreshed and the
//!    world is projected into a [`Snapshot`].
//!
//! The simulator is the single writer of its World Model. It is not shared;
//! the runner owns it and feeds it ticks and commands from one task.

use std::time::Duration;

use dispatch_types::{
    DeliveryEvent, EventKind, HistoryItem, HouseId, InvariantViolation, LifecycleError, Metrics,
    Order, OrderId, OrderState, RestaurantId, Snapshot, WorldModel,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::clock::{ClockError, SimClock};
use crate::config::{FleetConfig, IngestionConfig, KitchenConfig, SimulationConfig};
use crate::fleet::{DRIVER_POLICY, Dispatcher};
use crate::kitchen::Kitchens;
use crate::starting_world;

/// First id handed out to an order.
pub const FIRST_ORDER_ID: OrderId = OrderId(100);

/// Errors that can occur during tick execution.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// A clock operation failed.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: ClockError,
    },

    /// An order transition was refused.
    #[error("lifecycle error: {source}")]
    Lifecycle {
        /// The underlying lifecycle error.
        #[from]
        source: LifecycleError,
    },

    /// The World Model ended the tick in an inconsistent state.
    #[error("world invariant broken: {source}")]
    Invariant {
        /// The violated invariant.
        #[from]
        source: InvariantViolation,
    },
}

/// Events and history notes produced while the world changes.
#[derive(Debug, Default)]
pub(crate) struct TickLog {
    pub(crate) events: Vec<DeliveryEvent>,
    pub(crate) notes: Vec<HistoryItem>,
}

impl TickLog {
    pub(crate) fn event(&mut self, event: DeliveryEvent) {
        self.events.push(event);
    }

    pub(crate) fn note(&mut self, ts: u64, msg: impl Into<String>) {
        self.notes.push(HistoryItem::new(ts, msg));
    }
}

/// `true` with probability `p`. Values outside `(0, 1)` saturate; NaN is never.
pub(crate) fn chance<R: Rng>(rng: &mut R, p: f64) -> bool {
    if p >= 1.0 {
        true
    } else if p > 0.0 {
        rng.random_bool(p)
    } else {
        false
    }
}

/// Everything one tick produced.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    /// Tick number that just ran.
    pub tick: u64,
    /// Simulated time at the end of the tick, in milliseconds.
    pub t: u64,
    /// State-delta events in the order they happened.
    pub events: Vec<DeliveryEvent>,
    /// Human-readable notes, including those from commands since last tick.
    pub notes: Vec<HistoryItem>,
    /// Authoritative state after the tick.
    pub snapshot: Snapshot,
}

/// The reference authority.
#[derive(Debug)]
pub struct Simulator {
    world: WorldModel,
    clock: SimClock,
    pub(crate) kitchens: Kitchens,
    dispatcher: Dispatcher,
    pub(crate) rng: StdRng,
    pub(crate) kitchen: KitchenConfig,
    fleet: FleetConfig,
    ingestion: IngestionConfig,
    next_order_id: OrderId,
    paused: bool,
    pending_notes: Vec<HistoryItem>,
}

impl Simulator {
    /// A simulator on the default map, seeded from `config.world.seed`.
    pub fn new(config: &SimulationConfig) -> Result<Self, ClockError> {
        let mut rng = StdRng::seed_from_u64(config.world.seed);
        let world = starting_world::default_world(config, &mut rng);
        Self::with_world(config, world, rng)
    }

    /// A simulator over an explicit world. Orders already present keep
    /// their state; new ids continue after the highest existing one.
    pub fn with_world(
        config: &SimulationConfig,
        world: WorldModel,
        rng: StdRng,
    ) -> Result<Self, ClockError> {
        let clock = SimClock::new(config.world.tick_interval_ms, config.world.speed)?;
        let mut kitchens = Kitchens::new(&world.restaurants);
        for order in &world.orders {
            if order.state < OrderState::EnRoute {
                kitchens.enqueue(&order.rest, order.id, order.t_prep_s);
            }
        }
        let next_order_id = world
            .orders
            .iter()
            .map(|o| o.id)
            .max()
            .and_then(OrderId::successor)
            .map_or(FIRST_ORDER_ID, |next| next.max(FIRST_ORDER_ID));

        let mut sim = Self {
            world,
            clock,
            kitchens,
            dispatcher: Dispatcher::default(),
            rng,
            kitchen: config.kitchen.clone(),
            fleet: config.fleet.clone(),
            ingestion: config.ingestion.clone(),
            next_order_id,
            paused: false,
            pending_notes: Vec::new(),
        };
        sim.refresh_derived();
        Ok(sim)
    }

    /// Advance the world by one tick. Returns `None` while paused.
    pub fn tick(&mut self) -> Result<Option<TickOutcome>, TickError> {
        if self.paused {
            return Ok(None);
        }
        let dt_ms = self.clock.advance()?;
        let now = self.clock.now_ms();
        let mut log = TickLog {
            events: Vec::new(),
            notes: std::mem::take(&mut self.pending_notes),
        };

        self.dispatcher.move_drivers(
            &mut self.world,
            &mut self.kitchens,
            self.fleet.driver_capacity,
            now,
            &mut log,
        );
        self.dispatcher.assign_idle(
            &mut self.world,
            &self.kitchens,
            &self.fleet,
            &mut self.rng,
            now,
            &mut log,
        );
        self.ingest(now, &mut log);
        self.prepare(dt_ms, now, &mut log)?;
        self.refresh_derived();
        self.world.check_invariants()?;

        debug!(
            tick = self.clock.tick(),
            t = now,
            events = log.events.len(),
            "Tick complete"
        );

        Ok(Some(TickOutcome {
            tick: self.clock.tick(),
            t: now,
            events: log.events,
            notes: log.notes,
            snapshot: self.snapshot(),
        }))
    }

    fn ingest(&mut self, now: u64, log: &mut TickLog) {
        if !chance(&mut self.rng, self.ingestion.auto_order_probability) {
            return;
        }
        if self.world.houses.is_empty() || self.world.restaurants.is_empty() {
            return;
        }
        let house_idx = self.rng.random_range(0..self.world.houses.len());
        let rest_idx = self.rng.random_range(0..self.world.restaurants.len());
        let (Some(house), Some(rest)) = (
            self.world.houses.get(house_idx).map(|h| h.id.clone()),
            self.world.restaurants.get(rest_idx).map(|r| r.id.clone()),
        ) else {
            return;
        };
        let prep_s = self.random_prep_s();
        if let Some(id) = self.accept_order(house.clone(), rest.clone(), prep_s, now) {
            log.note(now, format!("Auto order {id} created at {house} -> {rest}"));
        }
    }

    fn prepare(&mut self, dt_ms: u64, now: u64, log: &mut TickLog) -> Result<(), TickError> {
        for order in &mut self.world.orders {
            if order.state != OrderState::Preparing {
                continue;
            }
            order.t_left_ms = order.t_left_ms.saturating_sub(dt_ms);
            if order.t_left_ms == 0 {
                order.advance(OrderState::Ready)?;
                order.ready_ms = Some(now);
                log.event(DeliveryEvent::for_order(EventKind::OrderReady, order.id, now));
                log.note(now, format!("Order {} READY", order.id));
            }
        }

        let handoff = self.kitchen.handoff_delay_ms;
        for order in &mut self.world.orders {
            if order.state == OrderState::Created && now >= order.created_ms.saturating_add(handoff)
            {
                order.advance(OrderState::Preparing)?;
                log.event(DeliveryEvent::for_order(
                    EventKind::OrderPreparing,
                    order.id,
                    now,
                ));
            }
        }
        Ok(())
    }

    /// Random preparation time within the configured bounds.
    pub(crate) fn random_prep_s(&mut self) -> u32 {
        let lo = self.kitchen.prep_min_s.max(1);
        let hi = self.kitchen.prep_max_s.max(lo);
        self.rng.random_range(lo..=hi)
    }

    /// Insert a CREATED order and queue it. References must already be
    /// valid. Returns `None` once order ids are exhausted.
    pub(crate) fn accept_order(
        &mut self,
        house: HouseId,
        rest: RestaurantId,
        prep_s: u32,
        now: u64,
    ) -> Option<OrderId> {
        let id = self.next_order_id;
        self.next_order_id = id.successor()?;
        self.kitchens.enqueue(&rest, id, prep_s);
        self.world
            .orders
            .push(Order::new(id, house, rest, prep_s, now));
        info!(order = %id, prep_s, "Order accepted");
        Some(id)
    }

    /// Queue a note for the next tick's history batch.
    pub(crate) fn note(&mut self, msg: impl Into<String>) {
        let now = self.clock.now_ms();
        self.pending_notes.push(HistoryItem::new(now, msg));
    }

    /// Recompute queue lengths, restaurant algorithms and driver ETAs.
    pub(crate) fn refresh_derived(&mut self) {
        for restaurant in &mut self.world.restaurants {
            restaurant.queue = self.kitchens.queue_len(&restaurant.id);
            if let Some(algo) = self.kitchens.algorithm(&restaurant.id) {
                restaurant.algo = algo;
            }
        }
        let dt_ms = self.clock.dt_ms().unwrap_or(u64::MAX);
        for driver in &mut self.world.drivers {
            let cells = driver
                .target
                .map_or(0, |target| driver.pos.manhattan(target));
            let eta_ms = u64::from(cells).saturating_mul(dt_ms);
            driver.eta_s = u32::try_from(eta_ms.div_ceil(1000)).unwrap_or(u32::MAX);
        }
        self.dispatcher.prune(&self.world);
    }

    /// Aggregates derived from the current world.
    pub fn metrics(&self) -> Metrics {
        let mut waits = Vec::new();
        let mut deliveries = Vec::new();
        for order in &self.world.orders {
            if let (Some(ready), Some(picked)) = (order.ready_ms, order.picked_ms) {
                waits.push(picked.saturating_sub(ready));
            }
            if let Some(delivered) = order.delivered_ms {
                deliveries.push(delivered.saturating_sub(order.created_ms));
            }
        }
        Metrics {
            avg_wait_s: mean_seconds(&waits),
            avg_delivery_s: mean_seconds(&deliveries),
            kitchen_algo: self
                .world
                .restaurants
                .first()
                .map(|r| r.algo)
                .unwrap_or(self.kitchen.algorithm),
            driver_policy: DRIVER_POLICY.to_owned(),
            queues: self
                .world
                .restaurants
                .iter()
                .map(|r| (r.id.clone(), r.queue))
                .collect(),
            orders_total: u64::try_from(self.world.orders.len()).unwrap_or(u64::MAX),
            orders_delivered: u64::try_from(deliveries.len()).unwrap_or(u64::MAX),
            paused: self.paused,
            speed: self.clock.speed(),
        }
    }

    /// Full projection of the current world.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            t: self.clock.now_ms(),
            tick: self.clock.tick(),
            world: self.world.clone(),
            metrics: self.metrics(),
        }
    }

    /// Read-only view of the World Model.
    pub const fn world(&self) -> &WorldModel {
        &self.world
    }

    pub(crate) const fn world_mut(&mut self) -> &mut WorldModel {
        &mut self.world
    }

    /// The simulation clock.
    pub const fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub(crate) const fn clock_mut(&mut self) -> &mut SimClock {
        &mut self.clock
    }

    /// Whether ticks are currently skipped.
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    pub(crate) const fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Id the next accepted order will get.
    pub const fn next_order_id(&self) -> OrderId {
        self.next_order_id
    }

    /// Order `driver` is travelling to collect, if any.
    pub fn reservation(&self, driver: &dispatch_types::DriverId) -> Option<OrderId> {
        self.dispatcher.reservation(driver)
    }
}

fn mean_seconds(samples_ms: &[u64]) -> f64 {
    let Ok(count) = u32::try_from(samples_ms.len()) else {
        return 0.0;
    };
    if count == 0 {
        return 0.0;
    }
    let total = samples_ms.iter().fold(0u64, |acc, ms| acc.saturating_add(*ms));
    Duration::from_millis(total).as_secs_f64() / f64::from(count)
}
