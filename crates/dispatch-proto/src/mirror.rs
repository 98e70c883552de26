//! Observer-side copy of the authority's World Model.
//!
//! A `state` message replaces the mirror wholesale. An `event` message moves
//! exactly the order it names; events for entities the mirror does not know
//! are dropped with a warning. Applying the same message sequence to two
//! mirrors always yields identical mirrors.

use dispatch_types::{Command, DeliveryEvent, EventKind, OrderId, OrderState, Snapshot};
use tracing::{debug, warn};

use crate::history::HistoryLog;
use crate::message::Message;

/// What to do with a snapshot older than the one already mirrored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StalePolicy {
    /// Every snapshot wins.
    #[default]
    Overwrite,
    /// Snapshots whose `t` is below the mirrored `t` are ignored.
    IgnoreOlder,
}

/// Why an event had no effect on the mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// No snapshot has been received yet.
    NoSnapshot,
    /// The event carries no order id.
    MissingOrder,
    /// The order is not in the mirror.
    UnknownOrder(OrderId),
    /// The driver is not in the mirror.
    UnknownDriver(String),
    /// The event would move the order backward.
    Illegal {
        /// Affected order.
        order: OrderId,
        /// Mirrored state.
        from: OrderState,
        /// Requested state.
        to: OrderState,
    },
    /// An event name this build does not know.
    Unrecognized,
}

/// Effect of one message on the mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The mirrored World Model was replaced.
    Replaced,
    /// A snapshot older than the mirror was ignored.
    Stale,
    /// An event moved an order.
    EventApplied {
        /// Affected order.
        order: OrderId,
        /// Order state after the event.
        state: OrderState,
        /// Whether anything changed.
        changed: bool,
    },
    /// An event was dropped.
    EventDropped(DropReason),
    /// History entries were appended.
    HistoryAppended(usize),
    /// The message carries no state.
    Diagnostic,
    /// Commands flow toward the authority and never change a mirror.
    CommandIgnored,
}

/// Mirrored World Model plus the bounded history seen so far.
#[derive(Debug, Clone, Default)]
pub struct Mirror {
    snapshot: Option<Snapshot>,
    history: HistoryLog,
    policy: StalePolicy,
    pending: Vec<Command>,
}

impl Mirror {
    /// An empty mirror with the given history capacity.
    pub fn new(history_capacity: usize, policy: StalePolicy) -> Self {
        Self {
            snapshot: None,
            history: HistoryLog::new(history_capacity),
            policy,
            pending: Vec::new(),
        }
    }

    /// The mirrored snapshot, if any has arrived.
    pub const fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    /// History seen so far.
    pub const fn history(&self) -> &HistoryLog {
        &self.history
    }

    /// Commands sent but not yet reflected by a snapshot.
    pub fn pending(&self) -> &[Command] {
        &self.pending
    }

    /// Record a command sent toward the authority. The next snapshot
    /// supersedes it.
    pub fn stage(&mut self, command: Command) {
        self.pending.push(command);
    }

    /// Apply one message.
    pub fn apply(&mut self, message: &Message) -> Applied {
        match message {
            Message::State(snapshot) => self.replace(snapshot),
            Message::Event(event) => self.apply_event(event),
            Message::History(batch) => {
                self.history.extend(batch.items.iter().cloned());
                Applied::HistoryAppended(batch.items.len())
            }
            Message::Info(_) | Message::Raw(_) => Applied::Diagnostic,
            Message::Cmd(_) => Applied::CommandIgnored,
        }
    }

    fn replace(&mut self, snapshot: &Snapshot) -> Applied {
        if self.policy == StalePolicy::IgnoreOlder
            && self.snapshot.as_ref().is_some_and(|current| snapshot.t < current.t)
        {
            debug!(t = snapshot.t, "Stale snapshot ignored");
            return Applied::Stale;
        }
        self.snapshot = Some(snapshot.clone());
        self.pending.clear();
        Applied::Replaced
    }

    fn apply_event(&mut self, event: &DeliveryEvent) -> Applied {
        let Some(target) = event.ev.target_state() else {
            return match event.ev {
                EventKind::ButtonPressed => Applied::Diagnostic,
                _ => drop_event(DropReason::Unrecognized),
            };
        };
        let Some(snapshot) = self.snapshot.as_mut() else {
            return drop_event(DropReason::NoSnapshot);
        };
        let Some(order_id) = event.order else {
            return drop_event(DropReason::MissingOrder);
        };
        let world = &mut snapshot.world;
        let Some(order) = world.order(order_id) else {
            return drop_event(DropReason::UnknownOrder(order_id));
        };
        if target.rank() < order.state.rank() {
            return drop_event(DropReason::Illegal {
                order: order_id,
                from: order.state,
                to: target,
            });
        }
        let carrier = event.driver.clone().or_else(|| order.assigned_to.clone());
        let moves_load = matches!(event.ev, EventKind::DriverAssigned | EventKind::Delivered);
        if let Some(driver) = carrier
            .as_ref()
            .filter(|id| moves_load && world.driver(id).is_none())
        {
            return drop_event(DropReason::UnknownDriver(driver.to_string()));
        }

        if moves_load {
            // Only the driver named by an assignment may keep the order.
            let keeper = carrier
                .as_ref()
                .filter(|_| matches!(event.ev, EventKind::DriverAssigned));
            for driver in &mut world.drivers {
                if keeper == Some(&driver.id) {
                    if !driver.load.contains(&order_id) {
                        driver.load.push(order_id);
                    }
                } else {
                    driver.load.retain(|&id| id != order_id);
                }
            }
        }

        let Some(order) = world.order_mut(order_id) else {
            return drop_event(DropReason::UnknownOrder(order_id));
        };
        let from = order.state;
        let Ok(changed) = order.fast_forward(target) else {
            return drop_event(DropReason::Illegal {
                order: order_id,
                from,
                to: target,
            });
        };
        match event.ev {
            EventKind::DriverAssigned => {
                order.assigned_to = carrier;
                if order.picked_ms.is_none() {
                    order.picked_ms = event.t;
                }
            }
            EventKind::Delivered => {
                order.assigned_to = None;
                order.delivered_by = carrier;
                if order.delivered_ms.is_none() {
                    order.delivered_ms = event.t;
                }
            }
            EventKind::OrderReady => {
                order.t_left_ms = 0;
                if order.ready_ms.is_none() {
                    order.ready_ms = event.t;
                }
            }
            _ => {}
        }
        Applied::EventApplied {
            order: order_id,
            state: order.state,
            changed,
        }
    }
}

fn drop_event(reason: DropReason) -> Applied {
    warn!(reason = ?reason, "Event dropped");
    Applied::EventDropped(reason)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use dispatch_types::{
        Driver, DriverId, Grid, House, HouseId, HistoryItem, Order, Position, Restaurant,
        RestaurantId, WorldModel,
    };

    use super::*;

    fn snapshot(t: u64) -> Snapshot {
        let house = HouseId::from("H1");
        let rest = RestaurantId::from("R1");
        let mut order = Order::new(OrderId(100), house.clone(), rest.clone(), 20, 0);
        order.state = OrderState::SearchingDriver;
        Snapshot {
            t,
            tick: 5,
            world: WorldModel {
                grid: Grid::default(),
                restaurants: vec![Restaurant {
                    id: rest,
                    pos: Position::new(2, 1),
                    algo: Default::default(),
                    queue: 1,
                }],
                houses: vec![House {
                    id: house,
                    pos: Position::new(3, 3),
                }],
                drivers: vec![Driver {
                    id: DriverId::from("M1"),
                    pos: Position::new(2, 1),
                    load: Vec::new(),
                    target: None,
                    eta_s: 0,
                }],
                orders: vec![order],
            },
            metrics: Default::default(),
        }
    }

    fn assigned(t: u64) -> Message {
        Message::Event(
            DeliveryEvent::for_order(EventKind::DriverAssigned, OrderId(100), t)
                .with_driver(DriverId::from("M1")),
        )
    }

    fn delivered(t: u64) -> Message {
        Message::Event(
            DeliveryEvent::for_order(EventKind::Delivered, OrderId(100), t)
                .with_driver(DriverId::from("M1"))
                .with_latency(12.5),
        )
    }

    #[test]
    fn snapshot_replaces_rather_than_merges() {
        let mut mirror = Mirror::default();
        mirror.apply(&Message::state(snapshot(1000)));
        mirror.apply(&assigned(1200));

        let mut fresh = snapshot(1400);
        fresh.world.orders.clear();
        assert_eq!(mirror.apply(&Message::state(fresh.clone())), Applied::Replaced);
        assert_eq!(mirror.snapshot(), Some(&fresh));
    }

    #[test]
    fn assignment_and_delivery_keep_loads_consistent() {
        let mut mirror = Mirror::default();
        mirror.apply(&Message::state(snapshot(1000)));

        let applied = mirror.apply(&assigned(1200));
        assert_eq!(
            applied,
            Applied::EventApplied {
                order: OrderId(100),
                state: OrderState::EnRoute,
                changed: true
            }
        );
        let world = &mirror.snapshot().unwrap().world;
        assert_eq!(world.drivers[0].load, vec![OrderId(100)]);
        assert!(world.check_invariants().is_ok());

        mirror.apply(&delivered(5000));
        let world = &mirror.snapshot().unwrap().world;
        let order = world.order(OrderId(100)).unwrap();
        assert_eq!(order.state, OrderState::Delivered);
        assert_eq!(order.assigned_to, None);
        assert_eq!(order.delivered_by, Some(DriverId::from("M1")));
        assert_eq!(order.delivered_ms, Some(5000));
        assert!(world.drivers[0].load.is_empty());
    }

    #[test]
    fn delivery_by_another_driver_frees_the_assigned_one() {
        let mut start = snapshot(1000);
        start.world.drivers.push(Driver {
            id: DriverId::from("M2"),
            pos: Position::new(3, 3),
            load: Vec::new(),
            target: None,
            eta_s: 0,
        });
        let mut mirror = Mirror::default();
        mirror.apply(&Message::state(start));
        mirror.apply(&assigned(1200));

        let handed_over = Message::Event(
            DeliveryEvent::for_order(EventKind::Delivered, OrderId(100), 5000)
                .with_driver(DriverId::from("M2")),
        );
        mirror.apply(&handed_over);
        let world = &mirror.snapshot().unwrap().world;
        assert!(world.drivers.iter().all(|d| d.load.is_empty()));
        let order = world.order(OrderId(100)).unwrap();
        assert_eq!(order.assigned_to, None);
        assert_eq!(order.delivered_by, Some(DriverId::from("M2")));
        assert!(world.check_invariants().is_ok());
    }

    #[test]
    fn unknown_entities_are_dropped() {
        let mut mirror = Mirror::default();
        assert_eq!(
            mirror.apply(&assigned(1)),
            Applied::EventDropped(DropReason::NoSnapshot)
        );
        mirror.apply(&Message::state(snapshot(1000)));

        let ghost = Message::Event(DeliveryEvent::for_order(
            EventKind::OrderReady,
            OrderId(999),
            1100,
        ));
        assert_eq!(
            mirror.apply(&ghost),
            Applied::EventDropped(DropReason::UnknownOrder(OrderId(999)))
        );

        let stranger = Message::Event(
            DeliveryEvent::for_order(EventKind::DriverAssigned, OrderId(100), 1100)
                .with_driver(DriverId::from("M9")),
        );
        assert_eq!(
            mirror.apply(&stranger),
            Applied::EventDropped(DropReason::UnknownDriver("M9".to_owned()))
        );
        assert_eq!(mirror.snapshot(), Some(&snapshot(1000)));
    }

    #[test]
    fn events_never_move_an_order_backward() {
        let mut mirror = Mirror::default();
        mirror.apply(&Message::state(snapshot(1000)));
        let back = Message::Event(DeliveryEvent::for_order(
            EventKind::OrderPreparing,
            OrderId(100),
            1100,
        ));
        assert!(matches!(
            mirror.apply(&back),
            Applied::EventDropped(DropReason::Illegal { .. })
        ));
        assert_eq!(mirror.snapshot(), Some(&snapshot(1000)));
    }

    #[test]
    fn two_mirrors_fed_the_same_sequence_agree() {
        let sequence = vec![
            Message::state(snapshot(1000)),
            Message::history(vec![HistoryItem::new(1000, "order 100 created")]),
            assigned(1200),
            Message::Info(dispatch_types::InfoMessage::info("noise")),
            delivered(5000),
            Message::Event(DeliveryEvent::button_pressed(serde_json::json!("cat"))),
            assigned(5200),
        ];
        let mut left = Mirror::default();
        let mut right = Mirror::default();
        for msg in &sequence {
            left.apply(msg);
        }
        for msg in &sequence {
            right.apply(msg);
        }
        assert_eq!(left.snapshot(), right.snapshot());
        assert_eq!(left.history(), right.history());
    }

    #[test]
    fn stale_snapshots_follow_policy() {
        let mut strict = Mirror::new(10, StalePolicy::IgnoreOlder);
        strict.apply(&Message::state(snapshot(2000)));
        assert_eq!(strict.apply(&Message::state(snapshot(1000))), Applied::Stale);
        assert_eq!(strict.snapshot().unwrap().t, 2000);

        let mut lax = Mirror::default();
        lax.apply(&Message::state(snapshot(2000)));
        assert_eq!(lax.apply(&Message::state(snapshot(1000))), Applied::Replaced);
        assert_eq!(lax.snapshot().unwrap().t, 1000);
    }

    #[test]
    fn staged_commands_clear_on_snapshot() {
        let mut mirror = Mirror::default();
        mirror.stage(Command::Pause);
        assert_eq!(mirror.pending(), &[Command::Pause]);
        mirror.apply(&Message::state(snapshot(1000)));
        assert!(mirror.pending().is_empty());
    }
}
