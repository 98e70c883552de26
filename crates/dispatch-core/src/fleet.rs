//! Driver movement and assignment.
//!
//! Assignment policy ("RR+nearest"): READY orders first become
//! SEARCHING_DRIVER. Idle drivers (no target, empty load, no reservation)
//! are visited round-robin from a cursor that advances by one every tick.
//! A visited driver that passes its assignment roll considers, per
//! restaurant, the first unreserved searching order in that restaurant's
//! queue, and takes the one whose restaurant is nearest. Ties go to the
//! restaurant listed first, then to the lower order id. The order is
//! reserved and the driver heads to the restaurant; on arrival it picks the
//! order up together with further searching orders from the same queue, up
//! to its capacity, and heads to the first order's house.

use std::collections::BTreeMap;
use std::time::Duration;

use dispatch_types::{
    DeliveryEvent, DriverId, EventKind, OrderId, OrderState, Position, RestaurantId, WorldModel,
};
use rand::Rng;
use tracing::{debug, warn};

use crate::config::FleetConfig;
use crate::kitchen::Kitchens;
use crate::sim::{TickLog, chance};

/// Name reported in metrics for the assignment policy.
pub const DRIVER_POLICY: &str = "RR+nearest";

/// Round-robin cursor and pickup reservations.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    cursor: usize,
    reservations: BTreeMap<DriverId, OrderId>,
}

impl Dispatcher {
    /// Order `driver` is on its way to collect, if any.
    pub fn reservation(&self, driver: &DriverId) -> Option<OrderId> {
        self.reservations.get(driver).copied()
    }

    fn is_reserved(&self, order: OrderId) -> bool {
        self.reservations.values().any(|&reserved| reserved == order)
    }

    /// Move every driver with a target one cell and handle arrivals.
    pub(crate) fn move_drivers(
        &mut self,
        world: &mut WorldModel,
        kitchens: &mut Kitchens,
        capacity: u32,
        now_ms: u64,
        log: &mut TickLog,
    ) {
        for idx in 0..world.drivers.len() {
            let Some(driver) = world.drivers.get_mut(idx) else {
                continue;
            };
            let Some(target) = driver.target else {
                continue;
            };
            driver.pos = driver.pos.step_toward(target);
            if driver.pos != target {
                continue;
            }
            driver.target = None;
            let id = driver.id.clone();
            let head = driver.load.first().copied();

            if let Some(order) = head {
                deliver(world, &id, order, now_ms, log);
            } else if let Some(order) = self.reservations.remove(&id) {
                self.pick_up(world, kitchens, &id, order, capacity, now_ms, log);
            } else {
                debug!(driver = %id, pos = %target, "Idle relocation complete");
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn pick_up(
        &self,
        world: &mut WorldModel,
        kitchens: &mut Kitchens,
        driver: &DriverId,
        reserved: OrderId,
        capacity: u32,
        now_ms: u64,
        log: &mut TickLog,
    ) {
        let Some(restaurant) = world.order(reserved).map(|o| o.rest.clone()) else {
            warn!(driver = %driver, order = %reserved, "Reserved order vanished");
            return;
        };

        let limit = usize::try_from(capacity).unwrap_or(usize::MAX);
        let mut batch = vec![reserved];
        for queued in kitchens.queued(&restaurant) {
            if batch.len() >= limit {
                break;
            }
            let searching = world
                .order(queued)
                .is_some_and(|o| o.state == OrderState::SearchingDriver);
            if queued != reserved && searching && !self.is_reserved(queued) {
                batch.push(queued);
            }
        }

        for order_id in batch {
            let Some(order) = world.order_mut(order_id) else {
                continue;
            };
            if let Err(err) = order.advance(OrderState::EnRoute) {
                warn!(error = %err, "Pickup skipped");
                continue;
            }
            order.assigned_to = Some(driver.clone());
            order.picked_ms = Some(now_ms);
            kitchens.release(&restaurant, order_id);
            if let Some(d) = world.driver_mut(driver) {
                d.load.push(order_id);
            }
            log.event(
                DeliveryEvent::for_order(EventKind::DriverAssigned, order_id, now_ms)
                    .with_driver(driver.clone()),
            );
            log.note(now_ms, format!("Order {order_id} picked up by {driver} at {restaurant}"));
        }

        retarget(world, driver);
    }

    /// Promote READY orders and hand pending pickups to idle drivers.
    pub(crate) fn assign_idle<R: Rng>(
        &mut self,
        world: &mut WorldModel,
        kitchens: &Kitchens,
        fleet: &FleetConfig,
        rng: &mut R,
        now_ms: u64,
        log: &mut TickLog,
    ) {
        for order in world
            .orders
            .iter_mut()
            .filter(|o| o.state == OrderState::Ready)
        {
            if order.advance(OrderState::SearchingDriver).is_ok() {
                log.event(DeliveryEvent::for_order(
                    EventKind::SearchingDriver,
                    order.id,
                    now_ms,
                ));
            }
        }

        let count = world.drivers.len();
        if count == 0 {
            return;
        }
        let start = self.cursor % count;
        self.cursor = start.wrapping_add(1) % count;

        for step in 0..count {
            let idx = start.wrapping_add(step) % count;
            let Some(driver) = world.drivers.get(idx) else {
                continue;
            };
            if !driver.is_idle() || self.reservations.contains_key(&driver.id) {
                continue;
            }
            if !chance(rng, fleet.assign_probability) {
                continue;
            }
            let id = driver.id.clone();
            let pos = driver.pos;

            if let Some((order, dest)) = self.nearest_pickup(world, kitchens, pos) {
                self.reservations.insert(id.clone(), order);
                set_target(world, &id, dest);
                debug!(driver = %id, order = %order, "Pickup reserved");
            } else if !world.houses.is_empty() && chance(rng, fleet.wander_probability) {
                let pick = rng.random_range(0..world.houses.len());
                if let Some(house) = world.houses.get(pick).map(|h| h.pos) {
                    set_target(world, &id, house);
                }
            }
        }
    }

    fn nearest_pickup(
        &self,
        world: &WorldModel,
        kitchens: &Kitchens,
        from: Position,
    ) -> Option<(OrderId, Position)> {
        let mut best: Option<(u32, usize, OrderId, Position)> = None;
        for (rank, restaurant) in world.restaurants.iter().enumerate() {
            let Some(order) = first_unreserved(self, world, kitchens, &restaurant.id) else {
                continue;
            };
            let key = (from.manhattan(restaurant.pos), rank, order, restaurant.pos);
            if best.is_none_or(|b| (key.0, key.1, key.2) < (b.0, b.1, b.2)) {
                best = Some(key);
            }
        }
        best.map(|(_, _, order, pos)| (order, pos))
    }

    /// Drop reservations held by drivers that no longer exist.
    pub(crate) fn prune(&mut self, world: &WorldModel) {
        self.reservations
            .retain(|driver, _| world.driver(driver).is_some());
    }
}

fn first_unreserved(
    dispatcher: &Dispatcher,
    world: &WorldModel,
    kitchens: &Kitchens,
    restaurant: &RestaurantId,
) -> Option<OrderId> {
    kitchens.queued(restaurant).find(|&id| {
        !dispatcher.is_reserved(id)
            && world
                .order(id)
                .is_some_and(|o| o.state == OrderState::SearchingDriver)
    })
}

fn deliver(world: &mut WorldModel, driver: &DriverId, order_id: OrderId, now_ms: u64, log: &mut TickLog) {
    if let Some(d) = world.driver_mut(driver) {
        d.load.retain(|&carried| carried != order_id);
    }
    let Some(order) = world.order_mut(order_id) else {
        warn!(driver = %driver, order = %order_id, "Delivered order vanished");
        retarget(world, driver);
        return;
    };
    if let Err(err) = order.advance(OrderState::Delivered) {
        warn!(error = %err, "Delivery skipped");
    } else {
        order.assigned_to = None;
        order.delivered_by = Some(driver.clone());
        order.delivered_ms = Some(now_ms);
        let latency =
            Duration::from_millis(now_ms.saturating_sub(order.created_ms)).as_secs_f64();
        log.event(
            DeliveryEvent::for_order(EventKind::Delivered, order_id, now_ms)
                .with_driver(driver.clone())
                .with_latency(latency),
        );
        log.note(
            now_ms,
            format!("Order {order_id} delivered by {driver} ({latency:.1}s)"),
        );
    }
    retarget(world, driver);
}

/// Point `driver` at the house of the next order on board, or idle it.
fn retarget(world: &mut WorldModel, driver: &DriverId) {
    let next = world
        .driver(driver)
        .and_then(|d| d.load.first().copied())
        .and_then(|order| world.order(order))
        .and_then(|order| world.house(&order.house))
        .map(|house| house.pos);
    if let Some(d) = world.driver_mut(driver) {
        d.target = next;
    }
}

fn set_target(world: &mut WorldModel, driver: &DriverId, target: Position) {
    if let Some(d) = world.driver_mut(driver) {
        d.target = Some(target);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use dispatch_types::{
        Driver, Grid, House, HouseId, KitchenAlgorithm, Order, Restaurant,
    };
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn world() -> WorldModel {
        WorldModel {
            grid: Grid { rows: 8, cols: 8 },
            restaurants: vec![
                Restaurant {
                    id: RestaurantId::new("R1"),
                    pos: Position::new(1, 1),
                    algo: KitchenAlgorithm::FirstComeFirstServed,
                    queue: 0,
                },
                Restaurant {
                    id: RestaurantId::new("R2"),
                    pos: Position::new(8, 8),
                    algo: KitchenAlgorithm::FirstComeFirstServed,
                    queue: 0,
                },
            ],
            houses: vec![House {
                id: HouseId::new("H1"),
                pos: Position::new(1, 3),
            }],
            drivers: vec![Driver {
                id: DriverId::new("M1"),
                pos: Position::new(2, 1),
                load: Vec::new(),
                target: None,
                eta_s: 0,
            }],
            orders: Vec::new(),
        }
    }

    fn searching(world: &mut WorldModel, kitchens: &mut Kitchens, id: u64, rest: &str) {
        let mut order = Order::new(
            OrderId(id),
            HouseId::new("H1"),
            RestaurantId::new(rest),
            20,
            0,
        );
        order.state = OrderState::SearchingDriver;
        kitchens.enqueue(&order.rest, order.id, 20);
        world.orders.push(order);
    }

    fn no_wander() -> FleetConfig {
        FleetConfig {
            driver_capacity: 1,
            assign_probability: 1.0,
            wander_probability: 0.0,
        }
    }

    #[test]
    fn nearest_restaurant_wins() {
        let mut w = world();
        let mut k = Kitchens::new(&w.restaurants);
        searching(&mut w, &mut k, 1, "R2");
        searching(&mut w, &mut k, 2, "R1");
        let mut d = Dispatcher::default();
        let mut log = TickLog::default();
        let mut rng = StdRng::seed_from_u64(0);

        d.assign_idle(&mut w, &k, &no_wander(), &mut rng, 0, &mut log);
        let driver = DriverId::new("M1");
        assert_eq!(d.reservation(&driver), Some(OrderId(2)));
        assert_eq!(w.driver(&driver).unwrap().target, Some(Position::new(1, 1)));
    }

    #[test]
    fn ready_orders_start_searching() {
        let mut w = world();
        let mut k = Kitchens::new(&w.restaurants);
        searching(&mut w, &mut k, 1, "R1");
        w.orders.first_mut().unwrap().state = OrderState::Ready;
        let mut d = Dispatcher::default();
        let mut log = TickLog::default();
        w.drivers.clear();

        d.assign_idle(&mut w, &k, &no_wander(), &mut StdRng::seed_from_u64(0), 10, &mut log);
        assert_eq!(w.orders.first().unwrap().state, OrderState::SearchingDriver);
        assert_eq!(log.events.len(), 1);
    }

    #[test]
    fn full_pickup_and_delivery_cycle() {
        let mut w = world();
        let mut k = Kitchens::new(&w.restaurants);
        searching(&mut w, &mut k, 1, "R1");
        let mut d = Dispatcher::default();
        let mut log = TickLog::default();
        let mut rng = StdRng::seed_from_u64(0);
        let driver = DriverId::new("M1");

        d.assign_idle(&mut w, &k, &no_wander(), &mut rng, 0, &mut log);
        d.move_drivers(&mut w, &mut k, 1, 200, &mut log);

        let order = w.order(OrderId(1)).unwrap();
        assert_eq!(order.state, OrderState::EnRoute);
        assert_eq!(order.assigned_to.as_ref(), Some(&driver));
        assert_eq!(k.queue_len(&RestaurantId::new("R1")), 0);
        assert_eq!(w.driver(&driver).unwrap().target, Some(Position::new(1, 3)));
        assert!(w.check_invariants().is_ok());

        d.move_drivers(&mut w, &mut k, 1, 400, &mut log);
        d.move_drivers(&mut w, &mut k, 1, 600, &mut log);

        let order = w.order(OrderId(1)).unwrap();
        assert_eq!(order.state, OrderState::Delivered);
        assert_eq!(order.assigned_to, None);
        assert_eq!(order.delivered_by.as_ref(), Some(&driver));
        let m1 = w.driver(&driver).unwrap();
        assert!(m1.load.is_empty());
        assert_eq!(m1.target, None);
        assert!(
            log.events
                .iter()
                .any(|e| e.ev == EventKind::Delivered && e.latency_s.is_some())
        );
    }

    #[test]
    fn capacity_batches_same_restaurant() {
        let mut w = world();
        let mut k = Kitchens::new(&w.restaurants);
        searching(&mut w, &mut k, 1, "R1");
        searching(&mut w, &mut k, 2, "R1");
        searching(&mut w, &mut k, 3, "R1");
        let mut d = Dispatcher::default();
        let mut log = TickLog::default();
        let fleet = FleetConfig {
            driver_capacity: 2,
            ..no_wander()
        };

        d.assign_idle(&mut w, &k, &fleet, &mut StdRng::seed_from_u64(0), 0, &mut log);
        d.move_drivers(&mut w, &mut k, 2, 200, &mut log);

        let m1 = w.driver(&DriverId::new("M1")).unwrap();
        assert_eq!(m1.load, vec![OrderId(1), OrderId(2)]);
        assert_eq!(w.order(OrderId(3)).unwrap().state, OrderState::SearchingDriver);
        assert!(w.check_invariants().is_ok());
    }

    #[test]
    fn idle_driver_without_work_may_wander() {
        let mut w = world();
        let k = Kitchens::new(&w.restaurants);
        let mut d = Dispatcher::default();
        let mut log = TickLog::default();
        let fleet = FleetConfig {
            wander_probability: 1.0,
            ..no_wander()
        };

        d.assign_idle(&mut w, &k, &fleet, &mut StdRng::seed_from_u64(0), 0, &mut log);
        let m1 = w.driver(&DriverId::new("M1")).unwrap();
        assert_eq!(m1.target, Some(Position::new(1, 3)));
        assert_eq!(d.reservation(&m1.id), None);
    }
}
