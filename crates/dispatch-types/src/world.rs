//! The World Model: entity collections plus grid dimensions.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::{DriverId, HouseId, OrderId, RestaurantId};
use crate::structs::{Driver, Grid, House, Order, Position, Restaurant};

/// Canonical state of one delivery-dispatch session.
///
/// Collections keep insertion order; restaurant order is significant for
/// assignment tie-breaks and is preserved on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WorldModel {
    /// Grid dimensions.
    #[serde(default)]
    pub grid: Grid,
    /// Kitchens, in map order.
    #[serde(default)]
    pub restaurants: Vec<Restaurant>,
    /// Delivery destinations.
    #[serde(default)]
    pub houses: Vec<House>,
    /// Couriers.
    #[serde(default)]
    pub drivers: Vec<Driver>,
    /// Every order ever accepted, delivered ones included.
    #[serde(default)]
    pub orders: Vec<Order>,
}

/// A broken World Model invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    /// An order names a house that does not exist.
    #[error("order {order} references unknown house {house}")]
    DanglingHouse {
        /// The offending order.
        order: OrderId,
        /// The missing house.
        house: HouseId,
    },

    /// An order names a restaurant that does not exist.
    #[error("order {order} references unknown restaurant {restaurant}")]
    DanglingRestaurant {
        /// The offending order.
        order: OrderId,
        /// The missing restaurant.
        restaurant: RestaurantId,
    },

    /// An order is assigned to a driver whose load does not contain it.
    #[error("order {order} is assigned to {driver} but not in its load")]
    AssignmentMismatch {
        /// The offending order.
        order: OrderId,
        /// The driver named by the order.
        driver: DriverId,
    },

    /// Two orders share an id.
    #[error("order id {0} is used more than once")]
    DuplicateOrder(OrderId),

    /// An entity sits outside the grid.
    #[error("{entity} at {pos} is outside the grid")]
    OffGrid {
        /// Identifier of the entity.
        entity: String,
        /// Its position.
        pos: Position,
    },
}

impl WorldModel {
    /// Looks up a restaurant by id.
    pub fn restaurant(&self, id: &RestaurantId) -> Option<&Restaurant> {
        self.restaurants.iter().find(|r| &r.id == id)
    }

    /// Looks up a house by id.
    pub fn house(&self, id: &HouseId) -> Option<&House> {
        self.houses.iter().find(|h| &h.id == id)
    }

    /// The first house located at `pos`, if any.
    pub fn house_at(&self, pos: Position) -> Option<&House> {
        self.houses.iter().find(|h| h.pos == pos)
    }

    /// Looks up a driver by id.
    pub fn driver(&self, id: &DriverId) -> Option<&Driver> {
        self.drivers.iter().find(|d| &d.id == id)
    }

    /// Mutable driver lookup.
    pub fn driver_mut(&mut self, id: &DriverId) -> Option<&mut Driver> {
        self.drivers.iter_mut().find(|d| &d.id == id)
    }

    /// Looks up an order by id.
    pub fn order(&self, id: OrderId) -> Option<&Order> {
        self.orders.iter().find(|o| o.id == id)
    }

    /// Mutable order lookup.
    pub fn order_mut(&mut self, id: OrderId) -> Option<&mut Order> {
        self.orders.iter_mut().find(|o| o.id == id)
    }

    /// Checks referential integrity, assignment consistency, unique order
    /// ids and grid bounds. Returns the first violation found.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        for r in &self.restaurants {
            self.check_on_grid(r.id.as_str(), r.pos)?;
        }
        for h in &self.houses {
            self.check_on_grid(h.id.as_str(), h.pos)?;
        }
        for d in &self.drivers {
            self.check_on_grid(d.id.as_str(), d.pos)?;
        }

        let mut seen = BTreeSet::new();
        for order in &self.orders {
            if !seen.insert(order.id) {
                return Err(InvariantViolation::DuplicateOrder(order.id));
            }
            if self.house(&order.house).is_none() {
                return Err(InvariantViolation::DanglingHouse {
                    order: order.id,
                    house: order.house.clone(),
                });
            }
            if self.restaurant(&order.rest).is_none() {
                return Err(InvariantViolation::DanglingRestaurant {
                    order: order.id,
                    restaurant: order.rest.clone(),
                });
            }
            if let Some(driver) = &order.assigned_to {
                let carried = self
                    .driver(driver)
                    .is_some_and(|d| d.load.contains(&order.id));
                if !carried {
                    return Err(InvariantViolation::AssignmentMismatch {
                        order: order.id,
                        driver: driver.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn check_on_grid(&self, entity: &str, pos: Position) -> Result<(), InvariantViolation> {
        if self.grid.contains(pos) {
            Ok(())
        } else {
            Err(InvariantViolation::OffGrid {
                entity: entity.to_owned(),
                pos,
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::enums::KitchenAlgorithm;

    fn small_world() -> WorldModel {
        WorldModel {
            grid: Grid { rows: 4, cols: 4 },
            restaurants: vec![Restaurant {
                id: RestaurantId::new("R1"),
                pos: Position::new(1, 1),
                algo: KitchenAlgorithm::default(),
                queue: 0,
            }],
            houses: vec![House {
                id: HouseId::new("H1"),
                pos: Position::new(3, 3),
            }],
            drivers: vec![Driver {
                id: DriverId::new("M1"),
                pos: Position::new(2, 2),
                load: Vec::new(),
                target: None,
                eta_s: 0,
            }],
            orders: vec![Order::new(
                OrderId(100),
                HouseId::new("H1"),
                RestaurantId::new("R1"),
                20,
                0,
            )],
        }
    }

    #[test]
    fn consistent_world_passes() {
        assert_eq!(small_world().check_invariants(), Ok(()));
    }

    #[test]
    fn dangling_house_is_reported() {
        let mut world = small_world();
        world.orders[0].house = HouseId::new("H9");
        assert!(matches!(
            world.check_invariants(),
            Err(InvariantViolation::DanglingHouse { .. })
        ));
    }

    #[test]
    fn assignment_requires_driver_load() {
        let mut world = small_world();
        world.orders[0].assigned_to = Some(DriverId::new("M1"));
        assert!(matches!(
            world.check_invariants(),
            Err(InvariantViolation::AssignmentMismatch { .. })
        ));

        world.drivers[0].load.push(OrderId(100));
        assert_eq!(world.check_invariants(), Ok(()));
    }

    #[test]
    fn duplicate_ids_and_off_grid_entities_are_reported() {
        let mut world = small_world();
        let copy = world.orders[0].clone();
        world.orders.push(copy);
        assert_eq!(
            world.check_invariants(),
            Err(InvariantViolation::DuplicateOrder(OrderId(100)))
        );

        let mut world = small_world();
        world.drivers[0].pos = Position::new(5, 1);
        assert!(matches!(
            world.check_invariants(),
            Err(InvariantViolation::OffGrid { .. })
        ));
    }

    #[test]
    fn lookups_find_entities() {
        let world = small_world();
        assert!(world.restaurant(&RestaurantId::new("R1")).is_some());
        assert!(world.house_at(Position::new(3, 3)).is_some());
        assert!(world.house_at(Position::new(4, 4)).is_none());
        assert_eq!(world.order(OrderId(100)).unwrap().t_prep_s, 20);
    }
}
