//! World Model entities: grid, restaurants, houses, drivers, orders.
//!
//! Field names follow the board's wire contract (`pos`, `av`, `ca`, `rest`,
//! `t_left_ms`, ...) so snapshots produced by a physical authority and by
//! the local simulator are interchangeable.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{KitchenAlgorithm, OrderState};
use crate::ids::{DriverId, HouseId, OrderId, RestaurantId};

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// A 1-indexed grid cell: avenue (column) and street (`ca`, row).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[ts(export, export_to = "bindings/")]
pub struct Position {
    /// Avenue, 1..=cols.
    pub av: u32,
    /// Street, 1..=rows.
    pub ca: u32,
}

impl Position {
    /// Creates a position from avenue and street.
    pub const fn new(av: u32, ca: u32) -> Self {
        Self { av, ca }
    }

    /// Manhattan distance in cells.
    pub const fn manhattan(self, other: Self) -> u32 {
        self.av
            .abs_diff(other.av)
            .saturating_add(self.ca.abs_diff(other.ca))
    }

    /// One cell closer to `target`: the avenue gap closes first, then the
    /// street gap. Never moves diagonally. Returns `self` when already there.
    pub const fn step_toward(self, target: Self) -> Self {
        if self.av < target.av {
            Self::new(self.av.saturating_add(1), self.ca)
        } else if self.av > target.av {
            Self::new(self.av.saturating_sub(1), self.ca)
        } else if self.ca < target.ca {
            Self::new(self.av, self.ca.saturating_add(1))
        } else if self.ca > target.ca {
            Self::new(self.av, self.ca.saturating_sub(1))
        } else {
            self
        }
    }
}

impl core::fmt::Display for Position {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Av{} C{}", self.av, self.ca)
    }
}

/// Grid dimensions. Both are positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Grid {
    /// Number of streets.
    pub rows: u32,
    /// Number of avenues.
    pub cols: u32,
}

impl Grid {
    /// Whether `pos` lies on the grid.
    pub const fn contains(self, pos: Position) -> bool {
        pos.av >= 1 && pos.av <= self.cols && pos.ca >= 1 && pos.ca <= self.rows
    }
}

impl Default for Grid {
    fn default() -> Self {
        Self { rows: 8, cols: 8 }
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// A kitchen with its own order queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Restaurant {
    /// Restaurant identifier (`R1`, `R2`, ...).
    pub id: RestaurantId,
    /// Location on the grid.
    pub pos: Position,
    /// Sequencing policy applied to new queue entries.
    #[serde(default)]
    pub algo: KitchenAlgorithm,
    /// Orders accepted and not yet picked up. Derived by the authority.
    #[serde(default)]
    pub queue: u32,
}

/// A delivery destination. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct House {
    /// House identifier (`H1`, ... or `HM<order>` for ad-hoc houses).
    pub id: HouseId,
    /// Location on the grid.
    pub pos: Position,
}

/// A courier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Driver {
    /// Driver identifier (`M1`, `M2`, ...).
    pub id: DriverId,
    /// Current cell.
    pub pos: Position,
    /// Orders on board, delivery order first.
    #[serde(default)]
    pub load: Vec<OrderId>,
    /// Where the driver is heading; `None` means idle.
    #[serde(default)]
    pub target: Option<Position>,
    /// Estimated simulated seconds until `target` is reached.
    #[serde(default)]
    pub eta_s: u32,
}

impl Driver {
    /// Whether the driver has nowhere to go and nothing on board.
    pub fn is_idle(&self) -> bool {
        self.target.is_none() && self.load.is_empty()
    }
}

/// A single customer order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Order {
    /// Unique, never reused.
    pub id: OrderId,
    /// Destination house.
    pub house: HouseId,
    /// Preparing restaurant.
    pub rest: RestaurantId,
    /// Life-cycle state.
    pub state: OrderState,
    /// Total preparation time in seconds.
    pub t_prep_s: u32,
    /// Preparation time still to go, in milliseconds. Zero once cooked.
    pub t_left_ms: u64,
    /// Driver carrying the order while it is on board.
    #[serde(rename = "assignedTo", default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<DriverId>,
    /// Driver that completed the delivery.
    #[serde(rename = "deliveredBy", default, skip_serializing_if = "Option::is_none")]
    pub delivered_by: Option<DriverId>,
    /// Simulated time the order was accepted.
    #[serde(default)]
    pub created_ms: u64,
    /// Simulated time preparation finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_ms: Option<u64>,
    /// Simulated time a driver picked the order up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picked_ms: Option<u64>,
    /// Simulated time the order reached its house.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_ms: Option<u64>,
}

impl Order {
    /// A freshly accepted order in [`OrderState::Created`].
    pub fn new(
        id: OrderId,
        house: HouseId,
        rest: RestaurantId,
        t_prep_s: u32,
        created_ms: u64,
    ) -> Self {
        Self {
            id,
            house,
            rest,
            state: OrderState::Created,
            t_prep_s,
            t_left_ms: u64::from(t_prep_s).saturating_mul(1000),
            assigned_to: None,
            delivered_by: None,
            created_ms,
            ready_ms: None,
            picked_ms: None,
            delivered_ms: None,
        }
    }

    /// Remaining preparation time, rounded up to whole seconds.
    pub const fn t_left_s(&self) -> u64 {
        self.t_left_ms.div_ceil(1000)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn step_closes_avenue_before_street() {
        let target = Position::new(5, 5);
        let mut pos = Position::new(2, 3);
        let mut path = Vec::new();
        while pos != target {
            pos = pos.step_toward(target);
            path.push(pos);
        }
        assert_eq!(
            path,
            vec![
                Position::new(3, 3),
                Position::new(4, 3),
                Position::new(5, 3),
                Position::new(5, 4),
                Position::new(5, 5),
            ]
        );
    }

    #[test]
    fn step_with_equal_avenue_walks_the_street() {
        let target = Position::new(5, 5);
        let first = Position::new(5, 2).step_toward(target);
        let second = first.step_toward(target);
        let third = second.step_toward(target);
        assert_eq!(first, Position::new(5, 3));
        assert_eq!(second, Position::new(5, 4));
        assert_eq!(third, target);
        assert_eq!(third.step_toward(target), target);
    }

    #[test]
    fn grid_bounds_are_one_indexed() {
        let grid = Grid { rows: 8, cols: 6 };
        assert!(grid.contains(Position::new(1, 1)));
        assert!(grid.contains(Position::new(6, 8)));
        assert!(!grid.contains(Position::new(0, 3)));
        assert!(!grid.contains(Position::new(7, 3)));
        assert!(!grid.contains(Position::new(3, 9)));
    }

    #[test]
    fn order_serializes_with_board_field_names() {
        let mut order = Order::new(
            OrderId(101),
            HouseId::new("H1"),
            RestaurantId::new("R1"),
            20,
            0,
        );
        order.assigned_to = Some(DriverId::new("M1"));
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["rest"], "R1");
        assert_eq!(json["assignedTo"], "M1");
        assert_eq!(json["t_left_ms"], 20_000);
        assert_eq!(json["state"], "CREATED");
        assert!(json.get("deliveredBy").is_none());
    }

    #[test]
    fn idle_driver_target_serializes_as_null() {
        let driver = Driver {
            id: DriverId::new("M1"),
            pos: Position::new(2, 6),
            load: Vec::new(),
            target: None,
            eta_s: 0,
        };
        let json = serde_json::to_string(&driver).unwrap();
        assert_eq!(
            json,
            r#"{"id":"M1","pos":{"av":2,"ca":6},"load":[],"target":null,"eta_s":0}"#
        );
        assert!(driver.is_idle());
    }
}
