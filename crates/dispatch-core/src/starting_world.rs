//! The default map used by the local simulator.
//!
//! Five restaurants and three drivers sit at fixed cells; houses are
//! scattered over free cells with the seeded RNG so a given seed always
//! produces the same map.

use std::collections::BTreeSet;

use dispatch_types::{
    Driver, DriverId, Grid, House, HouseId, Position, Restaurant, RestaurantId, WorldModel,
};
use rand::Rng;
use tracing::debug;

use crate::config::SimulationConfig;

/// Restaurant ids and cells of the default map.
pub const DEFAULT_RESTAURANTS: [(&str, u32, u32); 5] = [
    ("R1", 2, 1),
    ("R2", 7, 1),
    ("R3", 1, 4),
    ("R4", 6, 6),
    ("R5", 3, 7),
];

/// Driver ids and starting cells of the default map.
pub const DEFAULT_DRIVERS: [(&str, u32, u32); 3] = [("M1", 2, 6), ("M2", 8, 1), ("M3", 4, 3)];

/// Attempts to find an unoccupied cell before settling for any cell.
const FREE_CELL_ATTEMPTS: u32 = 32;

/// Build the default map for `config`.
///
/// Fixed cells that fall outside a smaller grid are clamped onto its edge.
pub fn default_world<R: Rng>(config: &SimulationConfig, rng: &mut R) -> WorldModel {
    let grid = Grid {
        rows: config.world.rows,
        cols: config.world.cols,
    };

    let restaurants: Vec<Restaurant> = DEFAULT_RESTAURANTS
        .iter()
        .map(|&(id, av, ca)| Restaurant {
            id: RestaurantId::new(id),
            pos: clamp(grid, av, ca),
            algo: config.kitchen.algorithm,
            queue: 0,
        })
        .collect();

    let drivers = DEFAULT_DRIVERS
        .iter()
        .map(|&(id, av, ca)| Driver {
            id: DriverId::new(id),
            pos: clamp(grid, av, ca),
            load: Vec::new(),
            target: None,
            eta_s: 0,
        })
        .collect();

    let mut occupied: BTreeSet<Position> = restaurants.iter().map(|r| r.pos).collect();
    let mut houses = Vec::new();
    for n in 1..=config.world.house_count {
        let pos = free_cell(grid, &occupied, rng);
        occupied.insert(pos);
        houses.push(House {
            id: HouseId::new(format!("H{n}")),
            pos,
        });
    }

    debug!(
        restaurants = restaurants.len(),
        houses = houses.len(),
        rows = grid.rows,
        cols = grid.cols,
        "Default map built"
    );

    WorldModel {
        grid,
        restaurants,
        houses,
        drivers,
        orders: Vec::new(),
    }
}

/// A uniformly random cell of `grid`.
pub fn random_cell<R: Rng>(grid: Grid, rng: &mut R) -> Position {
    Position::new(
        rng.random_range(1..=grid.cols.max(1)),
        rng.random_range(1..=grid.rows.max(1)),
    )
}

fn free_cell<R: Rng>(grid: Grid, occupied: &BTreeSet<Position>, rng: &mut R) -> Position {
    let mut pos = random_cell(grid, rng);
    for _ in 0..FREE_CELL_ATTEMPTS {
        if !occupied.contains(&pos) {
            break;
        }
        pos = random_cell(grid, rng);
    }
    pos
}

fn clamp(grid: Grid, av: u32, ca: u32) -> Position {
    Position::new(av.clamp(1, grid.cols.max(1)), ca.clamp(1, grid.rows.max(1)))
}
