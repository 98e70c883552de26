//! Command application.
//!
//! Commands are validated completely before anything is mutated, so a
//! rejected command leaves the World Model untouched.

use dispatch_types::{
    Command, House, HouseId, HouseRef, KitchenAlgorithm, OrderId, RestaurantId,
};
use tracing::info;

use crate::sim::Simulator;
use crate::starting_world::random_cell;

/// Longest preparation time a `CREATE_ORDER` may request.
pub const MAX_PREP_S: u32 = 3600;

/// Largest `STRESS` batch.
pub const MAX_STRESS: u32 = 10_000;

/// Largest speed multiplier.
pub const MAX_SPEED: u32 = 100;

/// Why a command was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandRejected {
    /// The named house does not exist.
    #[error("unknown house {0}")]
    UnknownHouse(HouseId),

    /// The named restaurant does not exist.
    #[error("unknown restaurant {0}")]
    UnknownRestaurant(RestaurantId),

    /// Coordinates fall outside the grid.
    #[error("position av {av}, ca {ca} is outside the {cols}x{rows} grid")]
    OutOfGrid {
        /// Requested avenue.
        av: u32,
        /// Requested street.
        ca: u32,
        /// Grid avenues.
        cols: u32,
        /// Grid streets.
        rows: u32,
    },

    /// A numeric parameter is out of range.
    #[error("invalid {name}: {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// There is no restaurant to default to.
    #[error("no restaurants on the map")]
    NoRestaurants,
}

/// What an accepted command did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// A new order entered CREATED.
    OrderCreated {
        /// Its id.
        order: OrderId,
        /// Its destination, possibly newly created.
        house: HouseId,
        /// Its restaurant.
        restaurant: RestaurantId,
    },
    /// Sequencing policy changed.
    AlgorithmChanged {
        /// Restaurant changed, `None` for all of them.
        restaurant: Option<RestaurantId>,
        /// New policy.
        algo: KitchenAlgorithm,
    },
    /// Ticks are now skipped.
    Paused,
    /// Ticks run again.
    Resumed,
    /// `commands` should be submitted one after another, staggered.
    StressPlanned {
        /// The `CREATE_ORDER` commands to submit.
        commands: Vec<Command>,
    },
    /// Speed multiplier changed.
    SpeedChanged {
        /// Multiplier before.
        previous: u32,
        /// Multiplier now.
        speed: u32,
    },
}

impl core::fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OrderCreated {
                order,
                house,
                restaurant,
            } => write!(f, "order {order} created: {restaurant} -> {house}"),
            Self::AlgorithmChanged {
                restaurant: Some(restaurant),
                algo,
            } => write!(f, "{restaurant} kitchen algorithm set to {algo}"),
            Self::AlgorithmChanged {
                restaurant: None,
                algo,
            } => write!(f, "kitchen algorithm set to {algo}"),
            Self::Paused => f.write_str("simulation paused"),
            Self::Resumed => f.write_str("simulation resumed"),
            Self::StressPlanned { commands } => {
                write!(f, "stress test: {} orders scheduled", commands.len())
            }
            Self::SpeedChanged { previous, speed } => {
                write!(f, "speed changed from x{previous} to x{speed}")
            }
        }
    }
}

impl Simulator {
    /// Validate and apply one command immediately.
    pub fn apply_command(&mut self, command: &Command) -> Result<CommandOutcome, CommandRejected> {
        let outcome = match command {
            Command::CreateOrder {
                house,
                restaurant,
                prep_s,
            } => self.create_order(house, restaurant.as_ref(), *prep_s)?,
            Command::SetAlgorithm { restaurant, algo } => {
                self.set_algorithm(restaurant.as_ref(), *algo)?
            }
            Command::Pause => {
                self.set_paused(true);
                CommandOutcome::Paused
            }
            Command::Resume => {
                self.set_paused(false);
                CommandOutcome::Resumed
            }
            Command::Stress { n } => self.plan_stress(*n)?,
            Command::SetSpeed { speed } => self.set_speed(*speed)?,
        };
        info!(cmd = command.name(), outcome = %outcome, "Command applied");
        self.note(outcome.to_string());
        self.refresh_derived();
        Ok(outcome)
    }

    fn create_order(
        &mut self,
        house: &HouseRef,
        restaurant: Option<&RestaurantId>,
        prep_s: Option<u32>,
    ) -> Result<CommandOutcome, CommandRejected> {
        let restaurant = match restaurant {
            Some(id) => self
                .world()
                .restaurant(id)
                .map(|r| r.id.clone())
                .ok_or_else(|| CommandRejected::UnknownRestaurant(id.clone()))?,
            None => self
                .world()
                .restaurants
                .first()
                .map(|r| r.id.clone())
                .ok_or(CommandRejected::NoRestaurants)?,
        };

        if let Some(p) = prep_s {
            if p == 0 || p > MAX_PREP_S {
                return Err(CommandRejected::InvalidParameter {
                    name: "prep_s",
                    reason: format!("must be within 1..={MAX_PREP_S}"),
                });
            }
        }

        let order_id = self.next_order_id();
        let (house_id, new_house) = match house {
            HouseRef::Id(id) => {
                if self.world().house(id).is_none() {
                    return Err(CommandRejected::UnknownHouse(id.clone()));
                }
                (id.clone(), None)
            }
            HouseRef::Coords(pos) => {
                let grid = self.world().grid;
                if !grid.contains(*pos) {
                    return Err(CommandRejected::OutOfGrid {
                        av: pos.av,
                        ca: pos.ca,
                        cols: grid.cols,
                        rows: grid.rows,
                    });
                }
                match self.world().house_at(*pos) {
                    Some(existing) => (existing.id.clone(), None),
                    None => {
                        let id = HouseId::new(format!("HM{order_id}"));
                        (
                            id.clone(),
                            Some(House {
                                id,
                                pos: *pos,
                            }),
                        )
                    }
                }
            }
        };

        let prep_s = match prep_s {
            Some(p) => p,
            None => self.random_prep_s(),
        };
        let now = self.clock().now_ms();
        if let Some(house) = new_house {
            self.world_mut().houses.push(house);
        }
        let order = self
            .accept_order(house_id.clone(), restaurant.clone(), prep_s, now)
            .ok_or_else(|| CommandRejected::InvalidParameter {
                name: "id",
                reason: "order ids exhausted".to_owned(),
            })?;

        Ok(CommandOutcome::OrderCreated {
            order,
            house: house_id,
            restaurant,
        })
    }

    fn set_algorithm(
        &mut self,
        restaurant: Option<&RestaurantId>,
        algo: KitchenAlgorithm,
    ) -> Result<CommandOutcome, CommandRejected> {
        match restaurant {
            Some(id) => {
                if !self.kitchens.set_algorithm(id, algo) {
                    return Err(CommandRejected::UnknownRestaurant(id.clone()));
                }
            }
            None => self.kitchens.set_algorithm_all(algo),
        }
        Ok(CommandOutcome::AlgorithmChanged {
            restaurant: restaurant.cloned(),
            algo,
        })
    }

    fn plan_stress(&mut self, n: u32) -> Result<CommandOutcome, CommandRejected> {
        if n == 0 || n > MAX_STRESS {
            return Err(CommandRejected::InvalidParameter {
                name: "n",
                reason: format!("must be within 1..={MAX_STRESS}"),
            });
        }
        if self.world().restaurants.is_empty() {
            return Err(CommandRejected::NoRestaurants);
        }
        let grid = self.world().grid;
        let count = self.world().restaurants.len();
        let mut commands = Vec::new();
        for _ in 0..n {
            let pos = random_cell(grid, &mut self.rng);
            let pick = rand::Rng::random_range(&mut self.rng, 0..count);
            let restaurant = self.world().restaurants.get(pick).map(|r| r.id.clone());
            commands.push(Command::CreateOrder {
                house: HouseRef::Coords(pos),
                restaurant,
                prep_s: None,
            });
        }
        Ok(CommandOutcome::StressPlanned { commands })
    }

    fn set_speed(&mut self, speed: u32) -> Result<CommandOutcome, CommandRejected> {
        if speed == 0 || speed > MAX_SPEED {
            return Err(CommandRejected::InvalidParameter {
                name: "speed",
                reason: format!("must be within 1..={MAX_SPEED}"),
            });
        }
        let previous = self
            .clock_mut()
            .set_speed(speed)
            .map_err(|err| CommandRejected::InvalidParameter {
                name: "speed",
                reason: err.to_string(),
            })?;
        Ok(CommandOutcome::SpeedChanged { previous, speed })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use dispatch_types::{OrderState, Position};

    use super::*;
    use crate::config::SimulationConfig;

    fn sim() -> Simulator {
        let mut config = SimulationConfig::default();
        config.ingestion.auto_order_probability = 0.0;
        Simulator::new(&config).unwrap()
    }

    fn create_at(av: u32, ca: u32, restaurant: &str) -> Command {
        Command::CreateOrder {
            house: HouseRef::Coords(Position::new(av, ca)),
            restaurant: Some(RestaurantId::new(restaurant)),
            prep_s: None,
        }
    }

    #[test]
    fn create_order_reaches_preparing_after_handoff() {
        let mut sim = sim();
        let outcome = sim.apply_command(&create_at(3, 3, "R1")).unwrap();
        let CommandOutcome::OrderCreated { order, .. } = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        assert_eq!(sim.world().order(order).unwrap().state, OrderState::Created);

        // 500 ms hand-off at 200 ms per tick.
        for _ in 0..3 {
            sim.tick().unwrap();
        }
        let preparing: Vec<_> = sim
            .world()
            .orders
            .iter()
            .filter(|o| o.state == OrderState::Preparing)
            .collect();
        assert_eq!(preparing.len(), 1);
        assert_eq!(preparing.first().unwrap().rest, RestaurantId::new("R1"));
    }

    #[test]
    fn coordinates_reuse_or_create_houses() {
        let mut sim = sim();
        let existing = sim.world().houses.first().unwrap().clone();
        let houses_before = sim.world().houses.len();

        let reuse = sim
            .apply_command(&create_at(existing.pos.av, existing.pos.ca, "R2"))
            .unwrap();
        assert!(matches!(reuse, CommandOutcome::OrderCreated { ref house, .. } if *house == existing.id));
        assert_eq!(sim.world().houses.len(), houses_before);

        let free = (1..=8)
            .flat_map(|av| (1..=8).map(move |ca| Position::new(av, ca)))
            .find(|p| sim.world().house_at(*p).is_none())
            .unwrap();
        let created = sim.apply_command(&create_at(free.av, free.ca, "R2")).unwrap();
        let CommandOutcome::OrderCreated { order, house, .. } = created else {
            panic!("unexpected outcome {created:?}");
        };
        assert_eq!(house.as_str(), format!("HM{order}"));
        assert_eq!(sim.world().houses.len(), houses_before + 1);
        assert!(sim.world().check_invariants().is_ok());
    }

    #[test]
    fn rejected_commands_leave_world_untouched() {
        let mut sim = sim();
        let before = sim.world().clone();

        let unknown_rest = sim.apply_command(&create_at(3, 3, "R42"));
        assert_eq!(
            unknown_rest,
            Err(CommandRejected::UnknownRestaurant(RestaurantId::new("R42")))
        );
        let off_grid = sim.apply_command(&create_at(9, 1, "R1"));
        assert!(matches!(off_grid, Err(CommandRejected::OutOfGrid { .. })));
        let unknown_house = sim.apply_command(&Command::CreateOrder {
            house: HouseRef::Id(HouseId::new("H999")),
            restaurant: None,
            prep_s: None,
        });
        assert!(matches!(unknown_house, Err(CommandRejected::UnknownHouse(_))));
        let bad_prep = sim.apply_command(&Command::CreateOrder {
            house: HouseRef::Coords(Position::new(2, 2)),
            restaurant: None,
            prep_s: Some(0),
        });
        assert!(matches!(bad_prep, Err(CommandRejected::InvalidParameter { .. })));

        assert_eq!(sim.world(), &before);
    }

    #[test]
    fn missing_restaurant_defaults_to_first() {
        let mut sim = sim();
        let outcome = sim
            .apply_command(&Command::CreateOrder {
                house: HouseRef::Coords(Position::new(4, 4)),
                restaurant: None,
                prep_s: Some(25),
            })
            .unwrap();
        assert!(matches!(
            outcome,
            CommandOutcome::OrderCreated { ref restaurant, .. } if restaurant.as_str() == "R1"
        ));
    }

    #[test]
    fn pause_and_resume_gate_ticks() {
        let mut sim = sim();
        assert_eq!(sim.apply_command(&Command::Pause).unwrap(), CommandOutcome::Paused);
        assert!(sim.tick().unwrap().is_none());
        assert!(sim.snapshot().metrics.paused);
        sim.apply_command(&Command::Resume).unwrap();
        assert!(sim.tick().unwrap().is_some());
    }

    #[test]
    fn set_algorithm_changes_future_policy() {
        let mut sim = sim();
        sim.apply_command(&Command::SetAlgorithm {
            restaurant: Some(RestaurantId::new("R3")),
            algo: KitchenAlgorithm::FirstComeFirstServed,
        })
        .unwrap();
        let r3 = sim.world().restaurant(&RestaurantId::new("R3")).unwrap();
        assert_eq!(r3.algo, KitchenAlgorithm::FirstComeFirstServed);
        let r1 = sim.world().restaurant(&RestaurantId::new("R1")).unwrap();
        assert_eq!(r1.algo, KitchenAlgorithm::ShortestJobFirst);

        let ghost = sim.apply_command(&Command::SetAlgorithm {
            restaurant: Some(RestaurantId::new("R9")),
            algo: KitchenAlgorithm::FirstComeFirstServed,
        });
        assert!(ghost.is_err());
    }

    #[test]
    fn stress_plans_create_orders() {
        let mut sim = sim();
        let outcome = sim.apply_command(&Command::Stress { n: 30 }).unwrap();
        let CommandOutcome::StressPlanned { commands } = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        assert_eq!(commands.len(), 30);
        assert!(commands.iter().all(|c| c.name() == "CREATE_ORDER"));
        assert!(sim.world().orders.is_empty());
        assert!(sim.apply_command(&Command::Stress { n: 0 }).is_err());
    }

    #[test]
    fn speed_is_bounded() {
        let mut sim = sim();
        assert_eq!(
            sim.apply_command(&Command::SetSpeed { speed: 4 }).unwrap(),
            CommandOutcome::SpeedChanged { previous: 1, speed: 4 }
        );
        assert!(sim.apply_command(&Command::SetSpeed { speed: 0 }).is_err());
        assert_eq!(sim.clock().speed(), 4);
    }

    #[test]
    fn speed_that_would_overflow_the_clock_is_rejected() {
        let mut config = SimulationConfig::default();
        config.ingestion.auto_order_probability = 0.0;
        config.world.tick_interval_ms = u64::MAX / 2;
        let mut sim = Simulator::new(&config).unwrap();

        let rejected = sim.apply_command(&Command::SetSpeed { speed: 3 });
        assert!(matches!(
            rejected,
            Err(CommandRejected::InvalidParameter { name: "speed", .. })
        ));
        assert_eq!(sim.clock().speed(), 1);
        assert!(sim.tick().is_ok());
    }
}
