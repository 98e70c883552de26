//! Operator commands routed from observers to the authority.
//!
//! Commands never originate state; they request transitions that the
//! authority validates before applying.

use serde::{Deserialize, Serialize};

use crate::enums::KitchenAlgorithm;
use crate::ids::{HouseId, RestaurantId};
use crate::structs::Position;

/// Number of orders a `STRESS` command submits when `n` is omitted.
pub const DEFAULT_STRESS_COUNT: u32 = 30;

fn default_stress_count() -> u32 {
    DEFAULT_STRESS_COUNT
}

/// Destination of a `CREATE_ORDER`: an existing house or bare coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HouseRef {
    /// A house that must already exist.
    Id(HouseId),
    /// A grid cell; a house is created there if none exists.
    Coords(Position),
}

/// An operator intent, tagged by its `cmd` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Place a new order.
    CreateOrder {
        /// Destination.
        house: HouseRef,
        /// Preparing restaurant; the first restaurant when omitted.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        restaurant: Option<RestaurantId>,
        /// Preparation time override in seconds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prep_s: Option<u32>,
    },
    /// Change the kitchen sequencing policy for future queue entries.
    #[serde(alias = "SET_KITCHEN_ALGO")]
    SetAlgorithm {
        /// Restaurant to change; every restaurant when omitted.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        restaurant: Option<RestaurantId>,
        /// New policy.
        #[serde(alias = "algorithm")]
        algo: KitchenAlgorithm,
    },
    /// Freeze tick advancement.
    Pause,
    /// Unfreeze tick advancement.
    Resume,
    /// Submit `n` staggered `CREATE_ORDER` commands.
    Stress {
        /// Number of orders.
        #[serde(default = "default_stress_count")]
        n: u32,
    },
    /// Change the simulated-time multiplier.
    SetSpeed {
        /// New multiplier, at least 1.
        speed: u32,
    },
}

impl Command {
    /// Wire name of the command.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateOrder { .. } => "CREATE_ORDER",
            Self::SetAlgorithm { .. } => "SET_ALGORITHM",
            Self::Pause => "PAUSE",
            Self::Resume => "RESUME",
            Self::Stress { .. } => "STRESS",
            Self::SetSpeed { .. } => "SET_SPEED",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn create_order_accepts_coordinates_or_ids() {
        let by_coords: Command =
            serde_json::from_str(r#"{"cmd":"CREATE_ORDER","house":{"av":3,"ca":3},"restaurant":"R1"}"#)
                .unwrap();
        assert_eq!(
            by_coords,
            Command::CreateOrder {
                house: HouseRef::Coords(Position::new(3, 3)),
                restaurant: Some(RestaurantId::new("R1")),
                prep_s: None,
            }
        );

        let by_id: Command = serde_json::from_str(r#"{"cmd":"CREATE_ORDER","house":"H2"}"#).unwrap();
        assert!(matches!(
            by_id,
            Command::CreateOrder { house: HouseRef::Id(_), restaurant: None, .. }
        ));
    }

    #[test]
    fn kitchen_algo_alias_is_accepted() {
        let cmd: Command = serde_json::from_str(r#"{"cmd":"SET_KITCHEN_ALGO","algo":"FCFS"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::SetAlgorithm {
                restaurant: None,
                algo: KitchenAlgorithm::FirstComeFirstServed,
            }
        );
        assert_eq!(cmd.name(), "SET_ALGORITHM");
    }

    #[test]
    fn stress_defaults_to_thirty() {
        let cmd: Command = serde_json::from_str(r#"{"cmd":"STRESS"}"#).unwrap();
        assert_eq!(cmd, Command::Stress { n: 30 });
    }

    #[test]
    fn unit_commands_serialize_with_tag_only() {
        assert_eq!(serde_json::to_string(&Command::Pause).unwrap(), r#"{"cmd":"PAUSE"}"#);
    }

    #[test]
    fn unknown_command_is_an_error() {
        assert!(serde_json::from_str::<Command>(r#"{"cmd":"SELF_DESTRUCT"}"#).is_err());
    }
}
