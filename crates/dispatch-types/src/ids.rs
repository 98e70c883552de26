//! Type-safe identifier wrappers.
//!
//! Restaurants, houses, and drivers are named by short human-readable
//! labels (`R1`, `H7`, `M2`) that the display clients print verbatim, so
//! their IDs wrap a [`String`]. Orders are numbered: the authority hands
//! out ids from a monotonically increasing counter and never reuses one.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Generates a newtype wrapper around [`String`] with standard derives.
macro_rules! define_label_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub String);

        impl $name {
            /// Create an identifier from any string-like label.
            pub fn new(label: impl Into<String>) -> Self {
                Self(label.into())
            }

            /// Borrow the label as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(label: &str) -> Self {
                Self(label.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(label: String) -> Self {
                Self(label)
            }
        }
    };
}

define_label_id! {
    /// Unique identifier for a restaurant (e.g. `R1`).
    RestaurantId
}

define_label_id! {
    /// Unique identifier for a house (e.g. `H3`, or `HM104` for ad-hoc houses).
    HouseId
}

define_label_id! {
    /// Unique identifier for a driver (e.g. `M1`).
    DriverId
}

/// Unique, monotonically assigned order number.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[ts(export, export_to = "bindings/")]
pub struct OrderId(pub u64);

impl OrderId {
    /// Return the raw order number.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Return the id that follows this one, or `None` on overflow.
    pub const fn successor(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(next) => Some(Self(next)),
            None => None,
        }
    }
}

impl core::fmt::Display for OrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for OrderId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}
