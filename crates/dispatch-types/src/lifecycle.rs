//! Order life-cycle state machine.
//!
//! `CREATED -> PREPARING -> READY -> SEARCHING_DRIVER -> EN_ROUTE -> DELIVERED`.
//! No back-transitions. The authority moves an order exactly one step at a
//! time with [`Order::advance`]; observers replaying events use
//! [`Order::fast_forward`], which may skip states a lost event would have
//! visited but never goes backward.

use crate::enums::OrderState;
use crate::ids::OrderId;
use crate::structs::Order;

/// Every state in visiting order.
pub const ORDER_STATES: [OrderState; 6] = [
    OrderState::Created,
    OrderState::Preparing,
    OrderState::Ready,
    OrderState::SearchingDriver,
    OrderState::EnRoute,
    OrderState::Delivered,
];

/// A transition the state machine does not permit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    /// The requested state is not reachable from the current one.
    #[error("order {order} cannot move from {from} to {to}")]
    IllegalTransition {
        /// The order.
        order: OrderId,
        /// Its current state.
        from: OrderState,
        /// The requested state.
        to: OrderState,
    },
}

impl OrderState {
    /// Position in the life cycle, 0 for CREATED.
    pub const fn rank(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Preparing => 1,
            Self::Ready => 2,
            Self::SearchingDriver => 3,
            Self::EnRoute => 4,
            Self::Delivered => 5,
        }
    }

    /// The single next state, `None` for DELIVERED.
    pub const fn successor(self) -> Option<Self> {
        match self {
            Self::Created => Some(Self::Preparing),
            Self::Preparing => Some(Self::Ready),
            Self::Ready => Some(Self::SearchingDriver),
            Self::SearchingDriver => Some(Self::EnRoute),
            Self::EnRoute => Some(Self::Delivered),
            Self::Delivered => None,
        }
    }

    /// Whether no further transition exists.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered)
    }

    /// Whether `to` is the immediate successor of `self`.
    pub const fn can_advance_to(self, to: Self) -> bool {
        match self.successor() {
            Some(next) => next.rank() == to.rank(),
            None => false,
        }
    }
}

impl Order {
    /// Moves the order exactly one step forward to `to`.
    pub fn advance(&mut self, to: OrderState) -> Result<(), LifecycleError> {
        if !self.state.can_advance_to(to) {
            return Err(self.illegal(to));
        }
        self.state = to;
        Ok(())
    }

    /// Moves the order forward to `to`, skipping intermediate states if
    /// needed. Returns `Ok(false)` when the order is already at `to`.
    pub fn fast_forward(&mut self, to: OrderState) -> Result<bool, LifecycleError> {
        match to.rank().cmp(&self.state.rank()) {
            core::cmp::Ordering::Less => Err(self.illegal(to)),
            core::cmp::Ordering::Equal => Ok(false),
            core::cmp::Ordering::Greater => {
                self.state = to;
                Ok(true)
            }
        }
    }

    const fn illegal(&self, to: OrderState) -> LifecycleError {
        LifecycleError::IllegalTransition {
            order: self.id,
            from: self.state,
            to,
        }
    }
}
