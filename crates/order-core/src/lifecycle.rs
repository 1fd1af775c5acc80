//! Order lifecycle engine.
//!
//! Orders move forward through created -> shipped -> completed. There are no
//! reverse transitions and no re-entry into a state. The functions here are
//! pure: they return the updated order and leave persistence to the caller.

use chrono::{DateTime, Utc};
use order_types::{Order, OrderStatus, OrderTransition};
use thiserror::Error;

/// Errors raised when a requested status change is not allowed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
	#[error("Invalid transition for order {order_id} from {from} to {to}")]
	InvalidTransition {
		order_id: u64,
		from: OrderStatus,
		to: OrderStatus,
	},
	#[error("Invalid status: {0}")]
	InvalidStatus(String),
}

/// Applies the transition named by `requested_status` at the current time.
///
/// `requested_status` must be `"shipped"` or `"completed"`; anything else is
/// rejected with [`LifecycleError::InvalidStatus`].
pub fn apply_transition(order: &Order, requested_status: &str) -> Result<Order, LifecycleError> {
	let transition = requested_status
		.parse::<OrderTransition>()
		.map_err(|e| LifecycleError::InvalidStatus(e.0))?;
	apply_transition_at(order, transition, Utc::now())
}

/// Applies `transition` as if it happened at `now`.
///
/// The recorded timestamp never precedes the one before it, so a clock that
/// steps backwards cannot produce `completed_at < shipped_at`.
pub fn apply_transition_at(
	order: &Order,
	transition: OrderTransition,
	now: DateTime<Utc>,
) -> Result<Order, LifecycleError> {
	let from = order.status();
	let to = transition.target();
	if !is_valid_transition(from, to) {
		return Err(LifecycleError::InvalidTransition {
			order_id: order.order_id,
			from,
			to,
		});
	}

	let mut updated = order.clone();
	match transition {
		OrderTransition::Ship => {
			updated.shipped_at = Some(now.max(order.created_at));
		}
		OrderTransition::Complete => {
			// is_valid_transition guarantees shipped_at is set
			let shipped_at = order.shipped_at.unwrap_or(order.created_at);
			updated.completed_at = Some(now.max(shipped_at));
		}
	}
	Ok(updated)
}

/// Checks if a state transition is valid.
fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
	matches!(
		(from, to),
		(OrderStatus::Created, OrderStatus::Shipped) | (OrderStatus::Shipped, OrderStatus::Completed)
	)
}
