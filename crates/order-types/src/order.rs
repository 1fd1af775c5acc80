//! Order entity types.
//!
//! An [`Order`] is persisted as a self-describing JSON record. Field names are
//! part of the stored format and of the HTTP wire shape, so they must not be
//! renamed without migrating existing records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Errors reported when an order violates one of its invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderValidationError {
	#[error("Order ID must be non-zero")]
	MissingId,
	#[error("Line item {index}: {message}")]
	InvalidLineItem { index: usize, message: String },
	#[error("Order {0} is completed but was never shipped")]
	CompletedWithoutShipping(u64),
	#[error("Order {0} has a timestamp earlier than the one preceding it")]
	TimestampOrder(u64),
}

/// A customer order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
	/// Identifier assigned at creation. Zero is reserved as "unset".
	pub order_id: u64,
	/// Customer that placed the order.
	pub customer_id: Uuid,
	/// Items in the order, in the order the customer supplied them.
	#[serde(default)]
	pub line_items: Vec<LineItem>,
	/// Creation time. Never mutated after insert.
	pub created_at: DateTime<Utc>,
	/// Set when the order ships.
	pub shipped_at: Option<DateTime<Utc>>,
	/// Set when the order completes. Requires `shipped_at`.
	pub completed_at: Option<DateTime<Utc>>,
}

/// A single entry of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
	pub item_id: String,
	pub quantity: u32,
	pub price: Decimal,
}

impl Order {
	/// Creates a freshly placed order with no lifecycle timestamps.
	pub fn new(
		order_id: u64,
		customer_id: Uuid,
		line_items: Vec<LineItem>,
		created_at: DateTime<Utc>,
	) -> Self {
		Self {
			order_id,
			customer_id,
			line_items,
			created_at,
			shipped_at: None,
			completed_at: None,
		}
	}

	/// Returns the lifecycle position derived from the timestamps.
	pub fn status(&self) -> OrderStatus {
		match (self.shipped_at, self.completed_at) {
			(_, Some(_)) => OrderStatus::Completed,
			(Some(_), None) => OrderStatus::Shipped,
			(None, None) => OrderStatus::Created,
		}
	}

	/// Checks the entity invariants.
	///
	/// A completed order must have shipped, and lifecycle timestamps must not
	/// run backwards (`created_at <= shipped_at <= completed_at`).
	pub fn validate(&self) -> Result<(), OrderValidationError> {
		if self.order_id == 0 {
			return Err(OrderValidationError::MissingId);
		}

		for (index, item) in self.line_items.iter().enumerate() {
			item.validate()
				.map_err(|message| OrderValidationError::InvalidLineItem { index, message })?;
		}

		match (self.shipped_at, self.completed_at) {
			(None, Some(_)) => {
				return Err(OrderValidationError::CompletedWithoutShipping(
					self.order_id,
				))
			}
			(Some(shipped), completed) => {
				if shipped < self.created_at || completed.is_some_and(|c| c < shipped) {
					return Err(OrderValidationError::TimestampOrder(self.order_id));
				}
			}
			(None, None) => {}
		}

		Ok(())
	}
}

impl LineItem {
	fn validate(&self) -> Result<(), String> {
		if self.item_id.is_empty() {
			return Err("item_id cannot be empty".into());
		}
		if self.quantity == 0 {
			return Err("quantity must be at least 1".into());
		}
		if self.price < Decimal::ZERO {
			return Err(format!("price {} is negative", self.price));
		}
		Ok(())
	}
}

/// Lifecycle position of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
	Created,
	Shipped,
	Completed,
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			OrderStatus::Created => "created",
			OrderStatus::Shipped => "shipped",
			OrderStatus::Completed => "completed",
		};
		f.write_str(s)
	}
}

/// A status change a caller may request on an existing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderTransition {
	Ship,
	Complete,
}

impl OrderTransition {
	/// The status an order holds after this transition.
	pub fn target(&self) -> OrderStatus {
		match self {
			OrderTransition::Ship => OrderStatus::Shipped,
			OrderTransition::Complete => OrderStatus::Completed,
		}
	}
}

/// Error returned when a requested status is not a known transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown order status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for OrderTransition {
	type Err = UnknownStatus;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"shipped" => Ok(Self::Ship),
			"completed" => Ok(Self::Complete),
			other => Err(UnknownStatus(other.to_string())),
		}
	}
}
