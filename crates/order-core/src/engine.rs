//! Order engine.
//!
//! Ties the repository to an ID source. This is the layer the HTTP handlers
//! talk to: it owns ID assignment on create and hands every other operation
//! through to the repository.

use crate::id::IdGenerator;
use crate::repository::{FindAllPage, FindResult, OrderRepository, RepositoryError};
use chrono::Utc;
use order_types::{LineItem, Order};
use std::sync::Arc;
use uuid::Uuid;

/// Entry point for order operations.
pub struct OrderEngine {
	repository: Arc<OrderRepository>,
	ids: Arc<dyn IdGenerator>,
	max_id_attempts: u32,
}

impl OrderEngine {
	pub fn new(
		repository: Arc<OrderRepository>,
		ids: Arc<dyn IdGenerator>,
		max_id_attempts: u32,
	) -> Self {
		Self {
			repository,
			ids,
			max_id_attempts: max_id_attempts.max(1),
		}
	}

	/// Returns the underlying repository.
	pub fn repository(&self) -> &Arc<OrderRepository> {
		&self.repository
	}

	/// Creates a new order with a freshly drawn ID.
	///
	/// A drawn ID that is already taken is replaced by another draw, up to
	/// `max_id_attempts` draws in total. When every draw collides the last
	/// [`RepositoryError::Conflict`] is returned.
	pub async fn create(
		&self,
		customer_id: Uuid,
		line_items: Vec<LineItem>,
	) -> Result<Order, RepositoryError> {
		let created_at = Utc::now();
		let mut attempt = 0;
		loop {
			attempt += 1;
			let order = Order::new(self.ids.next_id(), customer_id, line_items.clone(), created_at);
			match self.repository.insert(&order).await {
				Ok(()) => return Ok(order),
				Err(RepositoryError::Conflict(id)) if attempt < self.max_id_attempts => {
					tracing::warn!(order_id = id, attempt, "Order ID collision, drawing a new one");
				}
				Err(e) => return Err(e),
			}
		}
	}

	pub async fn get(&self, id: u64) -> Result<Order, RepositoryError> {
		self.repository.find_by_id(id).await
	}

	pub async fn list(&self, page: FindAllPage) -> Result<FindResult, RepositoryError> {
		self.repository.find_all(page).await
	}

	/// Moves an order to the requested status.
	pub async fn update_status(&self, id: u64, status: &str) -> Result<Order, RepositoryError> {
		self.repository.transition(id, status).await
	}

	pub async fn delete(&self, id: u64) -> Result<(), RepositoryError> {
		self.repository.delete_by_id(id).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::id::SequentialIdGenerator;
	use order_storage::implementations::memory::MemoryStorage;
	use order_storage::StorageService;
	use order_types::OrderStatus;
	use std::time::Duration;

	/// Repeats one ID forever.
	struct FixedIds(u64);

	impl IdGenerator for FixedIds {
		fn next_id(&self) -> u64 {
			self.0
		}
	}

	fn engine(ids: Arc<dyn IdGenerator>, attempts: u32) -> OrderEngine {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let repository = Arc::new(OrderRepository::new(storage, Duration::from_secs(5)));
		OrderEngine::new(repository, ids, attempts)
	}

	#[tokio::test]
	async fn test_create_assigns_ids() {
		let engine = engine(Arc::new(SequentialIdGenerator::new(100)), 3);
		let customer = Uuid::new_v4();

		let first = engine.create(customer, vec![]).await.unwrap();
		let second = engine.create(customer, vec![]).await.unwrap();
		assert_eq!(first.order_id, 100);
		assert_eq!(second.order_id, 101);
		assert_eq!(first.status(), OrderStatus::Created);
		assert_eq!(engine.get(100).await.unwrap(), first);
	}

	#[tokio::test]
	async fn test_create_retries_on_collision() {
		let ids = Arc::new(SequentialIdGenerator::new(1));
		let engine = engine(ids, 3);
		// occupy the next two IDs behind the generator's back
		for id in [1, 2] {
			let order = Order::new(id, Uuid::new_v4(), vec![], Utc::now());
			engine.repository().insert(&order).await.unwrap();
		}

		let created = engine.create(Uuid::new_v4(), vec![]).await.unwrap();
		assert_eq!(created.order_id, 3);
	}

	#[tokio::test]
	async fn test_create_gives_up_after_max_attempts() {
		let engine = engine(Arc::new(FixedIds(9)), 2);
		engine.create(Uuid::new_v4(), vec![]).await.unwrap();

		let result = engine.create(Uuid::new_v4(), vec![]).await;
		assert!(matches!(result, Err(RepositoryError::Conflict(9))));
	}

	#[tokio::test]
	async fn test_full_lifecycle() {
		let engine = engine(Arc::new(SequentialIdGenerator::default()), 3);
		let order = engine.create(Uuid::new_v4(), vec![]).await.unwrap();

		engine.update_status(order.order_id, "shipped").await.unwrap();
		let done = engine
			.update_status(order.order_id, "completed")
			.await
			.unwrap();
		assert!(done.shipped_at.is_some());
		assert!(done.completed_at.is_some());

		engine.delete(order.order_id).await.unwrap();
		let page = engine
			.list(FindAllPage {
				size: 10,
				offset: 0,
			})
			.await
			.unwrap();
		assert!(page.orders.is_empty());
	}
}
