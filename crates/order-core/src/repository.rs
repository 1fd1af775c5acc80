//! Order repository.
//!
//! Persists orders as JSON records under `order:<id>` in the key-value store.
//! The key namespace doubles as the enumeration index: a single conditional
//! write makes an order visible to point lookups and to listing at the same
//! time, so there is no window in which one sees an order the other misses.
//!
//! Every store call runs under the configured deadline. The repository holds
//! no locks and keeps no state between calls.

use crate::lifecycle::{self, LifecycleError};
use order_storage::{StorageError, StorageService};
use order_types::{Order, StorageKey};
use std::collections::BTreeSet;
use std::future::Future;
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
	#[error("Order {0} not found")]
	NotFound(u64),
	#[error("Order {0} already exists")]
	Conflict(u64),
	#[error("Invalid order: {0}")]
	InvalidOrder(String),
	#[error("Invalid page: {0}")]
	InvalidPage(String),
	#[error(transparent)]
	Lifecycle(#[from] LifecycleError),
	#[error("Store unavailable: {0}")]
	StoreUnavailable(String),
	#[error("Failed to decode order: {0}")]
	DecodeError(String),
}

impl RepositoryError {
	/// Maps a storage error raised while working on order `id`.
	fn from_storage(id: u64, err: StorageError) -> Self {
		match err {
			StorageError::NotFound => RepositoryError::NotFound(id),
			StorageError::AlreadyExists => RepositoryError::Conflict(id),
			StorageError::Serialization(msg) | StorageError::Corrupted(msg) => {
				RepositoryError::DecodeError(format!("order {}: {}", id, msg))
			}
			StorageError::Backend(msg) | StorageError::Configuration(msg) => {
				RepositoryError::StoreUnavailable(msg)
			}
		}
	}
}

/// Page request for [`OrderRepository::find_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FindAllPage {
	/// Maximum number of orders to return. Must be positive.
	pub size: usize,
	/// Only orders with an ID strictly greater than this are returned.
	/// Zero starts from the beginning.
	pub offset: u64,
}

/// One page of orders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindResult {
	/// Orders in ascending ID order.
	pub orders: Vec<Order>,
	/// Offset for the next page. `None` when this page was not full.
	pub cursor: Option<u64>,
}

/// Repository over the key-value store for orders.
pub struct OrderRepository {
	storage: Arc<StorageService>,
	operation_timeout: Duration,
}

impl OrderRepository {
	pub fn new(storage: Arc<StorageService>, operation_timeout: Duration) -> Self {
		Self {
			storage,
			operation_timeout,
		}
	}

	/// Runs one store call under the per-call deadline.
	async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T, StorageError>
	where
		F: Future<Output = Result<T, StorageError>>,
	{
		match tokio::time::timeout(self.operation_timeout, fut).await {
			Ok(result) => result,
			Err(_) => Err(StorageError::Backend(format!(
				"{} timed out after {}ms",
				op,
				self.operation_timeout.as_millis()
			))),
		}
	}

	/// Persists a new order.
	///
	/// The order must carry a non-zero ID, no lifecycle timestamps and valid
	/// line items. An existing record under the same ID is never overwritten;
	/// the call fails with [`RepositoryError::Conflict`] instead.
	pub async fn insert(&self, order: &Order) -> Result<(), RepositoryError> {
		if order.shipped_at.is_some() || order.completed_at.is_some() {
			return Err(RepositoryError::InvalidOrder(
				"new orders must not be shipped or completed".into(),
			));
		}
		order
			.validate()
			.map_err(|e| RepositoryError::InvalidOrder(e.to_string()))?;

		let id = order.order_id;
		self.bounded(
			"insert",
			self.storage
				.store_new(StorageKey::Orders.as_str(), &id.to_string(), order),
		)
		.await
		.map_err(|e| RepositoryError::from_storage(id, e))?;

		tracing::info!(order_id = id, "Order inserted");
		Ok(())
	}

	/// Loads a single order.
	pub async fn find_by_id(&self, id: u64) -> Result<Order, RepositoryError> {
		let order: Order = self
			.bounded(
				"find",
				self.storage
					.retrieve(StorageKey::Orders.as_str(), &id.to_string()),
			)
			.await
			.map_err(|e| RepositoryError::from_storage(id, e))?;

		if order.order_id != id {
			return Err(RepositoryError::DecodeError(format!(
				"record under order {} carries id {}",
				id, order.order_id
			)));
		}
		tracing::debug!(order_id = id, "Order loaded");
		Ok(order)
	}

	/// Lists orders in ascending ID order, one page at a time.
	///
	/// Pass the returned cursor as the next `offset` to continue. Orders
	/// deleted while a page is being assembled are skipped; orders inserted
	/// with an ID above the current offset show up on a later page.
	pub async fn find_all(&self, page: FindAllPage) -> Result<FindResult, RepositoryError> {
		if page.size == 0 {
			return Err(RepositoryError::InvalidPage(
				"page size must be positive".into(),
			));
		}

		let raw_ids = self
			.bounded(
				"enumerate",
				self.storage.list_ids(StorageKey::Orders.as_str()),
			)
			.await
			.map_err(|e| RepositoryError::StoreUnavailable(e.to_string()))?;

		let mut ids = BTreeSet::new();
		for raw in raw_ids {
			match raw.parse::<u64>() {
				Ok(id) if id != 0 && id.to_string() == raw => {
					ids.insert(id);
				}
				_ => tracing::warn!(key = %raw, "Skipping non-order key in order namespace"),
			}
		}

		let mut orders = Vec::with_capacity(page.size);
		for id in ids.range((Bound::Excluded(page.offset), Bound::Unbounded)) {
			if orders.len() == page.size {
				break;
			}
			match self.find_by_id(*id).await {
				Ok(order) => orders.push(order),
				Err(RepositoryError::NotFound(_)) => {
					tracing::debug!(order_id = *id, "Order deleted during listing");
				}
				Err(e) => return Err(e),
			}
		}

		let cursor = if orders.len() == page.size {
			orders.last().map(|o| o.order_id)
		} else {
			None
		};
		Ok(FindResult { orders, cursor })
	}

	/// Replaces an existing order.
	///
	/// Concurrent updates to the same order are not serialized: the last
	/// write wins. The write only succeeds while the record exists, so a
	/// deleted order is never brought back.
	pub async fn update_by_id(&self, order: &Order) -> Result<(), RepositoryError> {
		order
			.validate()
			.map_err(|e| RepositoryError::InvalidOrder(e.to_string()))?;

		let id = order.order_id;
		self.bounded(
			"update",
			self.storage
				.update(StorageKey::Orders.as_str(), &id.to_string(), order),
		)
		.await
		.map_err(|e| RepositoryError::from_storage(id, e))?;

		tracing::info!(order_id = id, status = %order.status(), "Order updated");
		Ok(())
	}

	/// Deletes an order. Deleting a missing order fails with `NotFound`.
	pub async fn delete_by_id(&self, id: u64) -> Result<(), RepositoryError> {
		self.bounded(
			"delete",
			self.storage
				.remove(StorageKey::Orders.as_str(), &id.to_string()),
		)
		.await
		.map_err(|e| RepositoryError::from_storage(id, e))?;

		tracing::info!(order_id = id, "Order deleted");
		Ok(())
	}

	/// Moves an order to `requested_status` and persists the result.
	pub async fn transition(
		&self,
		id: u64,
		requested_status: &str,
	) -> Result<Order, RepositoryError> {
		let current = self.find_by_id(id).await?;
		let updated = lifecycle::apply_transition(&current, requested_status)?;
		self.update_by_id(&updated).await?;
		Ok(updated)
	}

	pub async fn ship(&self, id: u64) -> Result<Order, RepositoryError> {
		self.transition(id, "shipped").await
	}

	pub async fn complete(&self, id: u64) -> Result<Order, RepositoryError> {
		self.transition(id, "completed").await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use chrono::Utc;
	use order_storage::implementations::memory::{MemoryStorage, MemoryStorageSchema};
	use order_storage::StorageInterface;
	use order_types::{ConfigSchema, LineItem, OrderStatus};
	use rust_decimal::Decimal;
	use uuid::Uuid;

	fn repository() -> (OrderRepository, Arc<StorageService>) {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		(
			OrderRepository::new(storage.clone(), Duration::from_secs(5)),
			storage,
		)
	}

	fn order(id: u64) -> Order {
		Order::new(
			id,
			Uuid::new_v4(),
			vec![LineItem {
				item_id: format!("sku-{}", id),
				quantity: 1,
				price: Decimal::new(250, 2),
			}],
			Utc::now(),
		)
	}

	#[tokio::test]
	async fn test_insert_then_find() {
		let (repo, _) = repository();
		let original = order(11);
		repo.insert(&original).await.unwrap();

		let loaded = repo.find_by_id(11).await.unwrap();
		assert_eq!(loaded, original);
	}

	#[tokio::test]
	async fn test_insert_rejects_existing_id() {
		let (repo, _) = repository();
		let first = order(3);
		repo.insert(&first).await.unwrap();

		let result = repo.insert(&order(3)).await;
		assert!(matches!(result, Err(RepositoryError::Conflict(3))));
		assert_eq!(repo.find_by_id(3).await.unwrap(), first);
	}

	#[tokio::test]
	async fn test_insert_rejects_invalid_orders() {
		let (repo, _) = repository();

		let result = repo.insert(&order(0)).await;
		assert!(matches!(result, Err(RepositoryError::InvalidOrder(_))));

		let mut shipped = order(4);
		shipped.shipped_at = Some(Utc::now());
		let result = repo.insert(&shipped).await;
		assert!(matches!(result, Err(RepositoryError::InvalidOrder(_))));

		let mut bad_item = order(5);
		bad_item.line_items[0].quantity = 0;
		let result = repo.insert(&bad_item).await;
		assert!(matches!(result, Err(RepositoryError::InvalidOrder(_))));

		let page = repo
			.find_all(FindAllPage {
				size: 10,
				offset: 0,
			})
			.await
			.unwrap();
		assert!(page.orders.is_empty());
	}

	#[tokio::test]
	async fn test_find_missing() {
		let (repo, _) = repository();
		let result = repo.find_by_id(99).await;
		assert!(matches!(result, Err(RepositoryError::NotFound(99))));
	}

	#[tokio::test]
	async fn test_delete_twice() {
		let (repo, _) = repository();
		repo.insert(&order(8)).await.unwrap();

		repo.delete_by_id(8).await.unwrap();
		assert!(matches!(
			repo.find_by_id(8).await,
			Err(RepositoryError::NotFound(8))
		));
		assert!(matches!(
			repo.delete_by_id(8).await,
			Err(RepositoryError::NotFound(8))
		));
	}

	#[tokio::test]
	async fn test_update_does_not_resurrect() {
		let (repo, _) = repository();
		let original = order(21);
		repo.insert(&original).await.unwrap();
		repo.delete_by_id(21).await.unwrap();

		let result = repo.update_by_id(&original).await;
		assert!(matches!(result, Err(RepositoryError::NotFound(21))));
		assert!(repo.find_by_id(21).await.is_err());
	}

	#[tokio::test]
	async fn test_update_validates() {
		let (repo, _) = repository();
		let mut original = order(22);
		repo.insert(&original).await.unwrap();

		original.completed_at = Some(Utc::now());
		let result = repo.update_by_id(&original).await;
		assert!(matches!(result, Err(RepositoryError::InvalidOrder(_))));
	}

	#[tokio::test]
	async fn test_pagination_visits_each_order_once() {
		let (repo, _) = repository();
		let ids: Vec<u64> = vec![40, 3, 17, 9, 1, 28, 5];
		for id in &ids {
			repo.insert(&order(*id)).await.unwrap();
		}

		let mut seen = Vec::new();
		let mut offset = 0;
		let mut pages = 0;
		loop {
			let page = repo.find_all(FindAllPage { size: 3, offset }).await.unwrap();
			pages += 1;
			seen.extend(page.orders.iter().map(|o| o.order_id));
			match page.cursor {
				Some(next) => offset = next,
				None => break,
			}
		}

		let mut expected = ids.clone();
		expected.sort();
		assert_eq!(seen, expected);
		assert_eq!(pages, 3);
	}

	#[tokio::test]
	async fn test_exact_multiple_ends_with_empty_page() {
		let (repo, _) = repository();
		for id in 1..=4 {
			repo.insert(&order(id)).await.unwrap();
		}

		let first = repo
			.find_all(FindAllPage { size: 2, offset: 0 })
			.await
			.unwrap();
		assert_eq!(first.cursor, Some(2));
		let second = repo
			.find_all(FindAllPage { size: 2, offset: 2 })
			.await
			.unwrap();
		assert_eq!(second.cursor, Some(4));
		let last = repo
			.find_all(FindAllPage { size: 2, offset: 4 })
			.await
			.unwrap();
		assert!(last.orders.is_empty());
		assert_eq!(last.cursor, None);
	}

	#[tokio::test]
	async fn test_zero_page_size() {
		let (repo, _) = repository();
		let result = repo.find_all(FindAllPage { size: 0, offset: 0 }).await;
		assert!(matches!(result, Err(RepositoryError::InvalidPage(_))));
	}

	#[tokio::test]
	async fn test_paging_with_concurrent_changes() {
		let (repo, _) = repository();
		for id in 1..=6 {
			repo.insert(&order(id * 10)).await.unwrap();
		}

		let first = repo
			.find_all(FindAllPage { size: 2, offset: 0 })
			.await
			.unwrap();
		assert_eq!(first.cursor, Some(20));

		repo.delete_by_id(30).await.unwrap();
		repo.insert(&order(15)).await.unwrap();
		repo.insert(&order(70)).await.unwrap();

		let mut seen: Vec<u64> = first.orders.iter().map(|o| o.order_id).collect();
		let mut offset = first.cursor;
		while let Some(next) = offset {
			let page = repo
				.find_all(FindAllPage {
					size: 2,
					offset: next,
				})
				.await
				.unwrap();
			seen.extend(page.orders.iter().map(|o| o.order_id));
			offset = page.cursor;
		}

		// 15 landed behind the cursor, 30 vanished, 70 is picked up
		assert_eq!(seen, vec![10, 20, 40, 50, 60, 70]);
	}

	#[tokio::test]
	async fn test_listing_skips_foreign_keys() {
		let (repo, storage) = repository();
		repo.insert(&order(2)).await.unwrap();
		storage.store("order", "abc", &order(3)).await.unwrap();
		storage.store("order", "007", &order(7)).await.unwrap();
		storage.store("order", "0", &order(1)).await.unwrap();

		let page = repo
			.find_all(FindAllPage {
				size: 10,
				offset: 0,
			})
			.await
			.unwrap();
		let ids: Vec<u64> = page.orders.iter().map(|o| o.order_id).collect();
		assert_eq!(ids, vec![2]);
	}

	#[tokio::test]
	async fn test_undecodable_record() {
		let (repo, storage) = repository();
		storage.store("order", "5", &"garbage").await.unwrap();

		assert!(matches!(
			repo.find_by_id(5).await,
			Err(RepositoryError::DecodeError(_))
		));
		assert!(matches!(
			repo.find_all(FindAllPage {
				size: 10,
				offset: 0
			})
			.await,
			Err(RepositoryError::DecodeError(_))
		));
	}

	#[tokio::test]
	async fn test_record_under_wrong_key() {
		let (repo, storage) = repository();
		storage.store("order", "6", &order(60)).await.unwrap();

		assert!(matches!(
			repo.find_by_id(6).await,
			Err(RepositoryError::DecodeError(_))
		));
	}

	#[tokio::test]
	async fn test_ship_then_complete() {
		let (repo, _) = repository();
		repo.insert(&Order::new(12, Uuid::new_v4(), vec![], Utc::now()))
			.await
			.unwrap();

		let shipped = repo.ship(12).await.unwrap();
		assert_eq!(shipped.status(), OrderStatus::Shipped);

		let completed = repo.complete(12).await.unwrap();
		let stored = repo.find_by_id(12).await.unwrap();
		assert_eq!(stored, completed);
		assert!(stored.shipped_at.is_some());
		assert!(stored.completed_at >= stored.shipped_at);
	}

	#[tokio::test]
	async fn test_invalid_transitions_leave_order_untouched() {
		let (repo, _) = repository();
		let original = order(13);
		repo.insert(&original).await.unwrap();

		let result = repo.complete(13).await;
		assert!(matches!(
			result,
			Err(RepositoryError::Lifecycle(
				LifecycleError::InvalidTransition { .. }
			))
		));
		let result = repo.transition(13, "cancelled").await;
		assert!(matches!(
			result,
			Err(RepositoryError::Lifecycle(LifecycleError::InvalidStatus(_)))
		));
		assert_eq!(repo.find_by_id(13).await.unwrap(), original);

		assert!(matches!(
			repo.ship(404).await,
			Err(RepositoryError::NotFound(404))
		));
	}

	#[tokio::test]
	async fn test_cursor_at_largest_id() {
		let (repo, _) = repository();
		repo.insert(&order(u64::MAX)).await.unwrap();

		let first = repo
			.find_all(FindAllPage { size: 1, offset: 0 })
			.await
			.unwrap();
		assert_eq!(first.cursor, Some(u64::MAX));

		let next = repo
			.find_all(FindAllPage {
				size: 1,
				offset: u64::MAX,
			})
			.await
			.unwrap();
		assert!(next.orders.is_empty());
		assert_eq!(next.cursor, None);
	}

	#[tokio::test]
	async fn test_insert_that_misses_its_deadline_is_not_stored() {
		use fs2::FileExt;
		use order_storage::implementations::file::FileStorage;

		let dir = tempfile::tempdir().unwrap();
		let storage = Arc::new(StorageService::new(Box::new(FileStorage::new(
			dir.path().to_path_buf(),
		))));
		let repo = OrderRepository::new(storage, Duration::from_millis(100));

		// another writer sits on the directory lock past the deadline
		let lock = std::fs::OpenOptions::new()
			.create(true)
			.read(true)
			.write(true)
			.truncate(false)
			.open(dir.path().join(".lock"))
			.unwrap();
		lock.lock_exclusive().unwrap();

		let result = repo.insert(&order(5)).await;
		assert!(matches!(result, Err(RepositoryError::StoreUnavailable(_))));

		FileExt::unlock(&lock).unwrap();
		drop(lock);
		tokio::time::sleep(Duration::from_millis(200)).await;

		assert!(matches!(
			repo.find_by_id(5).await,
			Err(RepositoryError::NotFound(5))
		));
		repo.insert(&order(5)).await.unwrap();
	}

	/// Backend that reports every key, including the key listing, as missing.
	struct EmptyStorage;

	#[async_trait]
	impl StorageInterface for EmptyStorage {
		async fn get_bytes(&self, _key: &str) -> Result<Vec<u8>, StorageError> {
			Err(StorageError::NotFound)
		}

		async fn set_bytes(&self, _key: &str, _value: Vec<u8>) -> Result<(), StorageError> {
			Err(StorageError::NotFound)
		}

		async fn delete(&self, _key: &str) -> Result<(), StorageError> {
			Err(StorageError::NotFound)
		}

		async fn exists(&self, _key: &str) -> Result<bool, StorageError> {
			Ok(false)
		}

		async fn keys(&self, _prefix: &str) -> Result<Vec<String>, StorageError> {
			Err(StorageError::NotFound)
		}

		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			Box::new(MemoryStorageSchema)
		}
	}

	#[tokio::test]
	async fn test_listing_failure_is_never_not_found() {
		let repo = OrderRepository::new(
			Arc::new(StorageService::new(Box::new(EmptyStorage))),
			Duration::from_secs(1),
		);

		let result = repo.find_all(FindAllPage { size: 5, offset: 42 }).await;
		assert!(matches!(result, Err(RepositoryError::StoreUnavailable(_))));
	}

	/// Backend whose every call fails or stalls.
	struct BrokenStorage {
		stall: bool,
	}

	impl BrokenStorage {
		async fn fail<T>(&self) -> Result<T, StorageError> {
			if self.stall {
				tokio::time::sleep(Duration::from_secs(30)).await;
			}
			Err(StorageError::Backend("connection refused".into()))
		}
	}

	#[async_trait]
	impl StorageInterface for BrokenStorage {
		async fn get_bytes(&self, _key: &str) -> Result<Vec<u8>, StorageError> {
			self.fail().await
		}

		async fn set_bytes(&self, _key: &str, _value: Vec<u8>) -> Result<(), StorageError> {
			self.fail().await
		}

		async fn delete(&self, _key: &str) -> Result<(), StorageError> {
			self.fail().await
		}

		async fn exists(&self, _key: &str) -> Result<bool, StorageError> {
			self.fail().await
		}

		async fn keys(&self, _prefix: &str) -> Result<Vec<String>, StorageError> {
			self.fail().await
		}

		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			Box::new(MemoryStorageSchema)
		}
	}

	fn broken(stall: bool) -> OrderRepository {
		OrderRepository::new(
			Arc::new(StorageService::new(Box::new(BrokenStorage { stall }))),
			Duration::from_millis(50),
		)
	}

	#[tokio::test]
	async fn test_store_failures_surface_as_unavailable() {
		let repo = broken(false);
		assert!(matches!(
			repo.insert(&order(1)).await,
			Err(RepositoryError::StoreUnavailable(_))
		));
		assert!(matches!(
			repo.find_by_id(1).await,
			Err(RepositoryError::StoreUnavailable(_))
		));
		assert!(matches!(
			repo.find_all(FindAllPage { size: 1, offset: 0 }).await,
			Err(RepositoryError::StoreUnavailable(_))
		));
		assert!(matches!(
			repo.delete_by_id(1).await,
			Err(RepositoryError::StoreUnavailable(_))
		));
	}

	#[tokio::test]
	async fn test_stalled_store_times_out() {
		let repo = broken(true);
		let started = std::time::Instant::now();

		let result = repo.find_by_id(1).await;
		assert!(matches!(result, Err(RepositoryError::StoreUnavailable(ref msg)) if msg.contains("timed out")));
		assert!(started.elapsed() < Duration::from_secs(5));
	}
}
