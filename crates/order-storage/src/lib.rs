//! Storage module for the order service.
//!
//! This module provides the key-value store abstraction orders are persisted
//! through. A backend only has to offer get/set/delete/enumerate over byte
//! values; there are no transactions and no ordered range scans. Backends that
//! can perform conditional writes atomically advertise it by overriding
//! [`StorageInterface::set_bytes_if`].

use async_trait::async_trait;
use order_types::{ConfigSchema, ImplementationRegistry};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs when a requested item is not found.
	#[error("Not found")]
	NotFound,
	/// Error that occurs when a create-only write hits an existing key.
	#[error("Already exists")]
	AlreadyExists,
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs when stored bytes are not a record this backend wrote.
	#[error("Corrupted record: {0}")]
	Corrupted(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Precondition attached to a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCondition {
	/// Only write when the key does not exist yet.
	IfAbsent,
	/// Only write when the key already exists.
	IfPresent,
}

/// Trait defining the low-level interface for storage backends.
///
/// Keys are plain strings; values are opaque bytes.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes, creating or overwriting the key.
	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

	/// Stores raw bytes only if `condition` holds.
	///
	/// Fails with [`StorageError::AlreadyExists`] for `IfAbsent` on an existing
	/// key and [`StorageError::NotFound`] for `IfPresent` on a missing one.
	///
	/// The default implementation checks and then writes, which leaves a race
	/// window between the two calls. Backends that can evaluate the condition
	/// and write under one lock should override it.
	async fn set_bytes_if(
		&self,
		key: &str,
		value: Vec<u8>,
		condition: WriteCondition,
	) -> Result<(), StorageError> {
		let exists = self.exists(key).await?;
		match condition {
			WriteCondition::IfAbsent if exists => return Err(StorageError::AlreadyExists),
			WriteCondition::IfPresent if !exists => return Err(StorageError::NotFound),
			_ => {}
		}
		self.set_bytes(key, value).await
	}

	/// Deletes the value associated with the given key.
	///
	/// Returns [`StorageError::NotFound`] when there was nothing to delete.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	/// Checks if a key exists in storage.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Lists every live key starting with `prefix`, in no particular order.
	async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;
}

/// Type alias for storage factory functions.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// Registry trait for storage implementations.
pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Get all registered storage implementations.
///
/// Returns a vector of (name, factory) tuples for all available storage implementations.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

/// High-level storage service that provides typed operations.
///
/// Values are stored as JSON under `<namespace>:<id>`.
pub struct StorageService {
	/// The underlying storage backend implementation.
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	/// Creates a new StorageService with the specified backend.
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	fn key(namespace: &str, id: &str) -> String {
		format!("{}:{}", namespace, id)
	}

	fn encode<T: Serialize>(data: &T) -> Result<Vec<u8>, StorageError> {
		serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Stores a serializable value, creating or overwriting it.
	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let bytes = Self::encode(data)?;
		self.backend
			.set_bytes(&Self::key(namespace, id), bytes)
			.await
	}

	/// Stores a serializable value only if nothing is stored under the key yet.
	///
	/// Returns [`StorageError::AlreadyExists`] instead of overwriting.
	pub async fn store_new<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let bytes = Self::encode(data)?;
		self.backend
			.set_bytes_if(&Self::key(namespace, id), bytes, WriteCondition::IfAbsent)
			.await
	}

	/// Retrieves and deserializes a value from storage.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&Self::key(namespace, id)).await?;
		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Updates an existing value in storage.
	///
	/// Unlike [`store`](Self::store) this never creates the key; a missing key
	/// yields [`StorageError::NotFound`].
	pub async fn update<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let bytes = Self::encode(data)?;
		self.backend
			.set_bytes_if(&Self::key(namespace, id), bytes, WriteCondition::IfPresent)
			.await
	}

	/// Removes a value from storage.
	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&Self::key(namespace, id)).await
	}

	/// Checks if a value exists in storage.
	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&Self::key(namespace, id)).await
	}

	/// Lists the ids stored in a namespace, unordered.
	pub async fn list_ids(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
		let prefix = format!("{}:", namespace);
		let keys = self.backend.keys(&prefix).await?;
		Ok(keys
			.into_iter()
			.filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
			.collect())
	}
}
