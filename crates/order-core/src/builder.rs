//! Builder for constructing order engines.
//!
//! Composes an [`OrderEngine`] from configuration, picking the primary storage
//! implementation out of a factory map keyed by implementation name.

use crate::engine::OrderEngine;
use crate::id::{IdGenerator, RandomIdGenerator};
use crate::repository::OrderRepository;
use order_config::Config;
use order_storage::{StorageError, StorageInterface, StorageService};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
}

/// Builder for an [`OrderEngine`] with a pluggable storage backend.
pub struct OrderEngineBuilder {
	config: Config,
	ids: Arc<dyn IdGenerator>,
}

impl OrderEngineBuilder {
	/// Creates a builder that draws random order IDs.
	pub fn new(config: Config) -> Self {
		Self {
			config,
			ids: Arc::new(RandomIdGenerator),
		}
	}

	/// Replaces the ID source.
	pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
		self.ids = ids;
		self
	}

	/// Builds the engine, instantiating every configured storage
	/// implementation that has a factory and keeping the primary one.
	pub fn build<SF>(self, storage_factories: HashMap<String, SF>) -> Result<OrderEngine, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
	{
		let mut storage_impls = HashMap::new();
		for (name, config) in &self.config.storage.implementations {
			let Some(factory) = storage_factories.get(name) else {
				tracing::warn!(component = "storage", implementation = %name, "No factory registered, skipping");
				continue;
			};
			match factory(config) {
				Ok(implementation) => {
					let is_primary = &self.config.storage.primary == name;
					tracing::info!(component = "storage", implementation = %name, enabled = %is_primary, "Loaded");
					storage_impls.insert(name.clone(), implementation);
				}
				Err(e) => {
					tracing::error!(
						component = "storage",
						implementation = %name,
						error = %e,
						"Failed to create storage implementation"
					);
					return Err(BuilderError::Config(format!(
						"Failed to create storage implementation '{}': {}",
						name, e
					)));
				}
			}
		}

		let primary_storage = &self.config.storage.primary;
		let backend = storage_impls.remove(primary_storage).ok_or_else(|| {
			BuilderError::Config(format!(
				"Primary storage '{}' failed to load or has no registered implementation",
				primary_storage
			))
		})?;

		let storage = Arc::new(StorageService::new(backend));
		let repository = Arc::new(OrderRepository::new(
			storage,
			self.config.repository.operation_timeout(),
		));

		tracing::info!(
			service_id = %self.config.service.id,
			operation_timeout_ms = self.config.repository.operation_timeout_ms,
			max_id_attempts = self.config.repository.max_id_attempts,
			"Order engine ready"
		);

		Ok(OrderEngine::new(
			repository,
			self.ids,
			self.config.repository.max_id_attempts,
		))
	}
}
