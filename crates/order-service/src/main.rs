//! Main entry point for the order service.
//!
//! Loads configuration, wires the configured storage backend into an order
//! engine and serves the order API until interrupted.

use clap::Parser;
use order_config::Config;
use order_core::{OrderEngine, OrderEngineBuilder};
use std::path::PathBuf;
use std::sync::Arc;

mod apis;
mod server;

use order_storage::implementations::file::create_storage as create_file_storage;
use order_storage::implementations::memory::create_storage as create_memory_storage;

/// Command-line arguments for the order service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	// Initialize tracing with env filter
	use tracing_subscriber::{fmt, EnvFilter};

	// RUST_LOG takes precedence over --log-level
	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started order service");

	let config_path = args.config.to_string_lossy();
	let config = Config::from_file(&config_path).await?;
	tracing::info!("Loaded configuration [{}]", config.service.id);

	let engine = Arc::new(build_engine(config.clone())?);

	match config.api.clone().filter(|api| api.enabled) {
		Some(api_config) => {
			server::start_server(api_config, engine, shutdown_signal()).await?;
		}
		None => {
			tracing::warn!("API server disabled; configuration and storage checked, exiting");
		}
	}

	tracing::info!("Stopped order service");
	Ok(())
}

/// Resolves once Ctrl-C is received.
async fn shutdown_signal() {
	match tokio::signal::ctrl_c().await {
		Ok(()) => tracing::info!("Shutdown signal received"),
		Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
	}
}

/// Macro to create a factory HashMap with the appropriate type aliases
macro_rules! create_factory_map {
    ($interface:path, $error:path, $( $name:literal => $factory:expr ),* $(,)?) => {{
        let mut factories = std::collections::HashMap::new();
        $(
            factories.insert(
                $name.to_string(),
                $factory as fn(&toml::Value) -> Result<Box<dyn $interface>, $error>
            );
        )*
        factories
    }};
}

/// Builds the order engine with the available storage backends.
fn build_engine(config: Config) -> Result<OrderEngine, Box<dyn std::error::Error>> {
	let storage_factories = create_factory_map!(
		order_storage::StorageInterface,
		order_storage::StorageError,
		"file" => create_file_storage,
		"memory" => create_memory_storage,
	);

	Ok(OrderEngineBuilder::new(config).build(storage_factories)?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;
	use uuid::Uuid;

	#[test]
	fn test_args_default_values() {
		let args = Args::parse_from(["order-service"]);
		assert_eq!(args.config, PathBuf::from("config.toml"));
		assert_eq!(args.log_level, "info");
	}

	#[test]
	fn test_args_custom_values() {
		let args = Args::parse_from([
			"order-service",
			"--config",
			"custom.toml",
			"--log-level",
			"debug",
		]);
		assert_eq!(args.config, PathBuf::from("custom.toml"));
		assert_eq!(args.log_level, "debug");
	}

	#[test]
	fn test_create_factory_map_macro() {
		use order_storage::{StorageError, StorageInterface};

		let factories = create_factory_map!(
			StorageInterface,
			StorageError,
			"memory" => create_memory_storage,
			"file" => create_file_storage,
		);

		assert_eq!(factories.len(), 2);
		assert!(factories.contains_key("memory"));
		assert!(factories.contains_key("file"));
	}

	#[tokio::test]
	async fn test_build_engine_with_file_storage() {
		let dir = tempdir().unwrap();
		let config_path = dir.path().join("config.toml");
		let data_path = dir.path().join("orders");
		let contents = format!(
			r#"
[service]
id = "orders-test"

[storage]
primary = "file"

[storage.implementations.file]
storage_path = "{}"
"#,
			data_path.display()
		);
		tokio::fs::write(&config_path, contents).await.unwrap();

		let config = Config::from_file(config_path.to_str().unwrap())
			.await
			.unwrap();
		let engine = build_engine(config).unwrap();
		let order = engine.create(Uuid::new_v4(), vec![]).await.unwrap();

		let shipped = engine
			.update_status(order.order_id, "shipped")
			.await
			.unwrap();
		let reloaded = engine.get(order.order_id).await.unwrap();
		assert_eq!(reloaded, shipped);
	}

	#[test]
	fn test_build_engine_rejects_unknown_primary() {
		let config: Config = r#"
[service]
id = "orders-test"

[storage]
primary = "postgres"

[storage.implementations.postgres]
"#
		.parse()
		.unwrap();
		assert!(build_engine(config).is_err());
	}
}
