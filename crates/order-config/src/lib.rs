//! Configuration module for the order service.
//!
//! Configuration is read from a TOML file. `${VAR_NAME}` and
//! `${VAR_NAME:-default}` placeholders are substituted from the environment
//! before parsing, and the parsed result is validated before it is handed out.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Extract just the message without the huge input dump
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for the order service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Identity of this service instance.
	pub service: ServiceConfig,
	/// Configuration for the key-value store backend.
	pub storage: StorageConfig,
	/// Tuning for the order repository.
	#[serde(default)]
	pub repository: RepositoryConfig,
	/// Configuration for the HTTP API server.
	pub api: Option<ApiConfig>,
}

/// Configuration specific to the service instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
	/// Identifier used in logs.
	pub id: String,
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of storage implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Configuration for the order repository.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RepositoryConfig {
	/// Deadline applied to every individual store call, in milliseconds.
	#[serde(default = "default_operation_timeout_ms")]
	pub operation_timeout_ms: u64,
	/// How many freshly drawn IDs order creation tries before giving up.
	#[serde(default = "default_max_id_attempts")]
	pub max_id_attempts: u32,
}

impl RepositoryConfig {
	/// The per-call store deadline.
	pub fn operation_timeout(&self) -> Duration {
		Duration::from_millis(self.operation_timeout_ms)
	}
}

impl Default for RepositoryConfig {
	fn default() -> Self {
		Self {
			operation_timeout_ms: default_operation_timeout_ms(),
			max_id_attempts: default_max_id_attempts(),
		}
	}
}

fn default_operation_timeout_ms() -> u64 {
	5000
}

fn default_max_id_attempts() -> u32 {
	3
}

/// Configuration for the HTTP API server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	/// Whether the API server is enabled.
	#[serde(default)]
	pub enabled: bool,
	/// Host address to bind the server to.
	#[serde(default = "default_api_host")]
	pub host: String,
	/// Port to bind the server to.
	#[serde(default = "default_api_port")]
	pub port: u16,
	/// Request timeout in seconds.
	#[serde(default = "default_api_timeout")]
	pub timeout_seconds: u64,
	/// Page size used by the list endpoint when the request names none.
	#[serde(default = "default_page_size")]
	pub default_page_size: usize,
	/// Largest page size a request may ask for.
	#[serde(default = "default_max_page_size")]
	pub max_page_size: usize,
}

impl Default for ApiConfig {
	fn default() -> Self {
		Self {
			enabled: false,
			host: default_api_host(),
			port: default_api_port(),
			timeout_seconds: default_api_timeout(),
			default_page_size: default_page_size(),
			max_page_size: default_max_page_size(),
		}
	}
}

fn default_api_host() -> String {
	"127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
	3000
}

fn default_api_timeout() -> u64 {
	30
}

/// Page size of the list endpoint when a request names none.
fn default_page_size() -> usize {
	50
}

fn default_max_page_size() -> usize {
	500
}

/// `${VAR}` and `${VAR:-default}` references, compiled once per process.
static ENV_VAR_PATTERN: LazyLock<Result<Regex, regex::Error>> =
	LazyLock::new(|| Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}"));

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
///
/// Input strings are limited to 1MB to prevent ReDoS attacks.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = ENV_VAR_PATTERN
		.as_ref()
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = String::with_capacity(input.len());
	let mut last_end = 0;

	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let default_value = cap.get(2).map(|m| m.as_str());

		let value = match std::env::var(var_name.as_str()) {
			Ok(v) => v,
			Err(_) => match default_value {
				Some(default) => default.to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name.as_str()
					)))
				}
			},
		};

		result.push_str(&input[last_end..full_match.start()]);
		result.push_str(&value);
		last_end = full_match.end();
	}
	result.push_str(&input[last_end..]);

	Ok(result)
}

impl Config {
	/// Loads configuration from a file, resolving environment variables.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let content = tokio::fs::read_to_string(path).await?;
		content.parse()
	}

	/// Validates the configuration to ensure all required fields are properly set.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.service.id.trim().is_empty() {
			return Err(ConfigError::Validation("Service ID cannot be empty".into()));
		}

		// Validate storage config
		if self.storage.implementations.is_empty() {
			return Err(ConfigError::Validation(
				"At least one storage implementation must be configured".into(),
			));
		}
		if self.storage.primary.is_empty() {
			return Err(ConfigError::Validation(
				"Storage primary implementation cannot be empty".into(),
			));
		}
		if !self
			.storage
			.implementations
			.contains_key(&self.storage.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary storage '{}' not found in implementations",
				self.storage.primary
			)));
		}

		// Validate repository config
		if !(1..=60_000).contains(&self.repository.operation_timeout_ms) {
			return Err(ConfigError::Validation(
				"repository.operation_timeout_ms must be between 1 and 60000".into(),
			));
		}
		if !(1..=16).contains(&self.repository.max_id_attempts) {
			return Err(ConfigError::Validation(
				"repository.max_id_attempts must be between 1 and 16".into(),
			));
		}

		// Validate API config if enabled
		if let Some(ref api) = self.api {
			if api.enabled {
				if api.timeout_seconds == 0 {
					return Err(ConfigError::Validation(
						"api.timeout_seconds must be greater than 0".into(),
					));
				}
				if api.max_page_size == 0 {
					return Err(ConfigError::Validation(
						"api.max_page_size must be greater than 0".into(),
					));
				}
				if api.default_page_size == 0 || api.default_page_size > api.max_page_size {
					return Err(ConfigError::Validation(format!(
						"api.default_page_size must be between 1 and {}",
						api.max_page_size
					)));
				}
			}
		}

		Ok(())
	}
}

impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
