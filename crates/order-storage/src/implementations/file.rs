//! File-based storage backend.
//!
//! Each key is stored in its own file under a base directory. File names are
//! a reversible encoding of the key, which lets [`FileStorage::keys`] rebuild
//! the key space from a directory listing.

use crate::{StorageError, StorageFactory, StorageInterface, StorageRegistry, WriteCondition};
use async_trait::async_trait;
use fs2::FileExt;
use order_types::{ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, ValidationError};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::fs;

const RECORD_EXTENSION: &str = "bin";
const LOCK_FILE: &str = ".lock";

/// Fixed-size record header.
///
/// Binary layout (16 bytes total):
/// - [0-3]: Magic bytes "OKVS"
/// - [4-5]: Version (u16, little-endian)
/// - [6-7]: Reserved
/// - [8-15]: Payload length (u64, little-endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileHeader {
	version: u16,
	payload_len: u64,
}

impl FileHeader {
	const MAGIC: &'static [u8; 4] = b"OKVS";
	const VERSION: u16 = 1;
	const SIZE: usize = 16;

	fn for_payload(payload: &[u8]) -> Self {
		Self {
			version: Self::VERSION,
			payload_len: payload.len() as u64,
		}
	}

	fn serialize(&self) -> [u8; Self::SIZE] {
		let mut bytes = [0u8; Self::SIZE];
		bytes[0..4].copy_from_slice(Self::MAGIC);
		bytes[4..6].copy_from_slice(&self.version.to_le_bytes());
		bytes[8..16].copy_from_slice(&self.payload_len.to_le_bytes());
		bytes
	}

	fn deserialize(bytes: &[u8]) -> Result<Self, StorageError> {
		if bytes.len() < Self::SIZE {
			return Err(StorageError::Corrupted("File too small for header".into()));
		}
		if &bytes[0..4] != Self::MAGIC {
			return Err(StorageError::Corrupted("Unrecognized file format".into()));
		}

		let version = u16::from_le_bytes([bytes[4], bytes[5]]);
		if version > Self::VERSION {
			return Err(StorageError::Corrupted(format!(
				"Unsupported file version: {}",
				version
			)));
		}

		let mut len_bytes = [0u8; 8];
		len_bytes.copy_from_slice(&bytes[8..16]);

		Ok(Self {
			version,
			payload_len: u64::from_le_bytes(len_bytes),
		})
	}
}

fn encode_record(value: &[u8]) -> Vec<u8> {
	let header = FileHeader::for_payload(value);
	let mut data = Vec::with_capacity(FileHeader::SIZE + value.len());
	data.extend_from_slice(&header.serialize());
	data.extend_from_slice(value);
	data
}

fn decode_record(mut data: Vec<u8>) -> Result<Vec<u8>, StorageError> {
	let header = FileHeader::deserialize(&data)?;
	let payload_len = data.len() - FileHeader::SIZE;
	if header.payload_len != payload_len as u64 {
		return Err(StorageError::Corrupted(format!(
			"Truncated record: header declares {} bytes, found {}",
			header.payload_len, payload_len
		)));
	}
	Ok(data.split_off(FileHeader::SIZE))
}

/// Encodes a key into a file-name-safe stem.
///
/// ASCII alphanumerics, `-` and `_` pass through, every other byte becomes
/// `%XX`. The dot is always escaped so the extension can be split off safely.
fn encode_key(key: &str) -> String {
	let mut out = String::with_capacity(key.len());
	for byte in key.bytes() {
		if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
			out.push(byte as char);
		} else {
			let _ = write!(out, "%{:02X}", byte);
		}
	}
	out
}

/// Reverses [`encode_key`]. Returns None for names this backend did not write.
fn decode_key(stem: &str) -> Option<String> {
	let bytes = stem.as_bytes();
	let mut out = Vec::with_capacity(bytes.len());
	let mut i = 0;
	while i < bytes.len() {
		if bytes[i] == b'%' {
			let hex = stem.get(i + 1..i + 3)?;
			out.push(u8::from_str_radix(hex, 16).ok()?);
			i += 3;
		} else {
			out.push(bytes[i]);
			i += 1;
		}
	}
	String::from_utf8(out).ok()
}

fn backend_err(e: std::io::Error) -> StorageError {
	StorageError::Backend(e.to_string())
}

/// File-based storage implementation.
///
/// Writes land in a temp file that is renamed over the record, so readers see
/// either the previous value or the new one, never a partial write. Every
/// mutation runs under an exclusive lock on `<base>/.lock`, which makes
/// conditional writes and deletes atomic even across processes sharing the
/// directory.
pub struct FileStorage {
	/// Base directory path for storing files.
	base_path: PathBuf,
	/// Disambiguates temp files of concurrent writers.
	tmp_counter: Arc<AtomicU64>,
}

impl FileStorage {
	/// Creates a new FileStorage instance rooted at `base_path`.
	pub fn new(base_path: PathBuf) -> Self {
		Self {
			base_path,
			tmp_counter: Arc::new(AtomicU64::new(0)),
		}
	}

	/// Converts a storage key to its record file path.
	fn get_file_path(&self, key: &str) -> PathBuf {
		self.base_path
			.join(format!("{}.{}", encode_key(key), RECORD_EXTENSION))
	}

	fn temp_path_for(&self, key: &str) -> PathBuf {
		let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
		self.base_path.join(format!(
			"{}.{}-{}.tmp",
			encode_key(key),
			std::process::id(),
			n
		))
	}

	/// Runs a blocking mutation while holding the directory lock.
	///
	/// `op` must call [`CommitGate::commit`] right before it makes its change
	/// visible. If the returned future is dropped first (a deadline fired or
	/// the request went away), the gate refuses and nothing is written.
	async fn with_lock<T, F>(&self, op: F) -> Result<T, StorageError>
	where
		F: FnOnce(&CommitGate) -> Result<T, StorageError> + Send + 'static,
		T: Send + 'static,
	{
		let base_path = self.base_path.clone();
		let gate = CommitGate::default();
		let _abandon_on_drop = gate.abandon_on_drop();

		tokio::task::spawn_blocking(move || {
			std::fs::create_dir_all(&base_path).map_err(backend_err)?;
			let lock = std::fs::OpenOptions::new()
				.create(true)
				.read(true)
				.write(true)
				.truncate(false)
				.open(base_path.join(LOCK_FILE))
				.map_err(backend_err)?;
			lock.lock_exclusive().map_err(backend_err)?;

			let result = op(&gate);

			if let Err(e) = FileExt::unlock(&lock) {
				tracing::warn!(error = %e, "Failed to release storage lock");
			}
			result
		})
		.await
		.map_err(|e| StorageError::Backend(format!("Storage task failed: {}", e)))?
	}
}

const GATE_PENDING: u8 = 0;
const GATE_COMMITTED: u8 = 1;
const GATE_ABANDONED: u8 = 2;

/// Decides, exactly once, whether a locked mutation may still land.
///
/// The caller side abandons the gate when it stops waiting; the blocking side
/// commits it just before the rename or unlink. Whichever happens first wins.
#[derive(Clone, Default)]
struct CommitGate(Arc<AtomicU8>);

impl CommitGate {
	fn commit(&self) -> Result<(), StorageError> {
		match self.0.compare_exchange(
			GATE_PENDING,
			GATE_COMMITTED,
			Ordering::AcqRel,
			Ordering::Acquire,
		) {
			Ok(_) => Ok(()),
			Err(_) => Err(StorageError::Backend(
				"deadline exceeded before the write was applied".into(),
			)),
		}
	}

	fn abandon_on_drop(&self) -> AbandonOnDrop {
		AbandonOnDrop(self.clone())
	}
}

/// Abandons a still pending gate when the waiting future goes away.
struct AbandonOnDrop(CommitGate);

impl Drop for AbandonOnDrop {
	fn drop(&mut self) {
		// a committed or finished gate stays as it is
		let _ = self.0 .0.compare_exchange(
			GATE_PENDING,
			GATE_ABANDONED,
			Ordering::AcqRel,
			Ordering::Acquire,
		);
	}
}

fn write_record(
	gate: &CommitGate,
	path: &Path,
	temp_path: &Path,
	value: &[u8],
) -> Result<(), StorageError> {
	std::fs::write(temp_path, encode_record(value)).map_err(backend_err)?;
	let renamed = gate
		.commit()
		.and_then(|()| std::fs::rename(temp_path, path).map_err(backend_err));
	if renamed.is_err() {
		let _ = std::fs::remove_file(temp_path);
	}
	renamed
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let path = self.get_file_path(key);

		let data = match fs::read(&path).await {
			Ok(data) => data,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(StorageError::NotFound)
			}
			Err(e) => return Err(backend_err(e)),
		};

		decode_record(data)
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		let path = self.get_file_path(key);
		let temp_path = self.temp_path_for(key);
		self.with_lock(move |gate| write_record(gate, &path, &temp_path, &value))
			.await
	}

	async fn set_bytes_if(
		&self,
		key: &str,
		value: Vec<u8>,
		condition: WriteCondition,
	) -> Result<(), StorageError> {
		let path = self.get_file_path(key);
		let temp_path = self.temp_path_for(key);
		self.with_lock(move |gate| {
			match (condition, path.exists()) {
				(WriteCondition::IfAbsent, true) => return Err(StorageError::AlreadyExists),
				(WriteCondition::IfPresent, false) => return Err(StorageError::NotFound),
				_ => {}
			}
			write_record(gate, &path, &temp_path, &value)
		})
		.await
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let path = self.get_file_path(key);
		self.with_lock(move |gate| {
			if !path.exists() {
				return Err(StorageError::NotFound);
			}
			gate.commit()?;
			match std::fs::remove_file(&path) {
				Ok(()) => Ok(()),
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound),
				Err(e) => Err(backend_err(e)),
			}
		})
		.await
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		fs::try_exists(self.get_file_path(key))
			.await
			.map_err(backend_err)
	}

	async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let mut entries = match fs::read_dir(&self.base_path).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(backend_err(e)),
		};

		let mut keys = Vec::new();
		while let Some(entry) = entries.next_entry().await.map_err(backend_err)? {
			let path = entry.path();
			if path.extension() != Some(std::ffi::OsStr::new(RECORD_EXTENSION)) {
				continue;
			}
			let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
				continue;
			};
			match decode_key(stem) {
				Some(key) if key.starts_with(prefix) => keys.push(key),
				Some(_) => {}
				None => tracing::debug!("Skipping file {:?}: not a storage record", path),
			}
		}
		Ok(keys)
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}
}

/// Configuration schema for FileStorage.
pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![
				Field::new("storage_path", FieldType::String).with_validator(|value| {
					match value.as_str() {
						Some(path) if path.trim().is_empty() => {
							Err("storage_path cannot be empty".into())
						}
						_ => Ok(()),
					}
				}),
			],
		);
		schema.validate(config)
	}
}

/// Factory function to create a file storage backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: Base directory for record files (default: "./data/orders")
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/orders");

	Ok(Box::new(FileStorage::new(PathBuf::from(storage_path))))
}

/// Registry for the file storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}
