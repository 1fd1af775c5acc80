//! Registry trait for self-registering implementations.
//!
//! Backends declare the name they are configured under and hand out a factory,
//! so the service can wire them up from `[storage.implementations.<name>]`.

/// Base trait for implementation registries.
pub trait ImplementationRegistry {
	/// The name used in configuration files to reference this implementation,
	/// e.g. "memory" for `storage.implementations.memory`.
	const NAME: &'static str;

	/// The factory function type this implementation provides.
	type Factory;

	/// Get the factory function for this implementation.
	fn factory() -> Self::Factory;
}
