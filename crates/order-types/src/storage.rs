//! Storage-related types for the order service.

use std::str::FromStr;

/// Key namespaces used in the key-value store.
///
/// Records live under `<namespace>:<id>`. The namespace doubles as the
/// enumeration prefix, so every live key of a namespace can be listed by
/// scanning for `<namespace>:`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Key for storing order records
	Orders,
}

impl StorageKey {
	/// Returns the string representation of the storage key.
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Orders => "order",
		}
	}
}

impl FromStr for StorageKey {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"order" => Ok(Self::Orders),
			_ => Err(()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_order_keys() {
		assert_eq!(StorageKey::Orders.as_str(), "order");
		assert_eq!("order".parse::<StorageKey>(), Ok(StorageKey::Orders));
		assert!("orders".parse::<StorageKey>().is_err());
	}
}
