//! Order ID sources.
//!
//! ID assignment is injected rather than drawn from a process-wide generator
//! so tests can predict IDs and force collisions. Zero is never produced: it
//! marks an unset ID and doubles as the "from the start" list cursor.

use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of new order IDs.
pub trait IdGenerator: Send + Sync {
	/// Returns the next candidate ID. Candidates may collide with existing
	/// orders; the repository rejects those.
	fn next_id(&self) -> u64;
}

/// Draws IDs uniformly from `1..=u64::MAX`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
	fn next_id(&self) -> u64 {
		rand::thread_rng().gen_range(1..=u64::MAX)
	}
}

/// Hands out consecutive IDs starting at a given value.
#[derive(Debug)]
pub struct SequentialIdGenerator {
	next: AtomicU64,
}

impl SequentialIdGenerator {
	pub fn new(start: u64) -> Self {
		Self {
			next: AtomicU64::new(start.max(1)),
		}
	}
}

impl Default for SequentialIdGenerator {
	fn default() -> Self {
		Self::new(1)
	}
}

impl IdGenerator for SequentialIdGenerator {
	fn next_id(&self) -> u64 {
		let id = self.next.fetch_add(1, Ordering::Relaxed);
		if id == 0 {
			// wrapped around
			self.next.fetch_add(1, Ordering::Relaxed)
		} else {
			id
		}
	}
}
