//! Per-key async locks
//!
//! Entries live only while some caller holds or waits on them, so the map
//! stays bounded by the number of keys in use.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct KeyedLocks {
	locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
	pub fn new() -> Self {
		Self::default()
	}

	/// Wait for exclusive access to `key`
	pub async fn lock(&self, key: &str) -> KeyedGuard<'_> {
		let lock = self.locks.entry(key.to_string()).or_default().clone();
		let guard = lock.lock_owned().await;
		KeyedGuard {
			locks: self,
			key: key.to_string(),
			guard: Some(guard),
		}
	}

	/// Keys currently held or waited on
	pub fn len(&self) -> usize {
		self.locks.len()
	}

	pub fn is_empty(&self) -> bool {
		self.locks.is_empty()
	}
}

pub struct KeyedGuard<'a> {
	locks: &'a KeyedLocks,
	key: String,
	guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
	fn drop(&mut self) {
		drop(self.guard.take());
		// Waiters hold their own clone, so only an idle entry has a count of one
		self.locks
			.locks
			.remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
	}
}
