//! LRU cache of failed actor-key fetches.
//!
//! Grounded on `cloudillo-action/src/key_cache.rs`'s `KeyFetchCache`: a
//! successful fetch is never cached here (the caller's actor store is the
//! cache for those), only failures, and different failure kinds get
//! different TTLs so a transient network blip doesn't get treated as
//! permanently-dead the way a 404 should be.

use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

const TTL_NETWORK_ERROR_SECS: u64 = 300;
const TTL_PERSISTENT_ERROR_SECS: u64 = 3600;

#[allow(clippy::unwrap_used)]
const CACHE_CAPACITY: std::num::NonZeroUsize = match std::num::NonZeroUsize::new(4096) {
	Some(n) => n,
	None => unreachable!(),
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
	NetworkError,
	NotFound,
	Unauthorized,
	ParseError,
}

impl FailureType {
	fn ttl(self) -> Duration {
		match self {
			Self::NetworkError => Duration::from_secs(TTL_NETWORK_ERROR_SECS),
			Self::NotFound | Self::Unauthorized | Self::ParseError => {
				Duration::from_secs(TTL_PERSISTENT_ERROR_SECS)
			}
		}
	}
}

struct FailureEntry {
	kind: FailureType,
	recorded_at: Instant,
}

impl FailureEntry {
	fn is_expired(&self) -> bool {
		self.recorded_at.elapsed() >= self.kind.ttl()
	}

	fn seconds_until_retry(&self) -> u64 {
		self.kind.ttl().saturating_sub(self.recorded_at.elapsed()).as_secs()
	}
}

pub struct KeyFetchFailureCache {
	entries: Mutex<LruCache<String, FailureEntry>>,
}

impl Default for KeyFetchFailureCache {
	fn default() -> Self {
		Self::new()
	}
}

impl KeyFetchFailureCache {
	#[must_use]
	pub fn new() -> Self {
		Self { entries: Mutex::new(LruCache::new(CACHE_CAPACITY)) }
	}

	pub fn record_failure(&self, key_id: &str, kind: FailureType) {
		self.entries.lock().put(key_id.to_string(), FailureEntry { kind, recorded_at: Instant::now() });
	}

	pub fn clear(&self, key_id: &str) {
		self.entries.lock().pop(key_id);
	}

	/// Returns `Some(seconds_until_retry)` if this key id recently failed
	/// and the failure hasn't expired yet; `None` means go ahead and fetch.
	pub fn should_skip(&self, key_id: &str) -> Option<u64> {
		let mut entries = self.entries.lock();
		match entries.get(key_id) {
			Some(entry) if entry.is_expired() => {
				entries.pop(key_id);
				None
			}
			Some(entry) => Some(entry.seconds_until_retry()),
			None => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fresh_failure_is_skipped() {
		let cache = KeyFetchFailureCache::new();
		cache.record_failure("https://example.com/key", FailureType::NotFound);
		assert!(cache.should_skip("https://example.com/key").is_some());
	}

	#[test]
	fn clearing_a_key_allows_immediate_retry() {
		let cache = KeyFetchFailureCache::new();
		cache.record_failure("https://example.com/key", FailureType::NetworkError);
		cache.clear("https://example.com/key");
		assert!(cache.should_skip("https://example.com/key").is_none());
	}

	#[test]
	fn unknown_key_is_never_skipped() {
		let cache = KeyFetchFailureCache::new();
		assert!(cache.should_skip("https://example.com/never-seen").is_none());
	}
}
