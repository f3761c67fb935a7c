//! Process-local LRU mirror of recently seen records.
//!
//! The cache only ever saves a store round trip. It holds `COMPLETED` records
//! and nothing else, so a cache hit can never stand in for the conditional
//! create that decides who executes.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use lru::LruCache;

use crate::record::{Record, RecordStatus};

#[derive(Debug, Clone)]
struct CacheEntry {
    record: Record,
    inserted_at: i64,
}

/// Bounded LRU cache of [`Record`]s keyed by idempotency key.
#[derive(Debug)]
pub struct LocalCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl LocalCache {
    /// Creates a cache holding at most `capacity` records.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    // A panic while holding the lock leaves the LRU structurally intact.
    fn lock(&self) -> MutexGuard<'_, LruCache<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the cached record for `key` if it has not expired at
    /// `now_millis`. Expired entries are evicted.
    pub fn get(&self, key: &str, now_millis: i64) -> Option<Record> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if !entry.record.is_expired(now_millis) => {
                return Some(entry.record.clone())
            }
            Some(_) => {}
            None => return None,
        }
        entries.pop(key);
        tracing::debug!(idempotency_key = %key, "Evicted expired record from local cache");
        None
    }

    /// Caches `record`. In-progress records are ignored; returns whether the
    /// record was stored.
    pub fn put(&self, record: Record, now_millis: i64) -> bool {
        if record.status == RecordStatus::InProgress {
            return false;
        }
        let key = record.key.clone();
        self.lock().put(
            key,
            CacheEntry {
                record,
                inserted_at: now_millis,
            },
        );
        true
    }

    /// Removes `key`, returning whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.lock().pop(key).is_some()
    }

    /// Returns when `key` was cached, without touching its recency.
    pub fn inserted_at(&self, key: &str) -> Option<i64> {
        self.lock().peek(key).map(|entry| entry.inserted_at)
    }

    /// Returns true if `key` is cached, expired or not.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains(key)
    }

    /// Number of cached records.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Maximum number of records.
    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    /// Drops every cached record.
    pub fn clear(&self) {
        self.lock().clear();
    }
}
