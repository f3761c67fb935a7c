//! In-memory implementation of PersistenceStore for testing.
//!
//! [`InMemoryPersistenceStore`] behaves like a TTL-enabled table with an
//! atomic conditional put: `create` succeeds when the key is absent or its
//! record is reclaimable at the store's clock, and a losing `create` returns
//! the conflicting record.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use aws_lambda_idempotency::{Coordinator, IdempotencyConfig};
//! use aws_lambda_idempotency_testing::{InMemoryPersistenceStore, ManualClock};
//!
//! let clock = ManualClock::at_millis(1_700_000_000_000);
//! let store = Arc::new(InMemoryPersistenceStore::with_clock(clock.clone()));
//! let coordinator = Coordinator::builder("orders", store.clone())
//!     .config(IdempotencyConfig::default())
//!     .clock(clock)
//!     .build()
//!     .unwrap();
//! assert!(store.is_empty());
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use aws_lambda_idempotency::{
    PersistenceStore, Record, SharedClock, StoreError, SystemClock,
};

/// A persistence store backed by a `HashMap`.
///
/// # Thread Safety
///
/// All operations take an internal mutex for their whole duration, so the
/// conditional create is atomic with respect to other calls.
pub struct InMemoryPersistenceStore {
    records: Mutex<HashMap<String, Record>>,
    clock: SharedClock,
    reclaim: bool,
    latency: Option<Duration>,
}

impl Default for InMemoryPersistenceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryPersistenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryPersistenceStore")
            .field("records", &self.lock().len())
            .field("reclaim", &self.reclaim)
            .field("latency", &self.latency)
            .finish()
    }
}

impl InMemoryPersistenceStore {
    /// Creates an empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty store that evaluates expiry on `clock`.
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            clock,
            reclaim: true,
            latency: None,
        }
    }

    /// Controls whether `create` overwrites reclaimable records.
    ///
    /// With reclaiming off the store behaves like a plain
    /// `attribute_not_exists` condition, which lets tests observe orphaned
    /// and expired records through the engine.
    pub fn with_reclaim(mut self, reclaim: bool) -> Self {
        self.reclaim = reclaim;
        self
    }

    /// Delays every operation by `latency`, before it takes effect.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Record>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Stores `record` directly, bypassing the create condition.
    pub fn insert(&self, record: Record) {
        self.lock().insert(record.key.clone(), record);
    }

    /// Returns the record stored under `key`.
    pub fn get(&self, key: &str) -> Option<Record> {
        self.lock().get(key).cloned()
    }

    /// Returns every stored record.
    pub fn records(&self) -> Vec<Record> {
        self.lock().values().cloned().collect()
    }

    /// Returns the number of stored records.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[async_trait]
impl PersistenceStore for InMemoryPersistenceStore {
    async fn create(&self, record: &Record) -> Result<(), StoreError> {
        self.simulate_latency().await;
        let now = self.clock.now_millis();
        let mut records = self.lock();
        if let Some(existing) = records.get(&record.key) {
            if !(self.reclaim && existing.is_reclaimable(now)) {
                return Err(StoreError::already_exists_with(existing.clone()));
            }
        }
        records.insert(record.key.clone(), record.clone());
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Record, StoreError> {
        self.simulate_latency().await;
        self.get(key).ok_or_else(|| StoreError::not_found(key))
    }

    async fn update(&self, record: &Record) -> Result<(), StoreError> {
        self.simulate_latency().await;
        self.insert(record.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.simulate_latency().await;
        self.lock().remove(key);
        Ok(())
    }
}
