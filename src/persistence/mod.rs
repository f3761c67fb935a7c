//! Persistence contract for idempotency records.
//!
//! The engine never talks to a database directly. It drives a
//! [`PersistenceStore`] adapter whose `create` must be a single atomic
//! conditional write: that condition is the only mutual-exclusion mechanism
//! between concurrent executions.
//!
//! [`PersistenceLayer`] sits on top of the adapter and adds key derivation,
//! timestamps, payload validation and the local cache.

mod layer;

pub use layer::{Acquisition, PersistenceLayer};

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::record::Record;

/// A backing key-value store for idempotency records.
///
/// Adapters do not retry; every failure is reported once to the engine.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Writes `record` unless a live record already exists for its key.
    ///
    /// A record is live unless its `expiry` has passed or it is an
    /// `INPROGRESS` record whose `in_progress_expiry` has passed (see
    /// [`Record::is_reclaimable`]). Losing the race must return
    /// [`StoreError::AlreadyExists`], ideally carrying the existing record.
    async fn create(&self, record: &Record) -> Result<(), StoreError>;

    /// Reads the record stored under `key`.
    ///
    /// Returns [`StoreError::NotFound`] if there is none.
    async fn read(&self, key: &str) -> Result<Record, StoreError>;

    /// Overwrites the record stored under `record.key`.
    async fn update(&self, record: &Record) -> Result<(), StoreError>;

    /// Deletes the record stored under `key`. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Shared persistence store handle.
pub type SharedPersistenceStore = Arc<dyn PersistenceStore>;

/// A store call as seen by [`MockPersistenceStore`].
#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Create(Record),
    Read(String),
    Update(Record),
    Delete(String),
}

/// A scripted store for unit tests.
///
/// Each operation pops the next queued response; when the queue is empty
/// `create`, `update` and `delete` succeed and `read` reports `NotFound`.
#[cfg(test)]
pub struct MockPersistenceStore {
    create_responses: std::sync::Mutex<Vec<Result<(), StoreError>>>,
    read_responses: std::sync::Mutex<Vec<Result<Record, StoreError>>>,
    update_responses: std::sync::Mutex<Vec<Result<(), StoreError>>>,
    delete_responses: std::sync::Mutex<Vec<Result<(), StoreError>>>,
    calls: std::sync::Mutex<Vec<StoreCall>>,
}

#[cfg(test)]
impl MockPersistenceStore {
    pub fn new() -> Self {
        Self {
            create_responses: std::sync::Mutex::new(Vec::new()),
            read_responses: std::sync::Mutex::new(Vec::new()),
            update_responses: std::sync::Mutex::new(Vec::new()),
            delete_responses: std::sync::Mutex::new(Vec::new()),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn with_create_response(self, response: Result<(), StoreError>) -> Self {
        self.create_responses.lock().unwrap().push(response);
        self
    }

    pub fn with_read_response(self, response: Result<Record, StoreError>) -> Self {
        self.read_responses.lock().unwrap().push(response);
        self
    }

    pub fn with_update_response(self, response: Result<(), StoreError>) -> Self {
        self.update_responses.lock().unwrap().push(response);
        self
    }

    pub fn with_delete_response(self, response: Result<(), StoreError>) -> Self {
        self.delete_responses.lock().unwrap().push(response);
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_reads(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, StoreCall::Read(_)))
            .count()
    }

    pub fn count_creates(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, StoreCall::Create(_)))
            .count()
    }

    fn next<T>(queue: &std::sync::Mutex<Vec<Result<T, StoreError>>>) -> Option<Result<T, StoreError>> {
        let mut responses = queue.lock().unwrap();
        if responses.is_empty() {
            None
        } else {
            Some(responses.remove(0))
        }
    }
}

#[cfg(test)]
#[async_trait]
impl PersistenceStore for MockPersistenceStore {
    async fn create(&self, record: &Record) -> Result<(), StoreError> {
        self.calls.lock().unwrap().push(StoreCall::Create(record.clone()));
        Self::next(&self.create_responses).unwrap_or(Ok(()))
    }

    async fn read(&self, key: &str) -> Result<Record, StoreError> {
        self.calls.lock().unwrap().push(StoreCall::Read(key.to_string()));
        Self::next(&self.read_responses).unwrap_or_else(|| Err(StoreError::not_found(key)))
    }

    async fn update(&self, record: &Record) -> Result<(), StoreError> {
        self.calls.lock().unwrap().push(StoreCall::Update(record.clone()));
        Self::next(&self.update_responses).unwrap_or(Ok(()))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.calls.lock().unwrap().push(StoreCall::Delete(key.to_string()));
        Self::next(&self.delete_responses).unwrap_or(Ok(()))
    }
}

/// A clock frozen at a settable instant, for unit tests.
#[cfg(test)]
pub struct TestClock(pub std::sync::atomic::AtomicI64);

#[cfg(test)]
impl TestClock {
    pub fn at(now_millis: i64) -> Arc<Self> {
        Arc::new(Self(std::sync::atomic::AtomicI64::new(now_millis)))
    }

    pub fn advance(&self, millis: i64) {
        self.0.fetch_add(millis, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl crate::clock::Clock for TestClock {
    fn now_millis(&self) -> i64 {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}
