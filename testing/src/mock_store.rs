//! Scriptable PersistenceStore for failure injection.
//!
//! [`MockPersistenceStore`] records every call and returns queued responses
//! first. When a queue is empty the call falls through to a wrapped store
//! (an [`InMemoryPersistenceStore`] by default), so tests only script the
//! calls they care about.
//!
//! # Examples
//!
//! ```
//! use aws_lambda_idempotency::StoreError;
//! use aws_lambda_idempotency_testing::MockPersistenceStore;
//!
//! // Fail the first update, behave normally afterwards.
//! let store = MockPersistenceStore::new()
//!     .with_update_response(Err(StoreError::backend("throttled")));
//! assert_eq!(store.call_count(), 0);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use aws_lambda_idempotency::{PersistenceStore, Record, SharedPersistenceStore, StoreError};

use crate::InMemoryPersistenceStore;

/// One call made to a [`MockPersistenceStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    /// `create` with the record passed
    Create(Record),
    /// `read` with the key passed
    Read(String),
    /// `update` with the record passed
    Update(Record),
    /// `delete` with the key passed
    Delete(String),
}

impl StoreCall {
    /// The key the call addressed.
    pub fn key(&self) -> &str {
        match self {
            Self::Create(record) | Self::Update(record) => &record.key,
            Self::Read(key) | Self::Delete(key) => key,
        }
    }
}

/// A persistence store with scripted responses and call recording.
///
/// # Thread Safety
///
/// Queues and the call log sit behind mutexes; the mock can be shared
/// across concurrent executions.
pub struct MockPersistenceStore {
    inner: SharedPersistenceStore,
    create_responses: Mutex<VecDeque<Result<(), StoreError>>>,
    read_responses: Mutex<VecDeque<Result<Record, StoreError>>>,
    update_responses: Mutex<VecDeque<Result<(), StoreError>>>,
    delete_responses: Mutex<VecDeque<Result<(), StoreError>>>,
    calls: Mutex<Vec<StoreCall>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockPersistenceStore {
    /// Creates a mock over a fresh in-memory store.
    pub fn new() -> Self {
        Self::wrapping(Arc::new(InMemoryPersistenceStore::new()))
    }

    /// Creates a mock that falls through to `inner`.
    pub fn wrapping(inner: SharedPersistenceStore) -> Self {
        Self {
            inner,
            create_responses: Mutex::new(VecDeque::new()),
            read_responses: Mutex::new(VecDeque::new()),
            update_responses: Mutex::new(VecDeque::new()),
            delete_responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queues a `create` response. Responses are returned FIFO.
    pub fn with_create_response(self, response: Result<(), StoreError>) -> Self {
        lock(&self.create_responses).push_back(response);
        self
    }

    /// Queues a `read` response.
    pub fn with_read_response(self, response: Result<Record, StoreError>) -> Self {
        lock(&self.read_responses).push_back(response);
        self
    }

    /// Queues an `update` response.
    pub fn with_update_response(self, response: Result<(), StoreError>) -> Self {
        lock(&self.update_responses).push_back(response);
        self
    }

    /// Queues a `delete` response.
    pub fn with_delete_response(self, response: Result<(), StoreError>) -> Self {
        lock(&self.delete_responses).push_back(response);
        self
    }

    /// Gets all calls made so far, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        lock(&self.calls).clone()
    }

    /// Returns the number of calls made.
    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Returns the number of `create` calls.
    pub fn create_count(&self) -> usize {
        self.count(|c| matches!(c, StoreCall::Create(_)))
    }

    /// Returns the number of `read` calls.
    pub fn read_count(&self) -> usize {
        self.count(|c| matches!(c, StoreCall::Read(_)))
    }

    /// Returns the number of `update` calls.
    pub fn update_count(&self) -> usize {
        self.count(|c| matches!(c, StoreCall::Update(_)))
    }

    /// Returns the number of `delete` calls.
    pub fn delete_count(&self) -> usize {
        self.count(|c| matches!(c, StoreCall::Delete(_)))
    }

    /// Clears the call log.
    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn count(&self, predicate: impl Fn(&StoreCall) -> bool) -> usize {
        lock(&self.calls).iter().filter(|c| predicate(c)).count()
    }

    fn record(&self, call: StoreCall) {
        lock(&self.calls).push(call);
    }
}

impl Default for MockPersistenceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockPersistenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPersistenceStore")
            .field("create_responses_remaining", &lock(&self.create_responses).len())
            .field("read_responses_remaining", &lock(&self.read_responses).len())
            .field("update_responses_remaining", &lock(&self.update_responses).len())
            .field("delete_responses_remaining", &lock(&self.delete_responses).len())
            .field("calls_count", &lock(&self.calls).len())
            .finish()
    }
}

#[async_trait]
impl PersistenceStore for MockPersistenceStore {
    async fn create(&self, record: &Record) -> Result<(), StoreError> {
        self.record(StoreCall::Create(record.clone()));
        let scripted = lock(&self.create_responses).pop_front();
        match scripted {
            Some(response) => response,
            None => self.inner.create(record).await,
        }
    }

    async fn read(&self, key: &str) -> Result<Record, StoreError> {
        self.record(StoreCall::Read(key.to_string()));
        let scripted = lock(&self.read_responses).pop_front();
        match scripted {
            Some(response) => response,
            None => self.inner.read(key).await,
        }
    }

    async fn update(&self, record: &Record) -> Result<(), StoreError> {
        self.record(StoreCall::Update(record.clone()));
        let scripted = lock(&self.update_responses).pop_front();
        match scripted {
            Some(response) => response,
            None => self.inner.update(record).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.record(StoreCall::Delete(key.to_string()));
        let scripted = lock(&self.delete_responses).pop_front();
        match scripted {
            Some(response) => response,
            None => self.inner.delete(key).await,
        }
    }
}
