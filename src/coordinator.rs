//! The idempotent execution state machine.
//!
//! For each call the [`Coordinator`]:
//!
//! 1. derives the idempotency key from the input and builds an `INPROGRESS`
//!    record,
//! 2. tries to create it with the store's conditional write,
//! 3. on conflict, classifies the existing record (replay, in progress,
//!    orphaned, expired),
//! 4. otherwise runs the operation and either completes or deletes the
//!    record.
//!
//! The whole sequence is retried a bounded number of times when another
//! execution holds the key.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::Instrument;

use crate::clock::{SharedClock, SystemClock};
use crate::config::{IdempotencyConfig, ResponseHook};
use crate::context::InvocationContext;
use crate::error::{BoxError, IdempotencyError};
use crate::extract::{FieldPathExtractor, KeyExtractor};
use crate::persistence::{Acquisition, PersistenceLayer, SharedPersistenceStore};
use crate::record::{Record, RecordStatus};

/// Runs operations at most once per idempotency key.
///
/// Build one per logical operation and share it by `Arc`; it holds no
/// per-call state.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use aws_lambda_idempotency::{Coordinator, IdempotencyConfig, PersistenceStore, Record, StoreError};
///
/// # struct NoopStore;
/// # #[async_trait::async_trait]
/// # impl PersistenceStore for NoopStore {
/// #     async fn create(&self, _: &Record) -> Result<(), StoreError> { Ok(()) }
/// #     async fn read(&self, key: &str) -> Result<Record, StoreError> { Err(StoreError::not_found(key)) }
/// #     async fn update(&self, _: &Record) -> Result<(), StoreError> { Ok(()) }
/// #     async fn delete(&self, _: &str) -> Result<(), StoreError> { Ok(()) }
/// # }
/// # async fn run() -> Result<(), aws_lambda_idempotency::IdempotencyError> {
/// let coordinator = Coordinator::new(
///     "orders.create",
///     Arc::new(NoopStore),
///     IdempotencyConfig::default().with_key_expression("order_id"),
/// )?;
///
/// let total: u64 = coordinator
///     .execute(
///         |order: serde_json::Value| async move {
///             Ok::<_, std::io::Error>(order["amount"].as_u64().unwrap_or(0))
///         },
///         serde_json::json!({"order_id": "o-1", "amount": 42}),
///     )
///     .await?;
/// assert_eq!(total, 42);
/// # Ok(())
/// # }
/// ```
pub struct Coordinator {
    scope: String,
    layer: Arc<PersistenceLayer>,
    retry_attempts: u32,
    retry_delay: Duration,
    response_hook: Option<ResponseHook>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("scope", &self.scope)
            .field("layer", &self.layer)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay", &self.retry_delay)
            .field("response_hook", &self.response_hook.is_some())
            .finish()
    }
}

/// Builder for a [`Coordinator`] with non-default collaborators.
pub struct CoordinatorBuilder {
    scope: String,
    store: SharedPersistenceStore,
    config: IdempotencyConfig,
    extractor: Arc<dyn KeyExtractor>,
    clock: SharedClock,
}

impl CoordinatorBuilder {
    /// Sets the configuration.
    pub fn config(mut self, config: IdempotencyConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the default [`FieldPathExtractor`].
    pub fn extractor(mut self, extractor: Arc<dyn KeyExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Replaces the system clock.
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Validates the configuration and builds the coordinator.
    pub fn build(self) -> Result<Coordinator, IdempotencyError> {
        if self.scope.trim().is_empty() {
            return Err(IdempotencyError::configuration("scope must not be empty"));
        }
        let layer = PersistenceLayer::new(self.store, &self.config, self.extractor, self.clock)?;
        Ok(Coordinator {
            scope: self.scope,
            layer: Arc::new(layer),
            retry_attempts: self.config.retry_attempts,
            retry_delay: self.config.retry_delay,
            response_hook: self.config.response_hook,
        })
    }
}

impl Coordinator {
    /// Creates a coordinator for `scope` with the system clock and the
    /// default field-path extractor.
    pub fn new(
        scope: impl Into<String>,
        store: SharedPersistenceStore,
        config: IdempotencyConfig,
    ) -> Result<Self, IdempotencyError> {
        Self::builder(scope, store).config(config).build()
    }

    /// Starts a builder for `scope`.
    pub fn builder(scope: impl Into<String>, store: SharedPersistenceStore) -> CoordinatorBuilder {
        CoordinatorBuilder {
            scope: scope.into(),
            store,
            config: IdempotencyConfig::default(),
            extractor: Arc::new(FieldPathExtractor),
            clock: Arc::new(SystemClock),
        }
    }

    /// The key prefix naming this logical operation.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// The persistence layer, for inspecting the local cache.
    pub fn persistence(&self) -> &PersistenceLayer {
        &self.layer
    }

    /// Runs `operation` on `input` at most once per idempotency key.
    ///
    /// Without an invocation context, in-progress records carry no
    /// in-progress expiry; see [`execute_with_context`](Self::execute_with_context).
    pub async fn execute<I, T, E, F, Fut>(&self, operation: F, input: I) -> Result<T, IdempotencyError>
    where
        I: Serialize,
        T: Serialize + DeserializeOwned,
        E: Into<BoxError>,
        F: FnOnce(I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(operation, input, None).await
    }

    /// Like [`execute`](Self::execute), bounding the in-progress record by
    /// the caller's remaining execution time.
    pub async fn execute_with_context<I, T, E, F, Fut>(
        &self,
        operation: F,
        input: I,
        context: &dyn InvocationContext,
    ) -> Result<T, IdempotencyError>
    where
        I: Serialize,
        T: Serialize + DeserializeOwned,
        E: Into<BoxError>,
        F: FnOnce(I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(operation, input, Some(context)).await
    }

    /// Wraps `operation` so every call goes through this coordinator.
    pub fn wrap<F>(self: &Arc<Self>, operation: F) -> IdempotentFunction<F> {
        IdempotentFunction {
            coordinator: Arc::clone(self),
            operation,
        }
    }

    async fn run<I, T, E, F, Fut>(
        &self,
        operation: F,
        input: I,
        context: Option<&dyn InvocationContext>,
    ) -> Result<T, IdempotencyError>
    where
        I: Serialize,
        T: Serialize + DeserializeOwned,
        E: Into<BoxError>,
        F: FnOnce(I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let span = tracing::info_span!(
            "idempotent_execution",
            scope = %self.scope,
            idempotency_key = tracing::field::Empty,
        );

        async move {
            let value = serde_json::to_value(&input)?;
            let key = self.layer.idempotency_key(&self.scope, &value)?;
            let payload_hash = self.layer.payload_hash(&value)?;
            tracing::Span::current().record("idempotency_key", key.as_str());

            let mut pending = Some((input, operation));
            let mut attempt = 0;
            loop {
                match self
                    .attempt(&key, payload_hash.as_deref(), &mut pending, context)
                    .await
                {
                    Err(error) if error.is_retriable() && attempt < self.retry_attempts => {
                        attempt += 1;
                        tracing::debug!(
                            attempt = attempt,
                            delay_ms = self.retry_delay.as_millis() as u64,
                            "Execution already in progress, retrying"
                        );
                        tokio::time::sleep(self.retry_delay).await;
                    }
                    result => return result,
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn attempt<I, T, E, F, Fut>(
        &self,
        key: &str,
        payload_hash: Option<&str>,
        pending: &mut Option<(I, F)>,
        context: Option<&dyn InvocationContext>,
    ) -> Result<T, IdempotencyError>
    where
        T: Serialize + DeserializeOwned,
        E: Into<BoxError>,
        F: FnOnce(I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let remaining = context.and_then(|c| c.remaining_time_millis());
        let acquisition = self
            .layer
            .save_in_progress(key, payload_hash.map(String::from), remaining)
            .await?;

        match acquisition {
            Acquisition::Acquired(_) => self.invoke(key, payload_hash, pending).await,
            Acquisition::AlreadyExists(Some(record)) => {
                let record = self.layer.process_existing_record(record, payload_hash)?;
                self.classify(record)
            }
            Acquisition::AlreadyExists(None) => {
                let record = self.layer.get_record(key, payload_hash).await?.ok_or_else(|| {
                    IdempotencyError::inconsistent_state(
                        key,
                        "record disappeared after the conditional create failed",
                    )
                })?;
                self.classify(record)
            }
        }
    }

    fn classify<T: DeserializeOwned>(&self, record: Record) -> Result<T, IdempotencyError> {
        let now = self.layer.now_millis();
        match record.status_at(now) {
            RecordStatus::Expired => Err(IdempotencyError::inconsistent_state(
                record.key,
                "record expired but still blocked the conditional create",
            )),
            RecordStatus::InProgress if record.is_orphaned(now) => {
                Err(IdempotencyError::inconsistent_state(
                    record.key,
                    "in-progress record outlived its holder's remaining time",
                ))
            }
            RecordStatus::InProgress => Err(IdempotencyError::already_in_progress(record.key)),
            RecordStatus::Completed => {
                tracing::debug!("Returning stored response for completed record");
                let stored = record.response_data.clone().unwrap_or(Value::Null);
                let response = match &self.response_hook {
                    Some(hook) => hook(stored, &record),
                    None => stored,
                };
                Ok(serde_json::from_value(response)?)
            }
        }
    }

    async fn invoke<I, T, E, F, Fut>(
        &self,
        key: &str,
        payload_hash: Option<&str>,
        pending: &mut Option<(I, F)>,
    ) -> Result<T, IdempotencyError>
    where
        T: Serialize,
        E: Into<BoxError>,
        F: FnOnce(I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some((input, operation)) = pending.take() else {
            self.release(key).await;
            return Err(IdempotencyError::inconsistent_state(
                key,
                "operation was already consumed by an earlier attempt",
            ));
        };

        let mut guard = ReleaseGuard::arm(Arc::clone(&self.layer), key);
        let outcome = operation(input).await;

        let response = match outcome {
            Ok(response) => response,
            Err(error) => {
                self.release(key).await;
                guard.disarm();
                return Err(IdempotencyError::Operation(error.into()));
            }
        };

        let value = match serde_json::to_value(&response) {
            Ok(value) => value,
            Err(error) => {
                self.release(key).await;
                guard.disarm();
                return Err(error.into());
            }
        };

        // The side effect has happened. A failed completion keeps the record.
        guard.disarm();
        self.layer
            .save_success(key, value, payload_hash.map(String::from))
            .await?;
        Ok(response)
    }

    async fn release(&self, key: &str) {
        if let Err(error) = self.layer.delete_record(key).await {
            tracing::error!(
                idempotency_key = %key,
                error = %error,
                "Failed to release idempotency record after failed execution"
            );
        }
    }
}

/// Deletes the in-progress record if the execution never reaches an outcome.
///
/// Armed between a successful create and the final outcome. Dropping it
/// armed (cancellation or panic) spawns the delete on the current runtime.
struct ReleaseGuard {
    layer: Arc<PersistenceLayer>,
    key: Option<String>,
}

impl ReleaseGuard {
    fn arm(layer: Arc<PersistenceLayer>, key: &str) -> Self {
        Self {
            layer,
            key: Some(key.to_string()),
        }
    }

    fn disarm(&mut self) {
        self.key = None;
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(idempotency_key = %key, "Execution interrupted, releasing idempotency record");
                let layer = Arc::clone(&self.layer);
                handle.spawn(async move {
                    if let Err(error) = layer.delete_record(&key).await {
                        tracing::error!(
                            idempotency_key = %key,
                            error = %error,
                            "Failed to release idempotency record after interrupted execution"
                        );
                    }
                });
            }
            Err(_) => {
                tracing::error!(
                    idempotency_key = %key,
                    "No runtime available to release idempotency record, it stays locked until it expires"
                );
            }
        }
    }
}

/// An operation bound to a [`Coordinator`], produced by [`Coordinator::wrap`].
pub struct IdempotentFunction<F> {
    coordinator: Arc<Coordinator>,
    operation: F,
}

impl<F> IdempotentFunction<F> {
    /// The coordinator this function runs through.
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Calls the wrapped operation idempotently.
    pub async fn call<I, T, E, Fut>(&self, input: I) -> Result<T, IdempotencyError>
    where
        I: Serialize,
        T: Serialize + DeserializeOwned,
        E: Into<BoxError>,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.coordinator
            .execute(|input| (self.operation)(input), input)
            .await
    }

    /// Calls the wrapped operation idempotently with an invocation context.
    pub async fn call_with_context<I, T, E, Fut>(
        &self,
        input: I,
        context: &dyn InvocationContext,
    ) -> Result<T, IdempotencyError>
    where
        I: Serialize,
        T: Serialize + DeserializeOwned,
        E: Into<BoxError>,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.coordinator
            .execute_with_context(|input| (self.operation)(input), input, context)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FixedRemainingTime;
    use crate::error::{ErrorKind, StoreError};
    use crate::persistence::{MockPersistenceStore, StoreCall, TestClock};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const NOW_MS: i64 = 1_700_000_000_000;
    const NOW_S: i64 = 1_700_000_000;

    #[derive(Debug, thiserror::Error)]
    #[error("payment declined")]
    struct Declined;

    fn coordinator(store: Arc<MockPersistenceStore>, config: IdempotencyConfig) -> Coordinator {
        Coordinator::builder("orders", store)
            .config(config)
            .clock(TestClock::at(NOW_MS))
            .build()
            .unwrap()
    }

    fn counting(
        calls: &Arc<AtomicUsize>,
    ) -> impl FnOnce(Value) -> std::future::Ready<Result<Value, Declined>> {
        let calls = Arc::clone(calls);
        move |_input| {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(json!({"ok": true})))
        }
    }

    #[tokio::test]
    async fn test_first_call_runs_and_completes() {
        let store = Arc::new(MockPersistenceStore::new());
        let coordinator = coordinator(store.clone(), IdempotencyConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let result: Value = coordinator
            .execute_with_context(counting(&calls), json!({"id": 1}), &FixedRemainingTime(30_000))
            .await
            .unwrap();

        assert_eq!(result, json!({"ok": true}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let recorded = store.calls();
        assert_eq!(recorded.len(), 2);
        let StoreCall::Create(created) = &recorded[0] else {
            panic!("expected create");
        };
        assert_eq!(created.status, RecordStatus::InProgress);
        assert_eq!(created.in_progress_expiry, Some(NOW_MS + 30_000));
        assert!(created.key.starts_with("orders#"));
        let StoreCall::Update(updated) = &recorded[1] else {
            panic!("expected update");
        };
        assert_eq!(updated.status, RecordStatus::Completed);
        assert_eq!(updated.response_data, Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn test_completed_record_is_replayed() {
        let stored = Record::completed("orders#x", json!({"ok": "stored"})).with_expiry(NOW_S + 60);
        let store = Arc::new(
            MockPersistenceStore::new()
                .with_create_response(Err(StoreError::already_exists("orders#x")))
                .with_read_response(Ok(stored)),
        );
        let coordinator = coordinator(store.clone(), IdempotencyConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let result: Value = coordinator.execute(counting(&calls), json!({})).await.unwrap();

        assert_eq!(result, json!({"ok": "stored"}));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.count_reads(), 1);
    }

    #[tokio::test]
    async fn test_carried_record_skips_read() {
        let stored = Record::completed("orders#x", json!(7)).with_expiry(NOW_S + 60);
        let store = Arc::new(
            MockPersistenceStore::new()
                .with_create_response(Err(StoreError::already_exists_with(stored))),
        );
        let coordinator = coordinator(store.clone(), IdempotencyConfig::default());

        let result: u32 = coordinator
            .execute(|_: Value| async { Ok::<u32, Declined>(0) }, json!({}))
            .await
            .unwrap();

        assert_eq!(result, 7);
        assert_eq!(store.count_reads(), 0);
    }

    #[tokio::test]
    async fn test_response_hook_applies_on_replay_only() {
        let stored = Record::completed("orders#x", json!({"n": 1})).with_expiry(NOW_S + 60);
        let store = Arc::new(
            MockPersistenceStore::new()
                .with_create_response(Ok(()))
                .with_create_response(Err(StoreError::already_exists_with(stored))),
        );
        let config = IdempotencyConfig::default().with_response_hook(|mut response, _| {
            response["replayed"] = json!(true);
            response
        });
        let coordinator = coordinator(store, config);

        let first: Value = coordinator
            .execute(|_: Value| async { Ok::<_, Declined>(json!({"n": 1})) }, json!({}))
            .await
            .unwrap();
        assert_eq!(first, json!({"n": 1}));

        let second: Value = coordinator
            .execute(|_: Value| async { Ok::<_, Declined>(json!({"n": 2})) }, json!({}))
            .await
            .unwrap();
        assert_eq!(second, json!({"n": 1, "replayed": true}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_progress_retried_then_surfaced() {
        let running = Record::in_progress("orders#x")
            .with_expiry(NOW_S + 60)
            .with_in_progress_expiry(NOW_MS + 30_000);
        let store = Arc::new(
            MockPersistenceStore::new()
                .with_create_response(Err(StoreError::already_exists_with(running.clone())))
                .with_create_response(Err(StoreError::already_exists_with(running))),
        );
        let coordinator = coordinator(store.clone(), IdempotencyConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let err = coordinator
            .execute(counting(&calls), json!({}))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AlreadyInProgress);
        assert_eq!(store.count_creates(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_once_holder_releases() {
        let running = Record::in_progress("orders#x").with_expiry(NOW_S + 60);
        let store = Arc::new(
            MockPersistenceStore::new()
                .with_create_response(Err(StoreError::already_exists_with(running))),
        );
        let coordinator = coordinator(store.clone(), IdempotencyConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let result: Value = coordinator.execute(counting(&calls), json!({})).await.unwrap();

        assert_eq!(result, json!({"ok": true}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.count_creates(), 2);
    }

    #[tokio::test]
    async fn test_zero_retries() {
        let running = Record::in_progress("orders#x").with_expiry(NOW_S + 60);
        let store = Arc::new(
            MockPersistenceStore::new()
                .with_create_response(Err(StoreError::already_exists_with(running))),
        );
        let coordinator = coordinator(store.clone(), IdempotencyConfig::default().with_retry_attempts(0));
        let calls = Arc::new(AtomicUsize::new(0));

        let err = coordinator.execute(counting(&calls), json!({})).await.unwrap_err();
        assert!(err.is_already_in_progress());
        assert_eq!(store.count_creates(), 1);
    }

    #[tokio::test]
    async fn test_orphaned_record_is_inconsistent_and_not_retried() {
        let orphan = Record::in_progress("orders#x")
            .with_expiry(NOW_S + 3600)
            .with_in_progress_expiry(NOW_MS - 1);
        let store = Arc::new(
            MockPersistenceStore::new()
                .with_create_response(Err(StoreError::already_exists_with(orphan))),
        );
        let coordinator = coordinator(store.clone(), IdempotencyConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let err = coordinator.execute(counting(&calls), json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InconsistentState);
        assert_eq!(store.count_creates(), 1);
    }

    #[tokio::test]
    async fn test_expired_record_is_inconsistent() {
        let expired = Record::completed("orders#x", json!(1)).with_expiry(NOW_S - 1);
        let store = Arc::new(
            MockPersistenceStore::new()
                .with_create_response(Err(StoreError::already_exists_with(expired))),
        );
        let coordinator = coordinator(store, IdempotencyConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let err = coordinator.execute(counting(&calls), json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InconsistentState);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_vanished_record_is_inconsistent() {
        let store = Arc::new(
            MockPersistenceStore::new()
                .with_create_response(Err(StoreError::already_exists("orders#x"))),
        );
        let coordinator = coordinator(store, IdempotencyConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let err = coordinator.execute(counting(&calls), json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InconsistentState);
    }

    #[tokio::test]
    async fn test_operation_failure_deletes_and_propagates() {
        let store = Arc::new(MockPersistenceStore::new());
        let coordinator = coordinator(store.clone(), IdempotencyConfig::default());

        let err = coordinator
            .execute(|_: Value| async { Err::<Value, _>(Declined) }, json!({"id": 1}))
            .await
            .unwrap_err();

        assert!(err.operation_error::<Declined>().is_some());
        let recorded = store.calls();
        assert!(matches!(recorded.last(), Some(StoreCall::Delete(_))));
        assert!(!recorded.iter().any(|c| matches!(c, StoreCall::Update(_))));
    }

    #[tokio::test]
    async fn test_failed_release_keeps_operation_error() {
        let store = Arc::new(
            MockPersistenceStore::new().with_delete_response(Err(StoreError::backend("down"))),
        );
        let coordinator = coordinator(store, IdempotencyConfig::default());

        let err = coordinator
            .execute(|_: Value| async { Err::<Value, _>(Declined) }, json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Operation);
        assert_eq!(err.to_string(), "payment declined");
    }

    #[tokio::test]
    async fn test_save_success_failure_surfaces_persistence_error() {
        let store = Arc::new(
            MockPersistenceStore::new().with_update_response(Err(StoreError::backend("down"))),
        );
        let coordinator = coordinator(store.clone(), IdempotencyConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let err = coordinator.execute(counting(&calls), json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // The record is kept so the side effect cannot run twice.
        assert!(!store.calls().iter().any(|c| matches!(c, StoreCall::Delete(_))));
    }

    #[tokio::test]
    async fn test_create_failure_surfaces_persistence_error() {
        let store = Arc::new(
            MockPersistenceStore::new().with_create_response(Err(StoreError::backend("down"))),
        );
        let coordinator = coordinator(store, IdempotencyConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let err = coordinator.execute(counting(&calls), json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_required_key() {
        let store = Arc::new(MockPersistenceStore::new());
        let config = IdempotencyConfig::default()
            .with_key_expression("body.id")
            .with_require_extracted_key(true);
        let coordinator = coordinator(store.clone(), config);
        let calls = Arc::new(AtomicUsize::new(0));

        let err = coordinator
            .execute(counting(&calls), json!({"body": {}}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingKey);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_validation_mismatch_on_carried_record() {
        let stored = Record::completed("orders#x", json!(1))
            .with_expiry(NOW_S + 60)
            .with_payload_hash("not-the-same");
        let store = Arc::new(
            MockPersistenceStore::new()
                .with_create_response(Err(StoreError::already_exists_with(stored))),
        );
        let config = IdempotencyConfig::default()
            .with_key_expression("id")
            .with_payload_validation("amount");
        let coordinator = coordinator(store, config);
        let calls = Arc::new(AtomicUsize::new(0));

        let err = coordinator
            .execute(counting(&calls), json!({"id": 1, "amount": 5}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_wrap() {
        let store = Arc::new(MockPersistenceStore::new());
        let coordinator = Arc::new(coordinator(store, IdempotencyConfig::default()));
        let double = coordinator.wrap(|n: u64| async move { Ok::<_, Declined>(n * 2) });

        assert_eq!(double.call(21).await.unwrap(), 42);
        assert_eq!(double.coordinator().scope(), "orders");
    }

    #[test]
    fn test_empty_scope_rejected() {
        let err = Coordinator::new(" ", Arc::new(MockPersistenceStore::new()), IdempotencyConfig::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
