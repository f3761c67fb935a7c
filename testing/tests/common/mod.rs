//! Shared test utilities for integration tests.
//!
//! Helpers for building coordinators over the in-memory store, counting
//! operations, and proptest strategies for request payloads.

#![allow(dead_code)] // These utilities are used by other integration test files

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aws_lambda_idempotency::{Coordinator, IdempotencyConfig, SharedPersistenceStore};
use aws_lambda_idempotency_testing::{InMemoryPersistenceStore, TokioClock};
use proptest::prelude::*;
use serde_json::{json, Value};

/// 2023-11-14T22:13:20Z
pub const START_MILLIS: i64 = 1_700_000_000_000;

pub const SCOPE: &str = "orders.create";

/// A coordinator over an in-memory store, both on one Tokio-driven clock.
pub struct Harness {
    pub coordinator: Arc<Coordinator>,
    pub store: Arc<InMemoryPersistenceStore>,
    pub clock: Arc<TokioClock>,
}

impl Harness {
    /// Must run inside a runtime with paused time.
    pub fn new(config: IdempotencyConfig) -> Self {
        let clock = TokioClock::starting_at(START_MILLIS);
        let store = Arc::new(InMemoryPersistenceStore::with_clock(clock.clone()));
        Self::with_store(config, store, clock)
    }

    pub fn with_store(
        config: IdempotencyConfig,
        store: Arc<InMemoryPersistenceStore>,
        clock: Arc<TokioClock>,
    ) -> Self {
        let coordinator = Arc::new(build(config, store.clone(), clock.clone()));
        Self {
            coordinator,
            store,
            clock,
        }
    }

    /// The key the coordinator derives for `input`.
    pub fn key_for(&self, input: &Value) -> String {
        self.coordinator
            .persistence()
            .idempotency_key(SCOPE, input)
            .unwrap()
    }
}

pub fn build(
    config: IdempotencyConfig,
    store: SharedPersistenceStore,
    clock: Arc<TokioClock>,
) -> Coordinator {
    Coordinator::builder(SCOPE, store)
        .config(config)
        .clock(clock)
        .build()
        .unwrap()
}

/// Counts invocations and returns `response` after `delay`.
#[derive(Clone)]
pub struct CountingOperation {
    calls: Arc<AtomicUsize>,
    response: Value,
    delay: Duration,
}

impl CountingOperation {
    pub fn new(response: Value) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            response,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// A one-shot operation for `Coordinator::execute`.
    pub fn op(
        &self,
    ) -> impl FnOnce(Value) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Value, std::io::Error>> + Send>,
    > {
        let calls = Arc::clone(&self.calls);
        let response = self.response.clone();
        let delay = self.delay;
        move |_input: Value| {
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(response)
            })
        }
    }
}

pub fn failing_op(
    message: &'static str,
) -> impl FnOnce(Value) -> std::future::Ready<Result<Value, std::io::Error>> {
    move |_input: Value| std::future::ready(Err(std::io::Error::other(message)))
}

pub fn order(id: u64, amount: u64) -> Value {
    json!({"order_id": id, "amount": amount, "customer": {"id": "c-1"}})
}

// =============================================================================
// Proptest strategies
// =============================================================================

/// Arbitrary JSON scalars.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z0-9 ]{0,12}".prop_map(Value::from),
    ]
}

/// Arbitrary JSON documents, up to three levels deep.
pub fn json_strategy() -> impl Strategy<Value = Value> {
    scalar_strategy().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

/// Distinct field names paired with values.
pub fn fields_strategy() -> impl Strategy<Value = Vec<(String, Value)>> {
    prop::collection::btree_map("[a-z]{1,8}", scalar_strategy(), 1..8)
        .prop_map(|m| m.into_iter().collect())
}
