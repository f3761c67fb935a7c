//! # Idempotency for AWS Lambda Rust Functions
//!
//! This crate makes a function invocation identified by a request
//! fingerprint run its side effects at most once, even when it is invoked
//! concurrently or retried after a partial failure.
//!
//! ## Overview
//!
//! Coordination happens entirely through a shared key-value store that
//! supports one atomic conditional write. There is no lock manager and no
//! waiting on the holder of a key: a concurrent duplicate either gets the
//! stored result or an [`IdempotencyError::AlreadyInProgress`] it can retry
//! later.
//!
//! ### Key Features
//!
//! - **Exactly-once effects**: the first execution for a key runs, later ones
//!   replay its stored response.
//! - **Crash tolerance**: records carry an in-progress expiry derived from the
//!   caller's remaining time, so a dead holder is detected.
//! - **Failure release**: a failed, cancelled or panicking operation deletes
//!   its record so the next attempt runs again.
//! - **Payload validation**: reusing a key with a different payload is
//!   reported instead of silently replaying.
//! - **Local cache**: an optional LRU cache of completed records saves store
//!   reads on warm invocations.
//! - **Storage-agnostic**: any store implementing [`PersistenceStore`] works.
//!
//! ## Important Documentation
//!
//! - [`docs::guarantees`]: what the engine does and does not promise
//! - [`docs::store_adapters`]: how to write a correct store adapter
//!
//! ## Getting Started
//!
//! ```toml
//! [dependencies]
//! aws-lambda-idempotency = { version = "0.1", features = ["lambda"] }
//! tokio = { version = "1.0", features = ["full"] }
//! serde = { version = "1.0", features = ["derive"] }
//! ```
//!
//! ### Basic Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use aws_lambda_idempotency::{Coordinator, IdempotencyConfig};
//! use lambda_runtime::{service_fn, LambdaEvent};
//! use serde_json::Value;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), lambda_runtime::Error> {
//!     let coordinator = Arc::new(Coordinator::new(
//!         "payments.charge",
//!         Arc::new(MyDynamoDbStore::new().await),
//!         IdempotencyConfig::default()
//!             .with_key_expression("body.payment_id")
//!             .with_payload_validation("body.amount")
//!             .with_local_cache(128),
//!     )?);
//!
//!     lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
//!         let coordinator = Arc::clone(&coordinator);
//!         async move {
//!             let (payload, context) = event.into_parts();
//!             let receipt: Value = coordinator
//!                 .execute_with_context(charge_card, payload, &context)
//!                 .await?;
//!             Ok::<_, lambda_runtime::Error>(receipt)
//!         }
//!     }))
//!     .await
//! }
//! ```
//!
//! ### Wrapping a Function
//!
//! [`Coordinator::wrap`] binds an operation once so call sites only pass the
//! input:
//!
//! ```rust,ignore
//! let charge = coordinator.wrap(charge_card);
//! let receipt: Value = charge.call_with_context(payload, &context).await?;
//! ```
//!
//! ## Error Handling
//!
//! Every [`IdempotencyError`] carries an [`ErrorKind`]. The operation's own
//! error comes back unchanged as [`IdempotencyError::Operation`] and can be
//! recovered with [`IdempotencyError::operation_error`]. Only
//! [`ErrorKind::AlreadyInProgress`] is retried, a bounded number of times.
//!
//! ## Logging
//!
//! The crate emits [`tracing`] events and runs each execution in an
//! `idempotent_execution` span with `scope` and `idempotency_key` fields.
//! Installing a subscriber is up to the application.
//!
//! ## Module Organization
//!
//! - [`cache`]: LRU cache of completed records
//! - [`clock`]: Wall-clock abstraction
//! - [`config`]: Configuration types
//! - [`context`]: Remaining-time reporting
//! - [`coordinator`]: The execution state machine
//! - [`docs`]: Documentation-only modules
//! - [`error`]: Error types
//! - [`extract`]: Key extraction expressions
//! - [`fingerprint`]: Canonical hashing
//! - [`persistence`]: Store contract and orchestration
//! - [`record`]: The persisted record

pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod docs;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod persistence;
pub mod record;

// Re-export main types at crate root
pub use cache::LocalCache;
pub use clock::{Clock, SharedClock, SystemClock};
pub use config::{HashAlgorithm, IdempotencyConfig, ResponseHook};
pub use context::{FixedRemainingTime, InvocationContext};
pub use coordinator::{Coordinator, CoordinatorBuilder, IdempotentFunction};
pub use error::{BoxError, ErrorKind, IdempotencyError, StoreError};
pub use extract::{ExtractError, FieldPathExtractor, KeyExtractor};
pub use fingerprint::{canonical_json, Fingerprinter};
pub use persistence::{Acquisition, PersistenceLayer, PersistenceStore, SharedPersistenceStore};
pub use record::{Record, RecordStatus};
