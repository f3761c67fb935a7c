//! Testing utilities for aws-lambda-idempotency
//!
//! This crate provides test doubles for exercising idempotent functions
//! without a real key-value store.
//!
//! # Features
//!
//! - **InMemoryPersistenceStore**: A conditional-write store with TTL semantics
//! - **MockPersistenceStore**: Scripted responses and call recording for failure injection
//! - **ManualClock**: A clock that only moves when the test says so
//! - **TokioClock**: A clock that follows Tokio's paused time
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use aws_lambda_idempotency::{Coordinator, FixedRemainingTime, IdempotencyConfig};
//! use aws_lambda_idempotency_testing::{InMemoryPersistenceStore, TokioClock};
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_replay() {
//!     let clock = TokioClock::starting_at(1_700_000_000_000);
//!     let store = Arc::new(InMemoryPersistenceStore::with_clock(clock.clone()));
//!     let coordinator = Coordinator::builder("orders", store)
//!         .config(IdempotencyConfig::default())
//!         .clock(clock)
//!         .build()
//!         .unwrap();
//!
//!     let first: u32 = coordinator
//!         .execute_with_context(|_: u32| async { Ok::<_, std::io::Error>(1) }, 7, &FixedRemainingTime(30_000))
//!         .await
//!         .unwrap();
//!     let second: u32 = coordinator
//!         .execute(|_: u32| async { Ok::<_, std::io::Error>(2) }, 7)
//!         .await
//!         .unwrap();
//!     assert_eq!(first, second);
//! }
//! ```

// Module declarations
pub mod clock;
pub mod in_memory;
pub mod mock_store;

pub use clock::{ManualClock, TokioClock};
pub use in_memory::InMemoryPersistenceStore;
pub use mock_store::{MockPersistenceStore, StoreCall};

// Re-export key types from the engine for convenience
pub use aws_lambda_idempotency::{
    Clock, Coordinator, ErrorKind, FixedRemainingTime, IdempotencyConfig, IdempotencyError,
    InvocationContext, PersistenceStore, Record, RecordStatus, SharedPersistenceStore, StoreError,
};
