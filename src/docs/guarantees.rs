//! # Execution Guarantees
//!
//! ## Quick Summary
//!
//! | Situation | Outcome |
//! |-----------|---------|
//! | First call for a key | Operation runs, response is stored |
//! | Later call, record completed | Stored response is returned, operation does not run |
//! | Concurrent call, holder still within its time budget | `AlreadyInProgress` after the bounded retry |
//! | Holder ran past its remaining time and the store kept its record | `InconsistentState` |
//! | Record expired but the create still failed | `InconsistentState` |
//! | Same key, different validated payload | `Validation` |
//! | Operation fails, is cancelled or panics | Record is deleted, next call runs again |
//!
//! Effects are at most once per key for as long as the record lives
//! (`ttl_seconds`). Once it expires the next call runs the operation again.
//!
//! Without an invocation context there is no in-progress expiry. A holder
//! that crashes then blocks its key until the whole record expires.
//!
//! If storing the completed record fails after the operation succeeded, the
//! record is left `INPROGRESS` rather than deleted, so the side effect cannot
//! run a second time. Callers see a `Persistence` error.
//!
//! The local cache never decides who executes. Only completed records are
//! cached, and each host's cache is private.
//!
//! There is no ordering between different keys.

// This module is documentation-only.
