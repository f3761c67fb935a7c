//! # Writing a Store Adapter
//!
//! ## Quick Summary
//!
//! | Operation | Requirement |
//! |-----------|-------------|
//! | `create` | One atomic conditional write. Succeeds when the key is absent or its record is reclaimable |
//! | `read` | `NotFound` when absent |
//! | `update` | Unconditional overwrite |
//! | `delete` | Idempotent |
//!
//! A record is reclaimable when `expiry` (epoch seconds) is in the past, or
//! when it is `INPROGRESS` and `inProgressExpiry` (epoch milliseconds) is in
//! the past. [`Record::is_reclaimable`](crate::Record::is_reclaimable)
//! implements that condition. A DynamoDB adapter expresses it as:
//!
//! ```text
//! attribute_not_exists(id)
//!   OR expiration < :now_seconds
//!   OR (status = :inprogress AND in_progress_expiration < :now_millis)
//! ```
//!
//! When the condition fails, return
//! [`StoreError::already_exists_with`](crate::StoreError::already_exists_with)
//! if the store hands back the conflicting item. That saves the engine a read.
//!
//! Adapters must not retry. Wrap every other failure in
//! [`StoreError::backend_with_source`](crate::StoreError::backend_with_source).

// This module is documentation-only.
