//! # Documentation Modules
//!
//! Detailed guidance on using the idempotency engine correctly.
//!
//! ## Available Documentation
//!
//! - [`guarantees`]: What the engine promises and where those promises end
//! - [`store_adapters`]: Requirements for a [`PersistenceStore`](crate::PersistenceStore) adapter
//!
//! These modules are documentation-only and do not contain executable code.

pub mod guarantees;
pub mod store_adapters;
