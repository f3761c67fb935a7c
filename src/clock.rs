//! Wall-clock source for record timestamps.

use std::sync::Arc;

/// Source of the current time in epoch milliseconds.
///
/// Record expiry is compared against wall-clock time shared across hosts,
/// so this is deliberately not a monotonic clock.
pub trait Clock: Send + Sync {
    /// Current time as milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}
