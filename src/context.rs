//! Invocation context: how much execution time the caller has left.
//!
//! The remaining budget bounds how long an `INPROGRESS` record is considered
//! healthy. When no context is supplied the engine still works, but a crashed
//! holder then blocks the key until the record's TTL elapses.

/// Reports the caller's remaining execution budget.
pub trait InvocationContext: Send + Sync {
    /// Milliseconds left before the caller is terminated, if known.
    fn remaining_time_millis(&self) -> Option<i64>;
}

/// A context that always reports the same remaining time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedRemainingTime(pub i64);

impl InvocationContext for FixedRemainingTime {
    fn remaining_time_millis(&self) -> Option<i64> {
        Some(self.0)
    }
}

#[cfg(feature = "lambda")]
impl InvocationContext for lambda_runtime::Context {
    fn remaining_time_millis(&self) -> Option<i64> {
        // `deadline` is the invocation deadline in epoch milliseconds.
        let deadline = i64::try_from(self.deadline).ok()?;
        let now = chrono::Utc::now().timestamp_millis();
        Some((deadline - now).max(0))
    }
}
