//! Controllable clocks for idempotency tests.
//!
//! Record expiry is evaluated against wall-clock time, which tests cannot
//! wait on. Two clocks replace it:
//!
//! - [`ManualClock`] only moves when a test advances it.
//! - [`TokioClock`] follows Tokio's clock, so with paused time
//!   (`#[tokio::test(start_paused = true)]`) every `sleep` in the code under
//!   test moves record time forward too.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use aws_lambda_idempotency::Clock;
//! use aws_lambda_idempotency_testing::ManualClock;
//!
//! let clock = ManualClock::at_millis(1_000);
//! clock.advance(Duration::from_secs(2));
//! assert_eq!(clock.now_millis(), 3_000);
//! ```

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aws_lambda_idempotency::Clock;

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now_millis: AtomicI64,
}

impl ManualClock {
    /// Creates a shared clock reading `now_millis`.
    pub fn at_millis(now_millis: i64) -> Arc<Self> {
        Arc::new(Self {
            now_millis: AtomicI64::new(now_millis),
        })
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let millis = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.now_millis.fetch_add(millis, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute time.
    pub fn set_millis(&self, now_millis: i64) {
        self.now_millis.store(now_millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now_millis.load(Ordering::SeqCst)
    }
}

/// A wall clock driven by Tokio's time source.
///
/// Reads `base_millis` plus the Tokio time elapsed since construction.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    base_millis: i64,
    start: tokio::time::Instant,
}

impl TokioClock {
    /// Creates a shared clock starting at `base_millis`.
    ///
    /// Must be called inside a Tokio runtime when time is paused, so the
    /// start instant comes from the paused clock.
    pub fn starting_at(base_millis: i64) -> Arc<Self> {
        Arc::new(Self {
            base_millis,
            start: tokio::time::Instant::now(),
        })
    }
}

impl Clock for TokioClock {
    fn now_millis(&self) -> i64 {
        let elapsed = i64::try_from(self.start.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.base_millis.saturating_add(elapsed)
    }
}
