//! # Truncated binary backoff.
//!
//! [`TruncatedBinaryBackoff`] starts at [`initial`](TruncatedBinaryBackoff::initial)
//! and doubles the previous delay on each call, capped at
//! [`max`](TruncatedBinaryBackoff::max):
//! - `last == 0` → `initial`;
//! - otherwise   → `min(max, last × 2)`.
//!
//! With `stop_at_max` set, reaching the cap flips a sticky stop flag and
//! [`should_continue`](BackoffStrategy::should_continue) returns `false` from then on.
//! Without it the strategy keeps returning the capped delay forever.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use keeperline::{BackoffStrategy, TruncatedBinaryBackoff};
//!
//! let backoff = TruncatedBinaryBackoff::stop_at_max(
//!     Duration::from_millis(100),
//!     Duration::from_millis(400),
//! ).unwrap();
//!
//! assert_eq!(backoff.next_delay(Duration::ZERO), Duration::from_millis(100));
//! assert_eq!(backoff.next_delay(Duration::from_millis(100)), Duration::from_millis(200));
//! assert!(backoff.should_continue());
//! assert_eq!(backoff.next_delay(Duration::from_millis(200)), Duration::from_millis(400));
//! assert!(!backoff.should_continue());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::ConfigError;

/// Strategy for backing off from an operation that repeatedly fails.
///
/// Implementations are shared between loops, hence `&self` and `Send + Sync`.
pub trait BackoffStrategy: Send + Sync + 'static {
    /// Computes the next delay from the previous one.
    ///
    /// `last == Duration::ZERO` signifies that no backoff has been performed yet.
    fn next_delay(&self, last: Duration) -> Duration;

    /// Whether another attempt should be made.
    fn should_continue(&self) -> bool;
}

/// Exponential (×2) backoff truncated at a maximum delay.
#[derive(Debug)]
pub struct TruncatedBinaryBackoff {
    initial: Duration,
    max: Duration,
    stop_at_max: bool,
    stopped: AtomicBool,
}

impl TruncatedBinaryBackoff {
    /// Creates a strategy that keeps backing off at `max` once reached.
    ///
    /// Fails unless `0 < initial < max`.
    pub fn new(initial: Duration, max: Duration) -> Result<Self, ConfigError> {
        Self::with_stop(initial, max, false)
    }

    /// Creates a strategy that stops once a delay reaches `max`.
    pub fn stop_at_max(initial: Duration, max: Duration) -> Result<Self, ConfigError> {
        Self::with_stop(initial, max, true)
    }

    /// Creates a strategy, stopping at `max` iff `stop_at_max`.
    pub fn with_stop(
        initial: Duration,
        max: Duration,
        stop_at_max: bool,
    ) -> Result<Self, ConfigError> {
        if initial.is_zero() || max.is_zero() || initial >= max {
            return Err(ConfigError::InvalidBackoff { initial, max });
        }
        Ok(Self {
            initial,
            max,
            stop_at_max,
            stopped: AtomicBool::new(false),
        })
    }

    /// Delay used for the first backoff.
    pub fn initial(&self) -> Duration {
        self.initial
    }

    /// Delay cap.
    pub fn max(&self) -> Duration {
        self.max
    }
}

impl Default for TruncatedBinaryBackoff {
    /// Returns a strategy with:
    /// - `initial = 1s`;
    /// - `max = 60s`;
    /// - never stopping.
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            stop_at_max: false,
            stopped: AtomicBool::new(false),
        }
    }
}

impl BackoffStrategy for TruncatedBinaryBackoff {
    fn next_delay(&self, last: Duration) -> Duration {
        let delay = if last.is_zero() {
            self.initial
        } else {
            last.saturating_mul(2).min(self.max)
        };
        if self.stop_at_max && delay >= self.max {
            self.stopped.store(true, Ordering::Release);
        }
        delay
    }

    fn should_continue(&self) -> bool {
        !self.stopped.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_default_bounds() {
        let b = TruncatedBinaryBackoff::default();
        assert_eq!(b.initial(), Duration::from_secs(1));
        assert_eq!(b.max(), Duration::from_secs(60));
        assert_eq!(b.next_delay(Duration::from_secs(45)), Duration::from_secs(60));
        assert!(b.should_continue());
    }

    #[test]
    fn test_first_delay_is_initial() {
        let b = TruncatedBinaryBackoff::new(ms(100), ms(400)).unwrap();
        assert_eq!(b.next_delay(Duration::ZERO), ms(100));
    }

    #[test]
    fn test_stop_at_max_sequence() {
        let b = TruncatedBinaryBackoff::stop_at_max(ms(100), ms(400)).unwrap();

        let mut last = Duration::ZERO;
        let mut seen = Vec::new();
        while b.should_continue() {
            last = b.next_delay(last);
            seen.push(last);
        }
        assert_eq!(seen, vec![ms(100), ms(200), ms(400)]);

        for _ in 0..10 {
            b.next_delay(last);
            assert!(!b.should_continue());
        }
    }

    #[test]
    fn test_without_stop_continues_at_cap() {
        let b = TruncatedBinaryBackoff::new(ms(100), ms(400)).unwrap();
        let mut last = Duration::ZERO;
        for _ in 0..50 {
            last = b.next_delay(last);
            assert!(b.should_continue());
        }
        assert_eq!(last, ms(400));
    }

    #[test]
    fn test_sequence_non_decreasing_and_bounded() {
        for (initial, max) in [(1, 2), (3, 1000), (100, 101), (7, 60_000)] {
            let b = TruncatedBinaryBackoff::new(ms(initial), ms(max)).unwrap();
            let mut last = Duration::ZERO;
            for _ in 0..64 {
                let next = b.next_delay(last);
                assert!(next >= last, "{next:?} < {last:?}");
                assert!(next <= ms(max));
                last = next;
            }
            assert_eq!(last, ms(max));
        }
    }

    #[test]
    fn test_doubling_saturates() {
        let b = TruncatedBinaryBackoff::new(ms(1), Duration::MAX).unwrap();
        let d = b.next_delay(Duration::MAX / 2 + Duration::from_secs(1));
        assert_eq!(d, Duration::MAX);
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        assert_eq!(
            TruncatedBinaryBackoff::new(ms(400), ms(400)).unwrap_err(),
            ConfigError::InvalidBackoff {
                initial: ms(400),
                max: ms(400)
            }
        );
        assert!(TruncatedBinaryBackoff::new(ms(500), ms(400)).is_err());
        assert!(TruncatedBinaryBackoff::new(Duration::ZERO, ms(400)).is_err());
        assert!(TruncatedBinaryBackoff::new(ms(1), Duration::ZERO).is_err());
    }
}
