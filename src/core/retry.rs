//! # BackoffHelper: retry a unit of work until it produces a result.
//!
//! The work is called once immediately. While it reports "not yet"
//! (`Ok(None)` / `Ok(false)`), the helper asks the [`BackoffStrategy`] for the
//! next delay, sleeps, and calls it again.
//!
//! ```text
//! work() ── Ok(Some(v)) ──────────────────────────────► Ok(v)
//!   │
//!   ├─ Err(e) ────────────────────────────────────────► Err(Stopped(e))
//!   │
//!   └─ Ok(None) ─► loop while strategy.should_continue():
//!                    ├─► delay = strategy.next_delay(delay)
//!                    ├─► sleep(delay) ── cancelled ───► Err(Cancelled)
//!                    └─► work() ── Ok(Some(v)) ───────► Ok(v)
//!                  strategy stopped ──────────────────► Err(Exhausted)
//! ```
//!
//! ## Rules
//! - The first attempt never sleeps.
//! - The delay sequence is local to one call; the strategy's stop flag is not.
//! - Cancellation is observed only while sleeping and wins over a ready timer.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{ConfigError, RetryError};
use crate::policies::{BackoffStrategy, TruncatedBinaryBackoff};

/// Drives fallible work through a [`BackoffStrategy`].
///
/// Cheap to clone; clones share the strategy.
#[derive(Clone)]
pub struct BackoffHelper {
    strategy: Arc<dyn BackoffStrategy>,
}

impl Default for BackoffHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl BackoffHelper {
    /// Truncated binary backoff from 1s up to 60s, never giving up.
    pub fn new() -> Self {
        Self::with_strategy(Arc::new(TruncatedBinaryBackoff::default()))
    }

    /// Truncated binary backoff between the given bounds, never giving up.
    pub fn with_bounds(initial: Duration, max: Duration) -> Result<Self, ConfigError> {
        Self::with_bounds_stop_at_max(initial, max, false)
    }

    /// Truncated binary backoff between the given bounds.
    ///
    /// With `stop_at_max`, loops end with [`RetryError::Exhausted`] once a
    /// delay reaches `max`; otherwise they keep retrying at `max`.
    pub fn with_bounds_stop_at_max(
        initial: Duration,
        max: Duration,
        stop_at_max: bool,
    ) -> Result<Self, ConfigError> {
        let strategy = TruncatedBinaryBackoff::with_stop(initial, max, stop_at_max)?;
        Ok(Self::with_strategy(Arc::new(strategy)))
    }

    /// Uses a custom strategy.
    pub fn with_strategy(strategy: Arc<dyn BackoffStrategy>) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> &Arc<dyn BackoffStrategy> {
        &self.strategy
    }

    /// Runs `work` until it yields `Ok(Some(value))`.
    ///
    /// - `Ok(None)`: not yet; back off and retry.
    /// - `Err(e)`: non-retryable; returned as [`RetryError::Stopped`] at once.
    ///
    /// Fails with [`RetryError::Exhausted`] when the strategy stops first and
    /// [`RetryError::Cancelled`] when `cancel` fires during a backoff sleep.
    pub async fn do_until_result<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut work: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        if let Some(value) = work().await.map_err(RetryError::Stopped)? {
            return Ok(value);
        }

        let mut delay = Duration::ZERO;
        while self.strategy.should_continue() {
            delay = self.strategy.next_delay(delay);
            info!(delay_ms = delay.as_millis() as u64, "operation failed, backing off");

            let sleep = time::sleep(delay);
            tokio::pin!(sleep);
            select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = &mut sleep => {}
            }

            if let Some(value) = work().await.map_err(RetryError::Stopped)? {
                return Ok(value);
            }
        }
        Err(RetryError::Exhausted)
    }

    /// Boolean form of [`do_until_result`](Self::do_until_result): `Ok(true)`
    /// is success, `Ok(false)` means retry.
    pub async fn do_until_success<E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut work: F,
    ) -> Result<(), RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, E>>,
    {
        self.do_until_result(cancel, || {
            let attempt = work();
            async move { attempt.await.map(|done| done.then_some(())) }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// Allows a fixed number of retries at a constant delay, counting backoffs.
    struct Limited {
        remaining: AtomicUsize,
        backoffs: AtomicUsize,
        delay: Duration,
    }

    impl Limited {
        fn new(retries: usize, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                remaining: AtomicUsize::new(retries),
                backoffs: AtomicUsize::new(0),
                delay,
            })
        }
    }

    impl BackoffStrategy for Limited {
        fn next_delay(&self, _last: Duration) -> Duration {
            self.remaining.fetch_sub(1, Ordering::SeqCst);
            self.backoffs.fetch_add(1, Ordering::SeqCst);
            self.delay
        }

        fn should_continue(&self) -> bool {
            self.remaining.load(Ordering::SeqCst) > 0
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_success_never_sleeps() {
        let strategy = Limited::new(5, ms(100));
        let helper = BackoffHelper::with_strategy(strategy.clone());
        let token = CancellationToken::new();
        let start = Instant::now();

        let res: Result<u32, RetryError<()>> =
            helper.do_until_result(&token, || async { Ok(Some(7)) }).await;

        assert_eq!(res, Ok(7));
        assert_eq!(strategy.backoffs.load(Ordering::SeqCst), 0);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_two_retries() {
        let strategy = Limited::new(2, ms(100));
        let helper = BackoffHelper::with_strategy(strategy.clone());
        let token = CancellationToken::new();
        let calls = AtomicUsize::new(0);
        let start = Instant::now();

        let res: Result<(), RetryError<()>> = helper
            .do_until_result(&token, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(None) }
            })
            .await;

        assert_eq!(res, Err(RetryError::Exhausted));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(strategy.backoffs.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= ms(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_doubling_delays() {
        let helper = BackoffHelper::with_bounds(ms(100), ms(1_000)).unwrap();
        let token = CancellationToken::new();
        let calls = AtomicUsize::new(0);
        let start = Instant::now();

        let res: Result<&str, RetryError<()>> = helper
            .do_until_result(&token, || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok((n == 3).then_some("ok")) }
            })
            .await;

        assert_eq!(res, Ok("ok"));
        let elapsed = start.elapsed();
        assert!(elapsed >= ms(300) && elapsed < ms(400), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_at_max_exhausts() {
        let helper = BackoffHelper::with_bounds_stop_at_max(ms(100), ms(400), true).unwrap();
        let token = CancellationToken::new();
        let calls = AtomicUsize::new(0);

        let res: Result<(), RetryError<()>> = helper
            .do_until_success(&token, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(false) }
            })
            .await;

        assert_eq!(res, Err(RetryError::Exhausted));
        // immediate try + backoffs of 100, 200, 400
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(!helper.strategy().should_continue());
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_stops_without_sleeping() {
        let strategy = Limited::new(10, ms(100));
        let helper = BackoffHelper::with_strategy(strategy.clone());
        let token = CancellationToken::new();
        let calls = AtomicUsize::new(0);

        let res: Result<(), RetryError<&str>> = helper
            .do_until_success(&token, || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { if n == 2 { Err("bad version") } else { Ok(false) } }
            })
            .await;

        assert_eq!(res, Err(RetryError::Stopped("bad version")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(strategy.backoffs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_sleep() {
        let helper = BackoffHelper::with_bounds(ms(1_000), ms(10_000)).unwrap();
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let canceller = token.clone();
        tokio::spawn(async move {
            time::sleep(ms(50)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let counted = calls.clone();
        let res: Result<(), RetryError<()>> = helper
            .do_until_success(&token, || {
                counted.fetch_add(1, Ordering::SeqCst);
                async { Ok(false) }
            })
            .await;

        assert_eq!(res, Err(RetryError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < ms(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_still_tries_once() {
        let helper = BackoffHelper::new();
        let token = CancellationToken::new();
        token.cancel();

        let first: Result<u8, RetryError<()>> =
            helper.do_until_result(&token, || async { Ok(Some(1)) }).await;
        assert_eq!(first, Ok(1));

        let second: Result<u8, RetryError<()>> =
            helper.do_until_result(&token, || async { Ok(None) }).await;
        assert_eq!(second, Err(RetryError::Cancelled));
    }

    #[test]
    fn test_invalid_bounds() {
        assert!(BackoffHelper::with_bounds(ms(400), ms(100)).is_err());
        assert!(BackoffHelper::with_bounds_stop_at_max(ms(0), ms(100), true).is_err());
    }
}
