//! Backoff policies.
//!
//! This module groups the knobs that control **how long** to wait between
//! attempts and **whether** to keep trying.
//!
//! ## Contents
//! - [`BackoffStrategy`] the delay/continue contract consumed by [`BackoffHelper`](crate::BackoffHelper)
//! - [`TruncatedBinaryBackoff`] doubling delays capped at a maximum
//!
//! ## Quick wiring
//! ```text
//! BackoffHelper { strategy: Arc<dyn BackoffStrategy> }
//!      └─► do_until_result(work):
//!           - strategy.should_continue() to decide continue/exhausted
//!           - strategy.next_delay(prev_delay) to schedule the next attempt
//! ```
//!
//! ## Defaults
//! - `Config::default()` → initial=1s, max=60s, never stops.

mod backoff;

pub use backoff::{BackoffStrategy, TruncatedBinaryBackoff};
