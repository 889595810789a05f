//! # Session-expiration handlers.
//!
//! An [`ExpirationHandler`] is invoked once per detected session expiration,
//! after the stale session handle has been detached. Handlers typically
//! re-establish watches that died with the session.
//!
//! ```text
//! ConnectionWatcher ── Expired ──► detach handle ──► enqueue job
//!                                                      │
//!                               worker ◄───────────────┘
//!                                 │
//!                       ExpirationHandlerSet::fan_out(snapshot)
//!                                 ├─► handler A (isolated)
//!                                 ├─► handler B (isolated)
//!                                 └─► handler N (isolated)
//! ```

mod handler;
mod set;

pub use handler::ExpirationHandler;
pub use set::{ExpirationHandlerSet, FanOutReport};
