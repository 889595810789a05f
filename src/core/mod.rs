//! Runtime core: session ownership, ordered background work and retries.
//!
//! The public API of this module is [`ConnectionManager`], [`ConnectionRegistry`]
//! and [`BackoffHelper`].
//!
//! Internal modules:
//! - [`manager`]: the handle slot, credential attachment, close/destroy;
//! - [`watcher`]: translates session state events into background work;
//! - [`worker`]: FIFO job queue drained by a single worker task;
//! - [`retry`]: backoff-driven retry loops with cancellation;
//! - [`registry`]: one manager per ensemble address.

mod manager;
mod registry;
mod retry;
mod watcher;
mod worker;

pub use manager::ConnectionManager;
pub use registry::ConnectionRegistry;
pub use retry::BackoffHelper;

pub(crate) use worker::panic_message;
