//! # Watcher callback.
//!
//! The service invokes [`Watcher::process`] on its own notification thread.
//! Implementations must return quickly: no I/O, no blocking, no awaiting.
//! Real work is handed to the manager's background queue.

use std::sync::Arc;

use super::event::WatchedEvent;

/// Shared watcher handle.
pub type WatcherRef = Arc<dyn Watcher>;

/// Receiver of [`WatchedEvent`]s.
pub trait Watcher: Send + Sync + 'static {
    fn process(&self, event: WatchedEvent);
}

/// Identity of a watcher, used by services to deduplicate registrations.
#[inline]
pub fn same_watcher(a: &WatcherRef, b: &WatcherRef) -> bool {
    Arc::ptr_eq(a, b)
}
