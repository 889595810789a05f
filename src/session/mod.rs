//! Coordination-service collaborator interface.
//!
//! Everything the core needs from the client library underneath, and nothing more.
//!
//! ## Contents
//! - [`Connector`], [`Session`] establishing and using a session
//! - [`Watcher`] the callback the service invokes on its notification thread
//! - [`WatchedEvent`], [`EventType`], [`KeeperState`], [`Stat`] event/metadata types
//! - `MemoryEnsemble` (feature `memory`) an in-process implementation
//!
//! ## Quick reference
//! ```text
//! Connector::connect(servers, timeout, conn_watcher) ─► SessionRef
//! Session::get_data(path, Some(watcher))  ─► (bytes, Stat) | ServerError
//! Session::exists(path, Some(watcher))    ─► Option<Stat>  | ServerError
//! Watcher::process(WatchedEvent)          ◄─ service notification thread
//! ```

mod connector;
mod event;
#[cfg(any(test, feature = "memory"))]
mod memory;
mod watcher;

pub use connector::{Connector, Session, SessionRef};
pub use event::{EventType, KeeperState, Stat, WatchedEvent};
#[cfg(any(test, feature = "memory"))]
pub use memory::{MemoryEnsemble, MemorySession};
pub use watcher::{Watcher, WatcherRef, same_watcher};
