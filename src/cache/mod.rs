//! Watch-driven node caches.
//!
//! ## Contents
//! - [`DataCache`] the cache contract
//! - [`DataNode`] cache of one node's deserialized value
//! - [`NodeDeserializer`], [`Utf8Deserializer`] bytes to value
//! - [`DataListener`] value-change callback
//!
//! ## Refresh cycle
//! ```text
//! sync / watch delivery / session expiry
//!        │
//!        ▼  (per-node refresh lock)
//!   get_data(path, watcher) ── Ok(bytes, stat) ─► deserialize ─► apply(Some(v))
//!        │
//!        └─ NoNode ─► exists(path, watcher) ── None ───► apply(None)
//!                                          └── Some ───► read again
//!
//!   apply: stale mzxid → discard; value changed → listener(old, new)
//! ```

mod data_cache;
mod deserializer;
mod listener;
mod node;

pub use data_cache::DataCache;
pub use deserializer::{NodeDeserializer, Utf8Deserializer};
pub use listener::DataListener;
pub use node::DataNode;
