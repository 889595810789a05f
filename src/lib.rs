//! # keeperline
//!
//! **Keeperline** is a session-resilient client layer for ZooKeeper-like
//! coordination services.
//!
//! It keeps one managed session per ensemble, moves every reaction to service
//! callbacks onto an ordered background worker, and maintains watch-driven
//! local caches of node values that survive transient errors, node deletion
//! and session expiry.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!      ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!      │  DataNode<T> │   │  DataNode<T> │   │  DataNode<T> │
//!      │ /svc/config  │   │ /svc/leader  │   │ /limits/max  │
//!      └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!             │ get() / add_background_job() / register_expiration_handler()
//!             ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  ConnectionManager                                                │
//! │  - handle slot (one session, tagged with its generation)          │
//! │  - JobQueue (FIFO, single worker task)                            │
//! │  - ExpirationHandlerSet (isolated fan-out)                        │
//! │  - CancellationToken (parent of every node's token)               │
//! └──────┬───────────────────────────────────────────────▲────────────┘
//!        │ Connector::connect(servers, timeout, watcher)  │ push job
//!        ▼                                                │
//! ┌──────────────────────┐   Watcher::process(event)  ┌───┴───────────────┐
//! │  Session (ensemble)  │ ─────────────────────────► │ ConnectionWatcher │
//! │  get_data / exists   │                            │ NodeWatcher       │
//! └──────────────────────┘                            └───────────────────┘
//! ```
//!
//! ### Refresh and recovery
//! ```text
//! NodeWatcher(NodeDataChanged | NodeDeleted | NodeCreated)
//!   └─► push job ─► worker ─► BackoffHelper::do_until_success
//!                               └─► refresh (per-node lock)
//!                                     ├─ get_data + watch ─► value ─► listener(old, new)
//!                                     └─ NoNode ─► exists + watch ─► absent
//!
//! ConnectionWatcher(Expired)
//!   ├─► slot = None                      (on the notification thread)
//!   └─► push job ─► close stale session ─► every ExpirationHandler
//!                                             └─► DataNode re-arms its watch
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                              |
//! |-------------------|---------------------------------------------------------------|-------------------------------------------------|
//! | **Sessions**      | One lazily established session, credentials, close/destroy.   | [`ConnectionManager`], [`ConnectionRegistry`]   |
//! | **Background**    | Ordered, isolated background jobs and expiration handlers.    | [`ExpirationHandler`]                           |
//! | **Retries**       | Backoff-driven retry loops with cancellation.                 | [`BackoffHelper`], [`BackoffStrategy`]          |
//! | **Caches**        | Watch-driven node values with change listeners.               | [`DataNode`], [`DataCache`], [`DataListener`]   |
//! | **Collaborator**  | What the client library underneath must provide.              | [`session::Connector`], [`session::Session`]    |
//! | **Errors**        | Typed errors with retryability and log labels.                | [`DataError`], [`ErrorCode`], [`RetryError`]    |
//! | **Configuration** | Connect string, session timeout, credentials, backoff bounds. | [`Config`], [`Credentials`]                     |
//!
//! ## Optional features
//! - `memory`: exposes `session::MemoryEnsemble`, an in-process ensemble for tests.
//!
//! ## Example
//! ```rust
//! # #[cfg(feature = "memory")]
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use keeperline::session::MemoryEnsemble;
//! use keeperline::{Config, ConnectionManager, DataNode, Utf8Deserializer};
//!
//! let ensemble = MemoryEnsemble::new();
//! ensemble.create("/service/config", "v1")?;
//!
//! let manager = ConnectionManager::new(Config::new("mem:2181"), Arc::new(ensemble.clone()))?;
//! let config = DataNode::create(&manager, "/service/config", Utf8Deserializer)?;
//!
//! config.sync(true).await?;
//! assert_eq!(config.get_data().as_deref(), Some("v1"));
//!
//! config.monitor(
//!     config.get_data(),
//!     Arc::new(|old: Option<&String>, new: Option<&String>| {
//!         println!("config: {old:?} -> {new:?}");
//!     }),
//! )?;
//!
//! config.destroy();
//! manager.destroy().await;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "memory"))]
//! # fn main() {}
//! ```
mod cache;
mod config;
mod core;
mod error;
mod handlers;
mod policies;
pub mod session;

// ---- Public re-exports ----

pub use cache::{DataCache, DataListener, DataNode, NodeDeserializer, Utf8Deserializer};
pub use config::{Config, Credentials};
pub use crate::core::{BackoffHelper, ConnectionManager, ConnectionRegistry};
pub use error::{
    BoxError, CloseError, ConfigError, ConnectionError, DataError, DeserializeError, Destroyed,
    ErrorCode, RetryError, ServerError,
};
pub use handlers::{ExpirationHandler, ExpirationHandlerSet, FanOutReport};
pub use policies::{BackoffStrategy, TruncatedBinaryBackoff};
