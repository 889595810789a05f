//! # Collaborator contract: connecting and talking to the ensemble.
//!
//! [`Connector`] establishes sessions; [`Session`] is the opaque handle the
//! [`ConnectionManager`](crate::ConnectionManager) owns and hands out.
//!
//! ## Contract
//! - `connect` fails with [`ConnectionError`] on transport failure.
//! - `get_data` / `exists` fail with a [`ServerError`]; see
//!   [`ErrorCode::is_retryable`](crate::ErrorCode::is_retryable) for the taxonomy.
//! - Watches passed to reads are one-shot and delivered to [`Watcher::process`].
//! - `close` may report [`CloseError::Interrupted`]; callers log it and move on.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::event::Stat;
use super::watcher::WatcherRef;
use crate::error::{CloseError, ConnectionError, ServerError};

/// Shared session handle.
pub type SessionRef = Arc<dyn Session>;

/// Established session with the coordination service.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// Service-assigned session id.
    fn session_id(&self) -> i64;

    /// Attaches credentials. Best-effort, fire-and-forget.
    fn add_auth(&self, scheme: &str, token: &[u8]);

    /// Reads node data, arming a data watch when `watch` is given.
    async fn get_data(
        &self,
        path: &str,
        watch: Option<WatcherRef>,
    ) -> Result<(Vec<u8>, Stat), ServerError>;

    /// Checks presence, arming a watch (creation watch if absent) when `watch` is given.
    async fn exists(
        &self,
        path: &str,
        watch: Option<WatcherRef>,
    ) -> Result<Option<Stat>, ServerError>;

    /// Releases the session.
    async fn close(&self) -> Result<(), CloseError>;
}

/// Factory for sessions.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establishes a session; `watcher` receives connection-state events.
    async fn connect(
        &self,
        servers: &str,
        session_timeout: Duration,
        watcher: WatcherRef,
    ) -> Result<SessionRef, ConnectionError>;
}
