//! # Expiration handler trait.

use async_trait::async_trait;

use crate::error::BoxError;

/// Callback run on the manager's background worker after a session expired.
///
/// ### Implementation requirements
/// - Runs sequentially with other background jobs; long waits delay them.
/// - A returned error or a panic is logged and does not affect other handlers.
/// - The manager's handle is already absent when this runs; call
///   [`ConnectionManager::get`](crate::ConnectionManager::get) for a fresh one.
#[async_trait]
pub trait ExpirationHandler: Send + Sync + 'static {
    /// Reacts to the loss of the session.
    async fn on_session_expired(&self) -> Result<(), BoxError>;

    /// Name used in logs.
    ///
    /// The default uses `type_name::<Self>()`; override it when possible.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
