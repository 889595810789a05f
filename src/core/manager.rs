//! # ConnectionManager: one live session, one ordered background worker.
//!
//! The manager owns:
//! - the **handle slot**: at most one established session, tagged with the
//!   generation it was created for;
//! - the **job queue**: FIFO background jobs run by a single worker task;
//! - the **expiration handlers** fanned out after a session expires;
//! - a **cancellation token**, parent of every node's token.
//!
//! ```text
//!  get() ── slot empty? ──► connect(servers, timeout, ConnectionWatcher{gen})
//!    │                          └─► add_auth(credentials) ─► slot = Some(gen, session)
//!    └── slot full ──► clone of the current session
//!
//!  service notification thread
//!    ConnectionWatcher::process(Expired)
//!       ├─► expired = max(expired, gen)
//!       ├─► detach slot (if still gen)          synchronous, never blocks
//!       └─► push job: close(stale) ─► fan_out(handlers)
//!
//!  get() after connect: gen already expired? ─► close, push fan_out, Err(SessionExpired)
//!
//!  destroy() ─► destroyed = true ─► cancel token ─► close() ─► drain and join worker
//! ```
//!
//! ## Rules
//! - `get()` never retries; callers wrap it in a [`BackoffHelper`] if needed.
//! - Concurrent `get()` calls establish at most one session.
//! - Handlers always observe an empty slot for the session that expired.
//! - A session whose expiry arrived before it was published is never published.
//! - After `destroy()` no job is accepted and no session is established.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::retry::BackoffHelper;
use super::watcher::ConnectionWatcher;
use super::worker::{Job, JobQueue};
use crate::config::Config;
use crate::error::{BoxError, ConfigError, ConnectionError, Destroyed};
use crate::handlers::{ExpirationHandler, ExpirationHandlerSet};
use crate::session::{Connector, SessionRef};

/// The established session and the generation it belongs to.
struct Slot {
    generation: u64,
    session: SessionRef,
}

pub(super) struct Inner {
    config: Config,
    backoff: BackoffHelper,
    connector: Arc<dyn Connector>,
    slot: Mutex<Option<Slot>>,
    connecting: AsyncMutex<()>,
    generation: AtomicU64,
    /// Highest generation reported expired.
    expired: AtomicU64,
    destroyed: AtomicBool,
    handlers: ExpirationHandlerSet,
    jobs: JobQueue,
    token: CancellationToken,
}

impl Inner {
    pub(super) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Takes the session out of the slot iff it belongs to `generation`.
    pub(super) fn detach(&self, generation: u64) -> Option<SessionRef> {
        let mut slot = self.slot.lock();
        match slot.as_ref() {
            Some(s) if s.generation == generation => slot.take().map(|s| s.session),
            _ => None,
        }
    }

    /// Takes `session` out of the slot iff it is still the published one.
    fn detach_session(&self, session: &SessionRef) -> Option<Slot> {
        let mut slot = self.slot.lock();
        match slot.as_ref() {
            Some(s) if std::ptr::addr_eq(Arc::as_ptr(&s.session), Arc::as_ptr(session)) => {
                slot.take()
            }
            _ => None,
        }
    }

    /// Records that `generation` expired, whether or not it was published yet.
    pub(super) fn mark_expired(&self, generation: u64) {
        self.expired.fetch_max(generation, Ordering::AcqRel);
    }

    fn has_expired(&self, generation: u64) -> bool {
        self.expired.load(Ordering::Acquire) >= generation
    }

    /// Enqueues the release of `session` (if given) followed by the handler fan-out.
    pub(super) fn schedule_expiry(self: &Arc<Self>, generation: u64, session: Option<SessionRef>) {
        let job = expiry_job(Arc::downgrade(self), generation, session);
        if self.push_job(job).is_err() {
            debug!(generation, "manager destroyed; expiration fan-out not scheduled");
        }
    }

    pub(super) fn push_job(&self, job: Job) -> Result<(), Destroyed> {
        if self.is_destroyed() {
            return Err(Destroyed);
        }
        self.jobs.push(job)
    }

    pub(super) fn handlers(&self) -> &ExpirationHandlerSet {
        &self.handlers
    }
}

/// Releases a session, treating an interrupted close as done.
pub(super) async fn release(generation: u64, session: SessionRef) {
    let session_id = session.session_id();
    match session.close().await {
        Ok(()) => info!(session_id, generation, "session closed"),
        Err(err) => warn!(
            session_id,
            generation,
            error = %err,
            "session close interrupted; treating as closed"
        ),
    }
}

fn expiry_job(inner: Weak<Inner>, generation: u64, session: Option<SessionRef>) -> Job {
    Box::pin(async move {
        if let Some(session) = session {
            release(generation, session).await;
        }

        let Some(inner) = inner.upgrade() else {
            return Ok(());
        };
        if inner.is_destroyed() {
            debug!(generation, "manager destroyed; expiration fan-out skipped");
            return Ok(());
        }
        let handlers = inner.handlers().snapshot();
        drop(inner);

        ExpirationHandlerSet::fan_out(&handlers).await;
        Ok(())
    })
}

/// Owner of the single session to a coordination-service ensemble.
///
/// Cheap to clone; clones share the same session, queue and handlers.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Creates a manager and spawns its background worker.
    ///
    /// No session is established until the first [`get`](Self::get).
    /// Must be called within a Tokio runtime.
    pub fn new(config: Config, connector: Arc<dyn Connector>) -> Result<Self, ConfigError> {
        config.validate()?;
        let backoff = config.backoff_helper()?;
        debug!(servers = %config.servers, "connection manager created");

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                backoff,
                connector,
                slot: Mutex::new(None),
                connecting: AsyncMutex::new(()),
                generation: AtomicU64::new(0),
                expired: AtomicU64::new(0),
                destroyed: AtomicBool::new(false),
                handlers: ExpirationHandlerSet::new(),
                jobs: JobQueue::spawn(),
                token: CancellationToken::new(),
            }),
        })
    }

    /// Returns the current session, establishing one if there is none.
    ///
    /// Credentials from the config are attached to a new session before it is
    /// published. Transport failures are returned as is. A session that expired
    /// before it could be published is released, the expiration handlers are
    /// scheduled and [`ConnectionError::SessionExpired`] is returned.
    pub async fn get(&self) -> Result<SessionRef, ConnectionError> {
        if let Some(session) = self.current() {
            return Ok(session);
        }

        let _connecting = self.inner.connecting.lock().await;
        if self.is_destroyed() {
            return Err(ConnectionError::Destroyed);
        }
        if let Some(session) = self.current() {
            return Ok(session);
        }

        let cfg = &self.inner.config;
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let watcher = Arc::new(ConnectionWatcher::new(
            Arc::downgrade(&self.inner),
            generation,
        ));

        info!(servers = %cfg.servers, generation, "establishing session");
        let session = self
            .inner
            .connector
            .connect(&cfg.servers, cfg.session_timeout, watcher)
            .await?;

        if let Some(creds) = cfg.usable_credentials() {
            session.add_auth(&creds.scheme, &creds.token);
            debug!(scheme = %creds.scheme, "credentials attached");
        }

        if self.is_destroyed() {
            release(generation, session).await;
            return Err(ConnectionError::Destroyed);
        }

        let published = {
            let mut slot = self.inner.slot.lock();
            let fresh = !self.inner.has_expired(generation);
            if fresh {
                *slot = Some(Slot {
                    generation,
                    session: Arc::clone(&session),
                });
            }
            fresh
        };
        if !published {
            warn!(
                session_id = session.session_id(),
                generation,
                "session expired before it was published; scheduling expiration handlers"
            );
            release(generation, session).await;
            self.inner.schedule_expiry(generation, None);
            return Err(ConnectionError::SessionExpired { generation });
        }

        info!(session_id = session.session_id(), generation, "session established");
        Ok(session)
    }

    /// The current session, without establishing one.
    pub fn current(&self) -> Option<SessionRef> {
        if self.is_destroyed() {
            return None;
        }
        self.inner
            .slot
            .lock()
            .as_ref()
            .map(|s| Arc::clone(&s.session))
    }

    pub fn is_connected(&self) -> bool {
        self.current().is_some()
    }

    /// Drops `session` if it is still the published one and schedules the
    /// expiration handlers, as if its `Expired` event had been delivered.
    ///
    /// For callers whose request on `session` failed with `SessionExpired`.
    /// Returns false if the session was already replaced or detached.
    pub fn invalidate(&self, session: &SessionRef) -> bool {
        let Some(Slot {
            generation,
            session,
        }) = self.inner.detach_session(session)
        else {
            return false;
        };
        self.inner.mark_expired(generation);
        warn!(
            session_id = session.session_id(),
            generation,
            "request reported an expired session; scheduling expiration handlers"
        );
        self.inner.schedule_expiry(generation, Some(session));
        true
    }

    /// Releases the current session, if any. Idempotent.
    pub async fn close(&self) {
        let slot = self.inner.slot.lock().take();
        if let Some(Slot {
            generation,
            session,
        }) = slot
        {
            release(generation, session).await;
        }
    }

    /// Shuts the manager down for good.
    ///
    /// Rejects new jobs, cancels every backoff sleeping on the manager's token,
    /// releases the session, then lets the worker drain what was already queued.
    /// Idempotent.
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(servers = %self.inner.config.servers, "destroying connection manager");
        self.inner.token.cancel();
        self.close().await;
        self.inner.jobs.shutdown().await;
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    /// Enqueues `job` on the background worker. Never blocks.
    ///
    /// Jobs run one at a time in submission order. An `Err` or a panic from a
    /// job is logged and the worker moves on.
    pub fn add_background_job<F>(&self, job: F) -> Result<(), Destroyed>
    where
        F: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.inner.push_job(Box::pin(job))
    }

    /// Registers a handler for session expiration. Returns false if it was
    /// already registered.
    pub fn register_expiration_handler(&self, handler: Arc<dyn ExpirationHandler>) -> bool {
        self.inner.handlers.register(handler)
    }

    /// Removes a handler. Returns false if it was not registered.
    pub fn unregister_expiration_handler(&self, handler: &Arc<dyn ExpirationHandler>) -> bool {
        self.inner.handlers.unregister(handler)
    }

    pub fn expiration_handler_count(&self) -> usize {
        self.inner.handlers.len()
    }

    /// Token cancelled by [`destroy`](Self::destroy).
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Retry driver built from the config's backoff bounds.
    pub fn backoff(&self) -> &BackoffHelper {
        &self.inner.backoff
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    #[cfg(test)]
    pub(super) fn downgrade(&self) -> std::sync::Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    /// Waits until every job queued so far has run.
    #[cfg(test)]
    pub(crate) async fn flush(&self) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        if self
            .add_background_job(async move {
                let _ = tx.send(());
                Ok(())
            })
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}
