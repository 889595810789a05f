//! # DataNode: cache of one node's value.
//!
//! A [`DataNode`] keeps the deserialized value of one node and re-arms its
//! watch after every delivery. It recovers on its own from:
//! - **transient errors**: retried through the manager's [`BackoffHelper`];
//! - **node absence**: an existence watch brings the value back on creation;
//! - **session expiry**: the node is an expiration handler of its manager.
//!
//! ## State machine
//! ```text
//! Uninitialized ──sync/monitor──► Watching(value | absent) ──destroy──► Destroyed
//!                                   ▲          │
//!                                   └──────────┘ watch delivery / expiry recovery
//! ```
//!
//! ## Rules
//! - Refreshes of one node never interleave (per-node async lock).
//! - Watch deliveries only enqueue a refresh on the manager's worker.
//! - The listener sees `(old, new)` iff `old != new`, in refresh order.
//! - A read whose `mzxid` is older than the last applied one is discarded.
//! - After `destroy()` nothing mutates the value or reaches the listener.
//!
//! [`BackoffHelper`]: crate::BackoffHelper

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{DataCache, DataListener, NodeDeserializer};
use crate::core::{BackoffHelper, ConnectionManager};
use crate::error::{BoxError, ConfigError, DataError, ErrorCode, ServerError};
use crate::handlers::ExpirationHandler;
use crate::session::{EventType, SessionRef, WatchedEvent, Watcher, WatcherRef};

struct NodeState<T> {
    value: Option<T>,
    /// `mzxid` of the last applied present value.
    mzxid: Option<i64>,
    listener: Option<Arc<dyn DataListener<T>>>,
}

/// A pending `(old, new)` delivery, made outside the state lock.
struct Change<T> {
    listener: Arc<dyn DataListener<T>>,
    old: Option<T>,
    new: Option<T>,
}

struct NodeInner<T> {
    path: String,
    manager: Mutex<Option<ConnectionManager>>,
    deserializer: Arc<dyn NodeDeserializer<T>>,
    backoff: BackoffHelper,
    state: Mutex<NodeState<T>>,
    refresh: AsyncMutex<()>,
    destroyed: AtomicBool,
    token: CancellationToken,
    watcher: WatcherRef,
    expiration: Arc<dyn ExpirationHandler>,
}

/// Cached, watch-maintained value of the node at [`path`](DataNode::path).
///
/// Cheap to clone; clones share the same cache.
pub struct DataNode<T> {
    inner: Arc<NodeInner<T>>,
}

impl<T> Clone for DataNode<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> DataNode<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Creates an unsynchronized cache for `path` on `manager`.
    ///
    /// Nothing is read until [`sync`](Self::sync) or [`monitor`](Self::monitor).
    pub fn create<D>(
        manager: &ConnectionManager,
        path: impl Into<String>,
        deserializer: D,
    ) -> Result<Self, ConfigError>
    where
        D: NodeDeserializer<T>,
    {
        let path = path.into();
        if path.trim().is_empty() {
            return Err(ConfigError::EmptyPath);
        }

        let inner = Arc::new_cyclic(|weak: &Weak<NodeInner<T>>| NodeInner {
            path: path.clone(),
            manager: Mutex::new(Some(manager.clone())),
            deserializer: Arc::new(deserializer),
            backoff: manager.backoff().clone(),
            state: Mutex::new(NodeState {
                value: None,
                mzxid: None,
                listener: None,
            }),
            refresh: AsyncMutex::new(()),
            destroyed: AtomicBool::new(false),
            token: manager.cancellation_token().child_token(),
            watcher: Arc::new(NodeWatcher {
                node: Weak::clone(weak),
            }),
            expiration: Arc::new(NodeExpiration {
                node: Weak::clone(weak),
                path,
            }),
        });
        Ok(Self { inner })
    }

    /// Registers for session expiry and arms the watch.
    ///
    /// - `true`: retries transient failures until the watch is armed, failing
    ///   only on a non-retryable error, exhaustion, or cancellation by
    ///   [`destroy`](Self::destroy) / manager destruction.
    /// - `false`: one attempt. On failure a background re-arm is scheduled and
    ///   [`DataError::SyncFailed`] is returned.
    pub async fn sync(&self, retry_until_success: bool) -> Result<(), DataError> {
        let manager = self.inner.manager()?;
        manager.register_expiration_handler(Arc::clone(&self.inner.expiration));

        if retry_until_success {
            return self.inner.refresh_with_retry().await;
        }

        match self.inner.refresh().await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(path = %self.inner.path, error = %err, "sync failed; re-arming in background");
                self.inner.schedule_refresh();
                Err(DataError::SyncFailed {
                    path: self.inner.path.clone(),
                    source: Box::new(err),
                })
            }
        }
    }

    /// Last cached value; `None` if the node is absent or not yet read.
    pub fn get_data(&self) -> Option<T> {
        self.inner.state.lock().value.clone()
    }

    /// Installs `listener` from the background worker.
    ///
    /// The job re-arms the watch (retrying), then calls the listener once with
    /// `(expected, current)` if they differ, then installs it for later changes.
    /// A previously installed listener is replaced.
    pub fn monitor(
        &self,
        expected: Option<T>,
        listener: Arc<dyn DataListener<T>>,
    ) -> Result<(), DataError> {
        let manager = self.inner.manager()?;
        manager.register_expiration_handler(Arc::clone(&self.inner.expiration));

        let weak = Arc::downgrade(&self.inner);
        manager
            .add_background_job(async move {
                let Some(node) = weak.upgrade() else {
                    return Ok(());
                };
                match node.refresh_with_retry().await {
                    Ok(()) => node.install_listener(expected, listener).await,
                    Err(err) => node.log_gave_up(&err, "listener not installed"),
                }
                Ok(())
            })
            .map_err(|_| DataError::Destroyed)
    }

    /// Stops watching: deregisters from the manager, cancels pending backoffs,
    /// drops the value and the listener. Idempotent.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.token.cancel();

        let manager = self.inner.manager.lock().take();
        if let Some(manager) = manager {
            manager.unregister_expiration_handler(&self.inner.expiration);
        }

        let mut state = self.inner.state.lock();
        state.value = None;
        state.listener = None;
        drop(state);

        info!(path = %self.inner.path, "node cache destroyed");
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    /// True once a [`monitor`](Self::monitor) job has installed its listener.
    pub fn listener_installed(&self) -> bool {
        self.inner.state.lock().listener.is_some()
    }
}

impl<T> NodeInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn manager(&self) -> Result<ConnectionManager, DataError> {
        if self.is_destroyed() {
            return Err(DataError::Destroyed);
        }
        self.manager.lock().clone().ok_or(DataError::Destroyed)
    }

    /// Refreshes until the watch is armed; transient failures are retried.
    async fn refresh_with_retry(&self) -> Result<(), DataError> {
        self.backoff
            .do_until_success(&self.token, || self.attempt())
            .await
            .map_err(DataError::from)
    }

    async fn attempt(&self) -> Result<bool, DataError> {
        match self.refresh().await {
            Ok(()) => Ok(true),
            Err(err) if err.is_retryable() => {
                info!(path = %self.path, error = %err, "refresh failed; retrying");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// One serialized fetch-and-rearm.
    async fn refresh(&self) -> Result<(), DataError> {
        let _serial = self.refresh.lock().await;

        loop {
            let manager = self.manager()?;
            let session = manager.get().await?;

            match session
                .get_data(&self.path, Some(Arc::clone(&self.watcher)))
                .await
            {
                Ok((bytes, stat)) => {
                    let value = self.deserializer.deserialize(&bytes)?;
                    self.publish(Some(value), Some(stat.mzxid));
                    return Ok(());
                }
                Err(err) if err.code == ErrorCode::NoNode => {}
                Err(err) => return Err(Self::server_failure(&manager, &session, err)),
            }

            let present = session
                .exists(&self.path, Some(Arc::clone(&self.watcher)))
                .await
                .map_err(|err| Self::server_failure(&manager, &session, err))?;
            match present {
                None => {
                    debug!(path = %self.path, "node absent; watching for creation");
                    self.publish(None, None);
                    return Ok(());
                }
                Some(_) => debug!(path = %self.path, "node reappeared; reading again"),
            }
        }
    }

    /// An expired session is dropped from the manager so the next attempt
    /// reconnects instead of reusing it.
    fn server_failure(
        manager: &ConnectionManager,
        session: &SessionRef,
        err: ServerError,
    ) -> DataError {
        if err.code == ErrorCode::SessionExpired && manager.invalidate(session) {
            debug!(path = %err.path, "expired session dropped");
        }
        err.into()
    }

    /// Applies a fresh read and notifies the listener if the value changed.
    fn publish(&self, fresh: Option<T>, mzxid: Option<i64>) {
        if let Some(change) = self.apply(fresh, mzxid) {
            if self.is_destroyed() {
                return;
            }
            change
                .listener
                .data_changed(change.old.as_ref(), change.new.as_ref());
        }
    }

    fn apply(&self, fresh: Option<T>, mzxid: Option<i64>) -> Option<Change<T>> {
        let mut state = self.state.lock();
        if self.is_destroyed() {
            return None;
        }

        if let (Some(last), Some(seen)) = (state.mzxid, mzxid) {
            if seen < last || (seen == last && state.value.is_none()) {
                debug!(path = %self.path, mzxid = seen, last, "stale read discarded");
                return None;
            }
        }
        if mzxid.is_some() {
            state.mzxid = mzxid;
        }

        if state.value == fresh {
            return None;
        }
        let old = std::mem::replace(&mut state.value, fresh.clone());
        debug!(path = %self.path, present = fresh.is_some(), "cached value changed");

        state.listener.clone().map(|listener| Change {
            listener,
            old,
            new: fresh,
        })
    }

    async fn install_listener(&self, expected: Option<T>, listener: Arc<dyn DataListener<T>>) {
        let _serial = self.refresh.lock().await;

        let current = {
            let mut state = self.state.lock();
            if self.is_destroyed() {
                return;
            }
            state.listener = Some(Arc::clone(&listener));
            state.value.clone()
        };
        debug!(path = %self.path, "listener installed");

        if current != expected && !self.is_destroyed() {
            listener.data_changed(expected.as_ref(), current.as_ref());
        }
    }

    fn log_gave_up(&self, err: &DataError, consequence: &str) {
        match err {
            DataError::Cancelled | DataError::Destroyed => {
                debug!(path = %self.path, error = %err, "refresh abandoned; {consequence}")
            }
            _ => error!(path = %self.path, error = %err, "refresh gave up; {consequence}"),
        }
    }
}

impl<T> NodeInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Enqueues a retrying refresh on the manager's worker.
    fn schedule_refresh(self: &Arc<Self>) {
        let Ok(manager) = self.manager() else {
            return;
        };
        let weak = Arc::downgrade(self);
        let scheduled = manager.add_background_job(async move {
            let Some(node) = weak.upgrade() else {
                return Ok(());
            };
            if node.is_destroyed() {
                return Ok(());
            }
            if let Err(err) = node.refresh_with_retry().await {
                node.log_gave_up(&err, "cached value left as is");
            }
            Ok(())
        });
        if scheduled.is_err() {
            debug!(path = %self.path, "manager destroyed; refresh not scheduled");
        }
    }
}

/// Watch callback shared by every refresh of one node.
struct NodeWatcher<T> {
    node: Weak<NodeInner<T>>,
}

impl<T> Watcher for NodeWatcher<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn process(&self, event: WatchedEvent) {
        let Some(node) = self.node.upgrade() else {
            return;
        };
        if node.is_destroyed() {
            debug!(path = %node.path, %event, "delivery to destroyed node ignored");
            return;
        }
        if event.path.as_deref() != Some(node.path.as_str()) {
            return;
        }
        match event.event_type {
            EventType::NodeCreated | EventType::NodeDeleted | EventType::NodeDataChanged => {
                debug!(path = %node.path, %event, "watch fired; scheduling refresh");
                node.schedule_refresh();
            }
            EventType::NodeChildrenChanged | EventType::None => {}
        }
    }
}

/// Re-establishes the node's watch after its session expired.
struct NodeExpiration<T> {
    node: Weak<NodeInner<T>>,
    path: String,
}

#[async_trait]
impl<T> ExpirationHandler for NodeExpiration<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    async fn on_session_expired(&self) -> Result<(), BoxError> {
        let Some(node) = self.node.upgrade() else {
            return Ok(());
        };
        if node.is_destroyed() {
            return Ok(());
        }
        info!(path = %self.path, "session expired; re-establishing watch");
        match node.refresh_with_retry().await {
            Ok(()) | Err(DataError::Cancelled) | Err(DataError::Destroyed) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn name(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl<T> DataCache<T> for DataNode<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    async fn sync(&self, retry_until_success: bool) -> Result<(), DataError> {
        DataNode::sync(self, retry_until_success).await
    }

    fn get_data(&self) -> Option<T> {
        DataNode::get_data(self)
    }

    fn monitor(
        &self,
        expected: Option<T>,
        listener: Arc<dyn DataListener<T>>,
    ) -> Result<(), DataError> {
        DataNode::monitor(self, expected, listener)
    }

    fn destroy(&self) {
        DataNode::destroy(self)
    }

    fn path(&self) -> &str {
        DataNode::path(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Utf8Deserializer;
    use crate::config::Config;
    use crate::error::{CloseError, ConnectionError, DeserializeError};
    use async_trait::async_trait;
    use crate::session::{Connector, MemoryEnsemble, Session, Stat};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tracing_test::traced_test;

    const PATH: &str = "/service/config";

    type Calls = Arc<Mutex<Vec<(Option<String>, Option<String>)>>>;

    fn manager(ens: &MemoryEnsemble) -> ConnectionManager {
        let cfg = Config::new("mem:2181")
            .with_backoff(Duration::from_millis(100), Duration::from_secs(2));
        ConnectionManager::new(cfg, Arc::new(ens.clone())).unwrap()
    }

    fn node(m: &ConnectionManager) -> DataNode<String> {
        DataNode::create(m, PATH, Utf8Deserializer).unwrap()
    }

    fn recorder() -> (Calls, Arc<dyn DataListener<String>>) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let listener = move |old: Option<&String>, new: Option<&String>| {
            sink.lock().push((old.cloned(), new.cloned()));
        };
        (calls, Arc::new(listener))
    }

    fn s(v: &str) -> Option<String> {
        Some(v.to_string())
    }

    /// Connection events of its sessions never reach the manager.
    struct MuteConnector(MemoryEnsemble);

    struct Mute;

    impl Watcher for Mute {
        fn process(&self, _event: WatchedEvent) {}
    }

    #[async_trait]
    impl Connector for MuteConnector {
        async fn connect(
            &self,
            servers: &str,
            session_timeout: Duration,
            _watcher: WatcherRef,
        ) -> Result<SessionRef, ConnectionError> {
            self.0.connect(servers, session_timeout, Arc::new(Mute)).await
        }
    }

    /// Reads take 10ms; tracks how many are in flight at once.
    #[derive(Clone, Default)]
    struct Gauge {
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    struct SlowConnector {
        ens: MemoryEnsemble,
        gauge: Gauge,
    }

    struct SlowSession {
        inner: SessionRef,
        gauge: Gauge,
    }

    #[async_trait]
    impl Connector for SlowConnector {
        async fn connect(
            &self,
            servers: &str,
            session_timeout: Duration,
            watcher: WatcherRef,
        ) -> Result<SessionRef, ConnectionError> {
            let inner = self.ens.connect(servers, session_timeout, watcher).await?;
            Ok(Arc::new(SlowSession {
                inner,
                gauge: self.gauge.clone(),
            }))
        }
    }

    #[async_trait]
    impl Session for SlowSession {
        fn session_id(&self) -> i64 {
            self.inner.session_id()
        }

        fn add_auth(&self, scheme: &str, token: &[u8]) {
            self.inner.add_auth(scheme, token)
        }

        async fn get_data(
            &self,
            path: &str,
            watch: Option<WatcherRef>,
        ) -> Result<(Vec<u8>, Stat), ServerError> {
            let now = self.gauge.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.gauge.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            let res = self.inner.get_data(path, watch).await;
            self.gauge.in_flight.fetch_sub(1, Ordering::SeqCst);
            res
        }

        async fn exists(
            &self,
            path: &str,
            watch: Option<WatcherRef>,
        ) -> Result<Option<Stat>, ServerError> {
            self.inner.exists(path, watch).await
        }

        async fn close(&self) -> Result<(), CloseError> {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn test_config_lifecycle_notifies_each_change_once() {
        let ens = MemoryEnsemble::new();
        ens.create(PATH, "v1").unwrap();
        let m = manager(&ens);
        let n = node(&m);

        n.sync(true).await.unwrap();
        assert_eq!(n.get_data(), s("v1"));

        let (calls, listener) = recorder();
        n.monitor(n.get_data(), listener).unwrap();
        m.flush().await;
        assert!(n.listener_installed());
        assert!(calls.lock().is_empty());

        ens.set_data(PATH, "v2").unwrap();
        m.flush().await;
        assert_eq!(n.get_data(), s("v2"));

        ens.delete(PATH).unwrap();
        m.flush().await;
        assert_eq!(n.get_data(), None);
        assert_eq!(ens.watch_count(PATH), 1, "creation watch armed");

        ens.create(PATH, "v3").unwrap();
        m.flush().await;
        assert_eq!(n.get_data(), s("v3"));

        assert_eq!(
            *calls.lock(),
            vec![
                (s("v1"), s("v2")),
                (s("v2"), None),
                (None, s("v3")),
            ]
        );
    }

    #[tokio::test]
    async fn test_unchanged_value_does_not_notify() {
        let ens = MemoryEnsemble::new();
        ens.create(PATH, "same").unwrap();
        let m = manager(&ens);
        let n = node(&m);
        n.sync(true).await.unwrap();
        let (calls, listener) = recorder();
        n.monitor(s("same"), listener).unwrap();
        m.flush().await;

        ens.set_data(PATH, "same").unwrap();
        m.flush().await;

        assert!(calls.lock().is_empty());
        assert_eq!(ens.watch_count(PATH), 1, "watch re-armed");
    }

    #[tokio::test]
    async fn test_monitor_reports_stale_snapshot() {
        let ens = MemoryEnsemble::new();
        ens.create(PATH, "v1").unwrap();
        let m = manager(&ens);
        let n = node(&m);
        let (calls, listener) = recorder();

        n.monitor(s("v0"), listener).unwrap();
        m.flush().await;

        assert_eq!(*calls.lock(), vec![(s("v0"), s("v1"))]);
        assert_eq!(n.get_data(), s("v1"));
        assert_eq!(m.expiration_handler_count(), 1);
    }

    #[tokio::test]
    async fn test_sync_on_missing_node_recovers_on_creation() {
        let ens = MemoryEnsemble::new();
        let m = manager(&ens);
        let n = node(&m);

        n.sync(true).await.unwrap();
        assert_eq!(n.get_data(), None);
        assert_eq!(ens.watch_count(PATH), 1);

        let (calls, listener) = recorder();
        n.monitor(None, listener).unwrap();
        m.flush().await;
        assert!(calls.lock().is_empty());

        ens.create(PATH, "v1").unwrap();
        m.flush().await;
        assert_eq!(n.get_data(), s("v1"));
        assert_eq!(*calls.lock(), vec![(None, s("v1"))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshes_serialized_per_node() {
        let ens = MemoryEnsemble::new();
        ens.create(PATH, "v1").unwrap();
        ens.create("/service/other", "o1").unwrap();
        let gauge = Gauge::default();
        let connector = Arc::new(SlowConnector {
            ens: ens.clone(),
            gauge: gauge.clone(),
        });
        let m = ConnectionManager::new(Config::new("mem:2181"), connector).unwrap();
        let n = node(&m);
        n.sync(true).await.unwrap();
        let (calls, listener) = recorder();
        n.monitor(n.get_data(), listener).unwrap();
        m.flush().await;

        ens.set_data(PATH, "v2").unwrap();
        let (a, b) = tokio::join!(n.sync(true), n.sync(true));
        a.unwrap();
        b.unwrap();
        m.flush().await;

        assert_eq!(gauge.peak.load(Ordering::SeqCst), 1, "refreshes overlapped");
        assert_eq!(*calls.lock(), vec![(s("v1"), s("v2"))]);

        ens.set_data(PATH, "v3").unwrap();
        m.flush().await;
        assert_eq!(
            *calls.lock(),
            vec![(s("v1"), s("v2")), (s("v2"), s("v3"))]
        );

        let other = DataNode::create(&m, "/service/other", Utf8Deserializer).unwrap();
        gauge.peak.store(0, Ordering::SeqCst);
        let (a, b) = tokio::join!(n.sync(true), other.sync(true));
        a.unwrap();
        b.unwrap();
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 2, "nodes refresh independently");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_session_replaced_without_expiry_event() {
        let ens = MemoryEnsemble::new();
        ens.create(PATH, "v1").unwrap();
        let cfg = Config::new("mem:2181")
            .with_backoff(Duration::from_millis(100), Duration::from_secs(2));
        let m = ConnectionManager::new(cfg, Arc::new(MuteConnector(ens.clone()))).unwrap();
        let n = node(&m);
        n.sync(true).await.unwrap();

        let first = m.current().unwrap().session_id();
        ens.expire_session(first);
        assert!(m.is_connected(), "expiry event was not delivered");
        ens.set_data(PATH, "v2").unwrap();

        n.sync(true).await.unwrap();
        m.flush().await;

        assert_eq!(n.get_data(), s("v2"));
        assert_ne!(m.current().unwrap().session_id(), first);
        assert_eq!(ens.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_retries_transient_errors() {
        let ens = MemoryEnsemble::new();
        ens.create(PATH, "v1").unwrap();
        let m = manager(&ens);
        let n = node(&m);
        ens.fail_next_requests(ErrorCode::ConnectionLoss, 2);

        let start = tokio::time::Instant::now();
        n.sync(true).await.unwrap();

        assert_eq!(n.get_data(), s("v1"));
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_sync_stops_on_non_retryable_error() {
        let ens = MemoryEnsemble::new();
        ens.create(PATH, "v1").unwrap();
        let m = manager(&ens);
        let n = node(&m);
        ens.fail_next_requests(ErrorCode::NoAuth, 1);

        let err = n.sync(true).await.unwrap_err();
        assert!(matches!(
            err,
            DataError::Server(ServerError {
                code: ErrorCode::NoAuth,
                ..
            })
        ));
        assert_eq!(n.get_data(), None);
    }

    #[tokio::test]
    async fn test_sync_surfaces_deserialize_error() {
        let ens = MemoryEnsemble::new();
        ens.create(PATH, vec![0xff, 0xfe]).unwrap();
        let m = manager(&ens);
        let n = node(&m);

        let err = n.sync(true).await.unwrap_err();
        assert!(matches!(err, DataError::Deserialize(_)));
    }

    #[tokio::test]
    async fn test_fast_fail_sync_rearms_in_background() {
        let ens = MemoryEnsemble::new();
        ens.create(PATH, "v1").unwrap();
        let m = manager(&ens);
        let n = node(&m);
        ens.fail_next_requests(ErrorCode::OperationTimeout, 1);

        let err = n.sync(false).await.unwrap_err();
        match err {
            DataError::SyncFailed { path, source } => {
                assert_eq!(path, PATH);
                assert!(source.is_retryable());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(n.get_data(), None);

        m.flush().await;
        assert_eq!(n.get_data(), s("v1"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_session_expiry_recovers_watch() {
        let ens = MemoryEnsemble::new();
        ens.create(PATH, "v1").unwrap();
        let m = manager(&ens);
        let n = node(&m);
        n.sync(true).await.unwrap();
        let (calls, listener) = recorder();
        n.monitor(n.get_data(), listener).unwrap();
        m.flush().await;

        let old = m.current().unwrap().session_id();
        ens.expire_session(old);
        ens.set_data(PATH, "v2").unwrap();
        m.flush().await;

        assert_eq!(n.get_data(), s("v2"));
        assert_ne!(m.current().unwrap().session_id(), old);
        assert!(logs_contain("re-establishing watch"));

        ens.set_data(PATH, "v3").unwrap();
        m.flush().await;
        assert_eq!(n.get_data(), s("v3"));
        assert_eq!(*calls.lock(), vec![(s("v1"), s("v2")), (s("v2"), s("v3"))]);
    }

    #[tokio::test]
    async fn test_destroy_is_final_and_idempotent() {
        let ens = MemoryEnsemble::new();
        ens.create(PATH, "v1").unwrap();
        let m = manager(&ens);
        let n = node(&m);
        n.sync(true).await.unwrap();
        let (calls, listener) = recorder();
        n.monitor(n.get_data(), listener).unwrap();
        m.flush().await;

        n.destroy();
        n.destroy();

        ens.set_data(PATH, "v2").unwrap();
        m.flush().await;

        assert!(n.is_destroyed());
        assert_eq!(n.get_data(), None);
        assert!(!n.listener_installed());
        assert!(calls.lock().is_empty());
        assert_eq!(m.expiration_handler_count(), 0);
        assert!(matches!(n.sync(true).await, Err(DataError::Destroyed)));
        assert!(matches!(
            n.monitor(None, recorder().1),
            Err(DataError::Destroyed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_cancels_backoff() {
        let ens = MemoryEnsemble::new();
        ens.create(PATH, "v1").unwrap();
        let m = manager(&ens);
        let n = node(&m);
        ens.fail_next_requests(ErrorCode::ConnectionLoss, 1_000);

        let syncing = n.clone();
        let task = tokio::spawn(async move { syncing.sync(true).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        n.destroy();

        let res = task.await.unwrap();
        assert!(matches!(res, Err(DataError::Cancelled)));
    }

    #[tokio::test]
    async fn test_stale_reads_discarded() {
        let ens = MemoryEnsemble::new();
        let m = manager(&ens);
        let n = node(&m);
        let (calls, listener) = recorder();
        n.inner.state.lock().listener = Some(listener);

        n.inner.publish(s("new"), Some(5));
        n.inner.publish(s("old"), Some(3));
        assert_eq!(n.get_data(), s("new"));

        n.inner.publish(None, None);
        n.inner.publish(s("new"), Some(5));
        assert_eq!(n.get_data(), None, "same version after deletion is stale");

        n.inner.publish(s("newer"), Some(9));
        assert_eq!(
            *calls.lock(),
            vec![(None, s("new")), (s("new"), None), (None, s("newer"))]
        );
    }

    #[tokio::test]
    async fn test_custom_deserializer_and_path_validation() {
        let ens = MemoryEnsemble::new();
        ens.create("/limits/max", "42").unwrap();
        let m = manager(&ens);

        let parse = |data: &[u8]| -> Result<u32, DeserializeError> {
            std::str::from_utf8(data)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| DeserializeError::new("not a number"))
        };
        let limit = DataNode::create(&m, "/limits/max", parse).unwrap();
        limit.sync(true).await.unwrap();
        assert_eq!(limit.get_data(), Some(42));
        assert_eq!(limit.path(), "/limits/max");

        assert_eq!(
            DataNode::<String>::create(&m, " ", Utf8Deserializer).err().unwrap(),
            ConfigError::EmptyPath
        );
    }

    #[tokio::test]
    async fn test_usable_through_trait_object() {
        let ens = MemoryEnsemble::new();
        ens.create(PATH, "v1").unwrap();
        let m = manager(&ens);
        let cache: Box<dyn DataCache<String>> = Box::new(node(&m));

        cache.sync(false).await.unwrap();
        assert_eq!(cache.get_data(), s("v1"));
        assert_eq!(cache.path(), PATH);
        cache.destroy();
        assert_eq!(cache.get_data(), None);
    }
}
