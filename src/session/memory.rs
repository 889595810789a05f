//! # In-memory ensemble.
//!
//! [`MemoryEnsemble`] implements [`Connector`] / [`Session`] over a process-local
//! node tree. It follows the watch semantics of a real ensemble closely enough to
//! drive the caches end to end:
//! - watches are one-shot and deduplicated per session and watcher;
//! - `get_data` on an existing node (or `exists` on an existing node) arms a data
//!   watch fired by `set_data` (`NodeDataChanged`) and `delete` (`NodeDeleted`);
//! - `exists` on a missing node arms a creation watch fired by `create`;
//! - `get_data` on a missing node arms nothing and fails with `NoNode`;
//! - expiring a session drops its watches and delivers `Expired` to its
//!   connection watcher; further requests on it fail with `SessionExpired`.
//!
//! Watchers are invoked synchronously from the mutating call, after the
//! ensemble's lock is released, standing in for the service's notification thread.
//!
//! Faults can be injected: failed connects, failed requests, interrupted closes.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::connector::{Connector, Session, SessionRef};
use super::event::{EventType, KeeperState, Stat, WatchedEvent};
use super::watcher::{WatcherRef, same_watcher};
use crate::error::{CloseError, ConnectionError, ErrorCode, ServerError};

struct Znode {
    data: Vec<u8>,
    stat: Stat,
}

struct SessionSlot {
    watcher: WatcherRef,
    alive: bool,
    auth: Vec<(String, Vec<u8>)>,
}

#[derive(Default)]
struct State {
    nodes: BTreeMap<String, Znode>,
    zxid: i64,
    next_session: i64,
    sessions: HashMap<i64, SessionSlot>,
    data_watches: HashMap<String, Vec<(i64, WatcherRef)>>,
    exist_watches: HashMap<String, Vec<(i64, WatcherRef)>>,
    connect_failures: usize,
    op_failures: VecDeque<ErrorCode>,
    interrupt_close: bool,
    connects: usize,
}

impl State {
    fn next_zxid(&mut self) -> i64 {
        self.zxid += 1;
        self.zxid
    }

    fn arm(
        watches: &mut HashMap<String, Vec<(i64, WatcherRef)>>,
        path: &str,
        session: i64,
        watcher: WatcherRef,
    ) {
        let list = watches.entry(path.to_string()).or_default();
        if !list
            .iter()
            .any(|(s, w)| *s == session && same_watcher(w, &watcher))
        {
            list.push((session, watcher));
        }
    }

    fn take(
        watches: &mut HashMap<String, Vec<(i64, WatcherRef)>>,
        path: &str,
    ) -> Vec<WatcherRef> {
        watches
            .remove(path)
            .unwrap_or_default()
            .into_iter()
            .map(|(_, w)| w)
            .collect()
    }

    fn drop_session_watches(&mut self, session: i64) {
        for list in self
            .data_watches
            .values_mut()
            .chain(self.exist_watches.values_mut())
        {
            list.retain(|(s, _)| *s != session);
        }
    }

    fn check_request(&mut self, session: i64, path: &str) -> Result<(), ServerError> {
        if let Some(code) = self.op_failures.pop_front() {
            return Err(ServerError::new(code, path));
        }
        match self.sessions.get(&session) {
            Some(slot) if slot.alive => Ok(()),
            _ => Err(ServerError::new(ErrorCode::SessionExpired, path)),
        }
    }
}

/// `Stat::data_length`, saturating for payloads past `i32::MAX` bytes.
fn data_length(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}

fn deliver(watchers: Vec<WatcherRef>, event: WatchedEvent) {
    for w in watchers {
        w.process(event.clone());
    }
}

/// Process-local ensemble. Cheap to clone; clones share the same tree.
#[derive(Clone, Default)]
pub struct MemoryEnsemble {
    state: Arc<Mutex<State>>,
}

impl MemoryEnsemble {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a node, firing creation watches.
    pub fn create(&self, path: &str, data: impl Into<Vec<u8>>) -> Result<Stat, ServerError> {
        let (stat, fired) = {
            let mut st = self.state.lock();
            if st.nodes.contains_key(path) {
                return Err(ServerError::new(ErrorCode::NodeExists, path));
            }
            let data = data.into();
            let zxid = st.next_zxid();
            let stat = Stat {
                czxid: zxid,
                mzxid: zxid,
                version: 0,
                ephemeral_owner: 0,
                data_length: data_length(data.len()),
            };
            st.nodes.insert(path.to_string(), Znode { data, stat });
            (stat, State::take(&mut st.exist_watches, path))
        };
        deliver(fired, WatchedEvent::node(EventType::NodeCreated, path));
        Ok(stat)
    }

    /// Replaces node data, firing data watches.
    pub fn set_data(&self, path: &str, data: impl Into<Vec<u8>>) -> Result<Stat, ServerError> {
        let (stat, fired) = {
            let mut st = self.state.lock();
            let zxid = st.next_zxid();
            let node = st
                .nodes
                .get_mut(path)
                .ok_or_else(|| ServerError::new(ErrorCode::NoNode, path))?;
            node.data = data.into();
            node.stat.mzxid = zxid;
            node.stat.version += 1;
            node.stat.data_length = data_length(node.data.len());
            let stat = node.stat;
            (stat, State::take(&mut st.data_watches, path))
        };
        deliver(fired, WatchedEvent::node(EventType::NodeDataChanged, path));
        Ok(stat)
    }

    /// Removes a node, firing data watches.
    pub fn delete(&self, path: &str) -> Result<(), ServerError> {
        let fired = {
            let mut st = self.state.lock();
            if st.nodes.remove(path).is_none() {
                return Err(ServerError::new(ErrorCode::NoNode, path));
            }
            st.next_zxid();
            State::take(&mut st.data_watches, path)
        };
        deliver(fired, WatchedEvent::node(EventType::NodeDeleted, path));
        Ok(())
    }

    /// Current node data, without arming anything.
    pub fn data(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().nodes.get(path).map(|n| n.data.clone())
    }

    /// Expires one session: its watches are dropped and its connection
    /// watcher receives `Expired`. Returns false if the session is unknown.
    pub fn expire_session(&self, session_id: i64) -> bool {
        let watcher = {
            let mut st = self.state.lock();
            let Some(slot) = st.sessions.get_mut(&session_id) else {
                return false;
            };
            slot.alive = false;
            let watcher = slot.watcher.clone();
            st.drop_session_watches(session_id);
            watcher
        };
        watcher.process(WatchedEvent::state(KeeperState::Expired));
        true
    }

    /// Expires every live session. Returns how many were expired.
    pub fn expire_all(&self) -> usize {
        let ids = self.live_sessions();
        ids.iter().filter(|id| self.expire_session(**id)).count()
    }

    /// Delivers a state-only event to every live session's connection watcher.
    pub fn broadcast_state(&self, state: KeeperState) {
        let watchers: Vec<WatcherRef> = self
            .state
            .lock()
            .sessions
            .values()
            .filter(|s| s.alive)
            .map(|s| s.watcher.clone())
            .collect();
        deliver(watchers, WatchedEvent::state(state));
    }

    /// Makes the next `n` connect attempts fail with a transport error.
    pub fn fail_next_connects(&self, n: usize) {
        self.state.lock().connect_failures = n;
    }

    /// Makes the next `n` requests fail with `code`.
    pub fn fail_next_requests(&self, code: ErrorCode, n: usize) {
        let mut st = self.state.lock();
        st.op_failures.extend(std::iter::repeat_n(code, n));
    }

    /// Makes the next session close report an interruption.
    pub fn interrupt_next_close(&self) {
        self.state.lock().interrupt_close = true;
    }

    /// Number of sessions successfully established so far.
    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    /// Ids of sessions that are neither closed nor expired, ascending.
    pub fn live_sessions(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .state
            .lock()
            .sessions
            .iter()
            .filter(|(_, s)| s.alive)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Credentials attached to a session.
    pub fn auth_of(&self, session_id: i64) -> Vec<(String, Vec<u8>)> {
        self.state
            .lock()
            .sessions
            .get(&session_id)
            .map(|s| s.auth.clone())
            .unwrap_or_default()
    }

    /// Number of armed watches (data + creation) on `path`.
    pub fn watch_count(&self, path: &str) -> usize {
        let st = self.state.lock();
        st.data_watches.get(path).map_or(0, Vec::len)
            + st.exist_watches.get(path).map_or(0, Vec::len)
    }
}

#[async_trait]
impl Connector for MemoryEnsemble {
    async fn connect(
        &self,
        servers: &str,
        _session_timeout: Duration,
        watcher: WatcherRef,
    ) -> Result<SessionRef, ConnectionError> {
        let id = {
            let mut st = self.state.lock();
            if st.connect_failures > 0 {
                st.connect_failures -= 1;
                return Err(ConnectionError::Transport {
                    servers: servers.to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            st.next_session += 1;
            st.connects += 1;
            let id = st.next_session;
            st.sessions.insert(
                id,
                SessionSlot {
                    watcher: watcher.clone(),
                    alive: true,
                    auth: Vec::new(),
                },
            );
            id
        };
        watcher.process(WatchedEvent::state(KeeperState::SyncConnected));
        Ok(Arc::new(MemorySession {
            id,
            state: Arc::clone(&self.state),
        }))
    }
}

/// Session handle issued by [`MemoryEnsemble`].
pub struct MemorySession {
    id: i64,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl Session for MemorySession {
    fn session_id(&self) -> i64 {
        self.id
    }

    fn add_auth(&self, scheme: &str, token: &[u8]) {
        if let Some(slot) = self.state.lock().sessions.get_mut(&self.id) {
            slot.auth.push((scheme.to_string(), token.to_vec()));
        }
    }

    async fn get_data(
        &self,
        path: &str,
        watch: Option<WatcherRef>,
    ) -> Result<(Vec<u8>, Stat), ServerError> {
        let mut st = self.state.lock();
        st.check_request(self.id, path)?;
        let (data, stat) = match st.nodes.get(path) {
            Some(node) => (node.data.clone(), node.stat),
            None => return Err(ServerError::new(ErrorCode::NoNode, path)),
        };
        if let Some(w) = watch {
            State::arm(&mut st.data_watches, path, self.id, w);
        }
        Ok((data, stat))
    }

    async fn exists(
        &self,
        path: &str,
        watch: Option<WatcherRef>,
    ) -> Result<Option<Stat>, ServerError> {
        let mut st = self.state.lock();
        st.check_request(self.id, path)?;
        let stat = st.nodes.get(path).map(|n| n.stat);
        if let Some(w) = watch {
            match stat {
                Some(_) => State::arm(&mut st.data_watches, path, self.id, w),
                None => State::arm(&mut st.exist_watches, path, self.id, w),
            }
        }
        Ok(stat)
    }

    async fn close(&self) -> Result<(), CloseError> {
        let mut st = self.state.lock();
        st.sessions.remove(&self.id);
        st.drop_session_watches(self.id);
        if std::mem::take(&mut st.interrupt_close) {
            return Err(CloseError::Interrupted);
        }
        Ok(())
    }
}
