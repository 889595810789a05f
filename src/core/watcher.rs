//! # ConnectionWatcher: the manager's session-level callback.
//!
//! One watcher is created per established session and remembers that
//! session's generation. It runs on the service's notification thread, so it
//! only logs, swaps the handle slot and enqueues work.
//!
//! | State          | Action                                              |
//! |----------------|-----------------------------------------------------|
//! | `SyncConnected`| log                                                 |
//! | `Disconnected` | log; the service reconnects the transport itself    |
//! | `Expired`      | record, detach handle, enqueue close + fan-out      |
//! | `Connecting`   | debug log                                           |
//!
//! Every `Expired` is recorded against its generation. One for a session that
//! is not published yet keeps `get()` from publishing it; one for a superseded
//! generation changes nothing else.

use std::sync::Weak;

use tracing::{debug, info, warn};

use super::manager::Inner;
use crate::session::{KeeperState, WatchedEvent, Watcher};

pub(crate) struct ConnectionWatcher {
    inner: Weak<Inner>,
    generation: u64,
}

impl ConnectionWatcher {
    pub(super) fn new(inner: Weak<Inner>, generation: u64) -> Self {
        Self { inner, generation }
    }

    fn on_expired(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        inner.mark_expired(self.generation);
        let Some(session) = inner.detach(self.generation) else {
            debug!(
                generation = self.generation,
                "expiration of an unpublished or superseded session noted"
            );
            return;
        };

        warn!(
            session_id = session.session_id(),
            generation = self.generation,
            "session expired; scheduling expiration handlers"
        );
        inner.schedule_expiry(self.generation, Some(session));
    }
}

impl Watcher for ConnectionWatcher {
    fn process(&self, event: WatchedEvent) {
        if event.is_node_event() {
            debug!(%event, "node event on connection watcher ignored");
            return;
        }
        match event.state {
            KeeperState::SyncConnected => {
                info!(generation = self.generation, "session connected")
            }
            KeeperState::Disconnected => info!(
                generation = self.generation,
                "session disconnected; waiting for transport to recover"
            ),
            KeeperState::Expired => self.on_expired(),
            KeeperState::Connecting => debug!(generation = self.generation, "session connecting"),
        }
    }
}
