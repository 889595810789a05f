//! # Notifications delivered by the coordination service.
//!
//! A [`WatchedEvent`] pairs an [`EventType`] (what happened to a node, or
//! [`EventType::None`] for pure connection-state changes) with the
//! [`KeeperState`] of the session at delivery time.
//!
//! ```text
//! EventType::None + KeeperState::SyncConnected  → session (re)connected
//! EventType::None + KeeperState::Disconnected   → transport lost, service retries itself
//! EventType::None + KeeperState::Expired        → session gone, all watches lost
//! EventType::NodeDataChanged + SyncConnected    → one-shot node watch fired
//! ```

use std::fmt;

/// What happened to the watched node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// No node event; the notification only carries a state change.
    None,
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
}

/// Session state at the time the event was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeeperState {
    Connecting,
    SyncConnected,
    Disconnected,
    Expired,
}

/// One notification from the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    pub event_type: EventType,
    pub state: KeeperState,
    /// Node path, absent for state-only events.
    pub path: Option<String>,
}

impl WatchedEvent {
    /// State-only event (`EventType::None`).
    pub fn state(state: KeeperState) -> Self {
        Self {
            event_type: EventType::None,
            state,
            path: None,
        }
    }

    /// Node event delivered on a connected session.
    pub fn node(event_type: EventType, path: impl Into<String>) -> Self {
        Self {
            event_type,
            state: KeeperState::SyncConnected,
            path: Some(path.into()),
        }
    }

    /// True for node events delivered while connected.
    #[inline]
    pub fn is_node_event(&self) -> bool {
        self.state == KeeperState::SyncConnected && self.event_type != EventType::None
    }
}

impl fmt::Display for WatchedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WatchedEvent state:{:?} type:{:?} path:{}",
            self.state,
            self.event_type,
            self.path.as_deref().unwrap_or("-")
        )
    }
}

/// Metadata returned with node reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stat {
    /// Transaction id that created the node.
    pub czxid: i64,
    /// Transaction id of the last modification.
    pub mzxid: i64,
    /// Data version, bumped on every write.
    pub version: i32,
    /// Owning session for ephemeral nodes, `0` otherwise.
    pub ephemeral_owner: i64,
    pub data_length: i32,
}
