//! # ConnectionRegistry: one manager per ensemble address.
//!
//! Explicitly owned replacement for a process-wide manager cache. Callers that
//! talk to several ensembles keep one registry and ask it for the manager of a
//! given connect string.
//!
//! ## Rules
//! - `acquire(servers)` returns the live manager for `servers`, creating it on
//!   first use from the registry's template config.
//! - A manager destroyed elsewhere is replaced on the next `acquire`.
//! - `shutdown_all()` removes and destroys every manager, in address order.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use super::manager::ConnectionManager;
use crate::config::Config;
use crate::error::ConfigError;
use crate::session::Connector;

/// Managers keyed by connect string.
pub struct ConnectionRegistry {
    template: Config,
    connector: Arc<dyn Connector>,
    managers: Mutex<HashMap<String, ConnectionManager>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    ///
    /// Every manager gets a copy of `template` with its own `servers`.
    pub fn new(template: Config, connector: Arc<dyn Connector>) -> Self {
        Self {
            template,
            connector,
            managers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the manager for `servers`, creating it if needed.
    ///
    /// Must be called within a Tokio runtime.
    pub fn acquire(&self, servers: &str) -> Result<ConnectionManager, ConfigError> {
        let mut managers = self.managers.lock();
        if let Some(existing) = managers.get(servers).filter(|m| !m.is_destroyed()) {
            return Ok(existing.clone());
        }

        let config = Config {
            servers: servers.to_string(),
            ..self.template.clone()
        };
        let manager = ConnectionManager::new(config, Arc::clone(&self.connector))?;
        managers.insert(servers.to_string(), manager.clone());
        info!(servers, "connection manager registered");
        Ok(manager)
    }

    /// Sorted connect strings of registered managers.
    pub fn addresses(&self) -> Vec<String> {
        let mut names: Vec<String> = self.managers.lock().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.managers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.lock().is_empty()
    }

    /// Destroys and forgets every registered manager.
    pub async fn shutdown_all(&self) {
        let mut drained: Vec<(String, ConnectionManager)> =
            self.managers.lock().drain().collect();
        drained.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        for (servers, manager) in drained {
            manager.destroy().await;
            info!(servers = %servers, "connection manager shut down");
        }
    }
}
