//! # ExpirationHandlerSet: registry and isolated fan-out.
//!
//! ## Rules
//! - Identity is pointer identity of the `Arc`; registering the same handler
//!   twice is a no-op.
//! - Fan-out works on a snapshot, so handlers may (un)register while it runs.
//! - Handlers run one after another in registration order.
//! - An `Err` or a panic from one handler is logged; the rest still run.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, error, info};

use super::ExpirationHandler;
use crate::core::panic_message;

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FanOutReport {
    /// Handlers invoked.
    pub invoked: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}

/// Thread-safe set of expiration handlers.
#[derive(Default)]
pub struct ExpirationHandlerSet {
    handlers: RwLock<Vec<Arc<dyn ExpirationHandler>>>,
}

impl ExpirationHandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler. Returns false if it was already registered.
    pub fn register(&self, handler: Arc<dyn ExpirationHandler>) -> bool {
        let mut handlers = self.handlers.write();
        if handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            return false;
        }
        handlers.push(handler);
        true
    }

    /// Removes a handler. Returns false if it was not registered.
    pub fn unregister(&self, handler: &Arc<dyn ExpirationHandler>) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|h| !Arc::ptr_eq(h, handler));
        handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Copy of the currently registered handlers.
    pub fn snapshot(&self) -> Vec<Arc<dyn ExpirationHandler>> {
        self.handlers.read().clone()
    }

    /// Invokes every handler of `handlers` in order, isolating failures.
    pub async fn fan_out(handlers: &[Arc<dyn ExpirationHandler>]) -> FanOutReport {
        let mut report = FanOutReport::default();

        for handler in handlers {
            report.invoked += 1;
            let outcome = AssertUnwindSafe(handler.on_session_expired())
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => debug!(handler = handler.name(), "expiration handler finished"),
                Ok(Err(err)) => {
                    report.failed += 1;
                    error!(handler = handler.name(), error = %err, "expiration handler failed");
                }
                Err(panic) => {
                    report.failed += 1;
                    error!(
                        handler = handler.name(),
                        panic = %panic_message(panic.as_ref()),
                        "expiration handler panicked"
                    );
                }
            }
        }

        info!(
            invoked = report.invoked,
            failed = report.failed,
            "session expiration fan-out complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tracing_test::traced_test;

    enum Behaviour {
        Succeed,
        Fail,
        Panic,
    }

    struct Probe {
        label: &'static str,
        behaviour: Behaviour,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Probe {
        fn new(
            label: &'static str,
            behaviour: Behaviour,
            log: &Arc<Mutex<Vec<&'static str>>>,
        ) -> Arc<dyn ExpirationHandler> {
            Arc::new(Self {
                label,
                behaviour,
                log: Arc::clone(log),
            })
        }
    }

    #[async_trait]
    impl ExpirationHandler for Probe {
        async fn on_session_expired(&self) -> Result<(), BoxError> {
            self.log.lock().push(self.label);
            match self.behaviour {
                Behaviour::Succeed => Ok(()),
                Behaviour::Fail => Err(format!("{} cannot recover", self.label).into()),
                Behaviour::Panic => panic!("{} exploded", self.label),
            }
        }

        fn name(&self) -> &str {
            self.label
        }
    }

    #[test]
    fn test_register_is_idempotent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let set = ExpirationHandlerSet::new();
        let a = Probe::new("a", Behaviour::Succeed, &log);

        assert!(set.register(a.clone()));
        assert!(!set.register(a.clone()));
        assert_eq!(set.len(), 1);

        assert!(set.unregister(&a));
        assert!(!set.unregister(&a));
        assert!(set.is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failures_are_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let set = ExpirationHandlerSet::new();
        set.register(Probe::new("first", Behaviour::Fail, &log));
        set.register(Probe::new("second", Behaviour::Panic, &log));
        set.register(Probe::new("third", Behaviour::Succeed, &log));

        let report = ExpirationHandlerSet::fan_out(&set.snapshot()).await;

        assert_eq!(report, FanOutReport { invoked: 3, failed: 2 });
        assert_eq!(*log.lock(), vec!["first", "second", "third"]);
        assert!(logs_contain("first cannot recover"));
        assert!(logs_contain("second exploded"));
        assert!(logs_contain("session expiration fan-out complete"));
    }

    #[tokio::test]
    async fn test_snapshot_is_detached() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let set = ExpirationHandlerSet::new();
        let a = Probe::new("a", Behaviour::Succeed, &log);
        set.register(a.clone());

        let snapshot = set.snapshot();
        set.unregister(&a);

        let report = ExpirationHandlerSet::fan_out(&snapshot).await;
        assert_eq!(report.invoked, 1);
        assert_eq!(ExpirationHandlerSet::fan_out(&set.snapshot()).await.invoked, 0);
    }
}
