//! # Value-change listener.

/// Notified when a node cache observes a different value.
///
/// Called with the previous and the new value; `None` means the node did not
/// exist. Never called with two equal values.
///
/// Runs on the manager's background worker (or on the task calling
/// `sync(true)`), while the node's refresh is in progress: keep it short.
pub trait DataListener<T>: Send + Sync + 'static {
    fn data_changed(&self, old: Option<&T>, new: Option<&T>);
}

impl<T, F> DataListener<T> for F
where
    F: Fn(Option<&T>, Option<&T>) + Send + Sync + 'static,
{
    fn data_changed(&self, old: Option<&T>, new: Option<&T>) {
        self(old, new)
    }
}
