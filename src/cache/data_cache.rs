//! # DataCache: the node-cache contract.

use std::sync::Arc;

use async_trait::async_trait;

use super::DataListener;
use crate::error::DataError;

/// A locally cached, watch-maintained copy of one node's value.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use keeperline::{ConnectionManager, DataCache, DataNode, Utf8Deserializer};
///
/// # async fn demo(manager: ConnectionManager) -> Result<(), Box<dyn std::error::Error>> {
/// let node = DataNode::create(&manager, "/service/config", Utf8Deserializer)?;
/// let cache: &dyn DataCache<String> = &node;
///
/// cache.sync(true).await?;
/// let snapshot = cache.get_data();
/// cache.monitor(
///     snapshot,
///     Arc::new(|old: Option<&String>, new: Option<&String>| {
///         println!("config changed: {old:?} -> {new:?}");
///     }),
/// )?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait DataCache<T>: Send + Sync {
    /// Arms the watch and loads the value.
    ///
    /// With `retry_until_success`, retries transient failures until armed or
    /// cancelled. Otherwise tries once and, on failure, schedules a background
    /// re-arm before returning the error.
    async fn sync(&self, retry_until_success: bool) -> Result<(), DataError>;

    /// The last cached value; never performs I/O.
    fn get_data(&self) -> Option<T>;

    /// Installs `listener` in the background, first reporting the transition
    /// from `expected` to the current value if they differ.
    fn monitor(
        &self,
        expected: Option<T>,
        listener: Arc<dyn DataListener<T>>,
    ) -> Result<(), DataError>;

    /// Stops watching for good. Idempotent.
    fn destroy(&self);

    /// Path of the watched node.
    fn path(&self) -> &str;
}
