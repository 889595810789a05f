//! # Background job queue with a single worker.
//!
//! [`JobQueue`] owns an unbounded channel and one spawned worker task that
//! drains it strictly in submission order, one job at a time.
//!
//! ```text
//! push(job) ──► [unbounded mpsc] ──► worker ──► job.await (catch_unwind)
//!                                      │            ├─ Ok(())  → debug
//!                                      │            ├─ Err(e)  → error, continue
//!                                      │            └─ panic   → error, continue
//!                                      └─ channel closed and drained → exit
//! ```
//!
//! ## Rules
//! - `push` never blocks and fails only after [`JobQueue::shutdown`].
//! - Jobs never overlap.
//! - Shutdown closes the channel; already queued jobs still run, then the
//!   worker exits and is joined.
//! - Shutdown from inside a job does not join (the worker would wait on itself).

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, warn};

use crate::error::{BoxError, Destroyed};

/// A deferred unit of background work.
pub(crate) type Job = BoxFuture<'static, Result<(), BoxError>>;

tokio::task_local! {
    static ON_WORKER: ();
}

/// True when called from a job running on a [`JobQueue`] worker.
pub(crate) fn on_worker() -> bool {
    ON_WORKER.try_with(|_| ()).is_ok()
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// FIFO queue drained by exactly one worker task.
pub(crate) struct JobQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JobQueue {
    /// Spawns the worker. Must be called within a Tokio runtime.
    ///
    /// The worker inherits the caller's current span.
    pub(crate) fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        let handle = tokio::spawn(async move {
            let mut seq: u64 = 0;
            while let Some(job) = rx.recv().await {
                seq += 1;
                let outcome = ON_WORKER
                    .scope((), AssertUnwindSafe(job).catch_unwind())
                    .await;
                match outcome {
                    Ok(Ok(())) => debug!(job = seq, "background job finished"),
                    Ok(Err(err)) => error!(job = seq, error = %err, "background job failed"),
                    Err(panic) => error!(
                        job = seq,
                        panic = %panic_message(panic.as_ref()),
                        "background job panicked"
                    ),
                }
            }
            debug!(jobs = seq, "background worker stopped");
        }
        .in_current_span());

        Self {
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Enqueues a job behind every previously pushed one.
    pub(crate) fn push(&self, job: Job) -> Result<(), Destroyed> {
        let sender = self.sender.lock();
        let tx = sender.as_ref().ok_or(Destroyed)?;
        tx.send(job).map_err(|_| Destroyed)
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Closes the queue and waits for the worker to drain it.
    ///
    /// Idempotent. Called from a job, it closes without waiting.
    pub(crate) async fn shutdown(&self) {
        drop(self.sender.lock().take());
        let handle = self.worker.lock().take();
        let Some(handle) = handle else {
            return;
        };
        if on_worker() {
            debug!("queue closed from a background job; worker exits after it");
            return;
        }
        if let Err(err) = handle.await {
            warn!(error = %err, "background worker did not stop cleanly");
        }
    }
}
