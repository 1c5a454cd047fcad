//! A single-worker FIFO queue for remote mutations.
//!
//! Reconciliation mutates state on the remote host with no transactions, so
//! every job runs on one worker, one at a time, in submission order.
//! Submitting never blocks: callers get a [`TaskHandle`] they may await or
//! drop. A job that panics is contained and does not stop the worker.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Default number of queued jobs before [`SerialQueue::submit`] refuses work.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Reasons a job could not be queued or its result collected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue is at capacity.
    #[error("Work queue is full")]
    Full,

    /// The worker has stopped.
    #[error("Work queue is closed")]
    Closed,

    /// The job panicked or was dropped before completing.
    #[error("Queued job did not complete")]
    Abandoned,
}

/// Completion handle for a queued job.
#[derive(Debug)]
pub struct TaskHandle<T> {
    receiver: oneshot::Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Waits for the job to finish and returns its output.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Abandoned`] if the job panicked or the worker
    /// shut down before running it.
    pub async fn wait(self) -> Result<T, QueueError> {
        self.receiver.await.map_err(|_| QueueError::Abandoned)
    }
}

/// Runs submitted futures one at a time on a background worker.
#[derive(Debug)]
pub struct SerialQueue {
    sender: mpsc::Sender<Job>,
    worker: JoinHandle<()>,
}

impl SerialQueue {
    /// Starts the worker. Must be called inside a Tokio runtime.
    pub fn start(capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Job>(capacity.max(1));
        let worker = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                // Each job gets its own task so a panic is caught by the join.
                if let Err(err) = tokio::spawn(job).await {
                    error!(error = %err, "Queued job panicked");
                }
            }
            debug!("Work queue drained");
        });
        Self { sender, worker }
    }

    /// Queues `job` and returns a handle to its output.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Full`] when at capacity and
    /// [`QueueError::Closed`] once the worker is gone.
    pub fn submit<F, T>(&self, job: F) -> Result<TaskHandle<T>, QueueError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let wrapped: Job = Box::pin(async move {
            let output = job.await;
            // The caller may have dropped the handle.
            let _ = tx.send(output);
        });
        self.sender.try_send(wrapped).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })?;
        Ok(TaskHandle { receiver: rx })
    }

    /// Jobs waiting to run, excluding the one in progress.
    pub fn pending(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Stops accepting work and waits for queued jobs to finish.
    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(err) = self.worker.await {
            error!(error = %err, "Work queue worker failed");
        }
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
