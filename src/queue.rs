//! Launch Queue (§4.7): a strict FIFO admission channel in front of
//! Orchestration, so at most one launch sequence runs at a time. Grounded on
//! the reference codebase's single-worker `tokio::sync::mpsc` pattern, with a
//! `oneshot` completion channel standing in for its promise-chain.

use crate::error::QueueError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// A unit of work submitted to the queue. The worker checks `cancelled`
/// immediately before running `task`, so a cancel issued while still queued
/// never executes the job (§4.7).
struct Job<T> {
    task: Box<dyn FnOnce() -> T + Send + 'static>,
    cancelled: Arc<AtomicBool>,
    reply: oneshot::Sender<Result<T, QueueError>>,
}

/// Handle returned by `enqueue`.
pub struct PendingJob<T> {
    completion: oneshot::Receiver<Result<T, QueueError>>,
    cancelled: Arc<AtomicBool>,
}

impl<T> PendingJob<T> {
    pub async fn wait(self) -> Result<T, QueueError> {
        self.completion.await.unwrap_or(Err(QueueError::Cancelled))
    }

    /// Marks the job cancelled. If it is still in the queue, the worker
    /// rejects it with `Cancelled` instead of running it. If it has already
    /// started (or finished) running, this has no effect (§4.7).
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

pub struct LaunchQueue {
    sender: mpsc::UnboundedSender<Job<()>>,
    length: Arc<AtomicUsize>,
}

impl LaunchQueue {
    /// Spawns the single worker task. The queue outlives individual callers;
    /// drop it (or let it leak with the orchestrator's lifetime) to stop
    /// accepting new work.
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job<()>>();
        let length = Arc::new(AtomicUsize::new(0));
        let worker_length = Arc::clone(&length);

        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                worker_length.fetch_sub(1, Ordering::SeqCst);
                if job.cancelled.load(Ordering::SeqCst) {
                    let _ = job.reply.send(Err(QueueError::Cancelled));
                    continue;
                }
                // Run on a blocking thread so a slow synchronous launch
                // sequence never stalls the worker's length bookkeeping.
                let result = tokio::task::spawn_blocking(job.task).await;
                let _ = job.reply.send(result.map_err(|_| QueueError::Cancelled));
            }
        });

        Self { sender, length }
    }

    /// Enqueues `task` for FIFO execution.
    pub fn enqueue<F>(&self, task: F) -> PendingJob<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let (reply, completion) = oneshot::channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        self.length.fetch_add(1, Ordering::SeqCst);
        let job = Job {
            task: Box::new(task),
            cancelled: Arc::clone(&cancelled),
            reply,
        };
        if self.sender.send(job).is_err() {
            self.length.fetch_sub(1, Ordering::SeqCst);
        }
        PendingJob {
            completion,
            cancelled,
        }
    }

    pub fn get_queue_length(&self) -> usize {
        self.length.load(Ordering::SeqCst)
    }
}

impl Default for LaunchQueue {
    fn default() -> Self {
        Self::new()
    }
}
