//! In-process FIFO job queue.

use minici_core::job::{JobDescriptor, JobHandle};
use minici_core::{BuildStatus, Error, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::pipeline::BuildPipeline;
use crate::worker::Worker;

/// Counters kept for bookkeeping and the queue status endpoint.
#[derive(Debug, Default)]
pub struct QueueStats {
    enqueued: AtomicU64,
    claimed: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatsSnapshot {
    pub enqueued: u64,
    pub claimed: u64,
    /// Jobs whose build reached `success` or `failure`.
    pub completed: u64,
    /// Jobs whose build ended in `error`, panics included.
    pub failed: u64,
    pub pending: u64,
}

/// Unbounded FIFO of job descriptors drained by a pool of workers.
///
/// `enqueue` never blocks. Jobs are held in memory only: a job claimed by
/// a worker when the process dies is not replayed.
pub struct JobQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<JobDescriptor>>>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<JobDescriptor>>,
    stats: QueueStats,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: tokio::sync::Mutex::new(receiver),
            stats: QueueStats::default(),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue a new job.
    pub fn enqueue(&self, job: JobDescriptor) -> Result<JobHandle> {
        let handle = job.handle();
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = sender
            .as_ref()
            .ok_or_else(|| Error::Internal("job queue is shut down".to_string()))?;
        sender
            .send(job)
            .map_err(|_| Error::Internal("job queue is shut down".to_string()))?;
        self.stats.enqueued.fetch_add(1, Ordering::SeqCst);
        info!(job_id = %handle.job_id, build_id = %handle.build_id, "Enqueued job");
        Ok(handle)
    }

    /// Claim the next job in arrival order.
    ///
    /// Returns `None` once the queue is shut down and drained.
    pub async fn claim(&self) -> Option<JobDescriptor> {
        let job = self.receiver.lock().await.recv().await?;
        self.stats.claimed.fetch_add(1, Ordering::SeqCst);
        Some(job)
    }

    /// Record how a claimed job ended.
    pub fn report(&self, status: BuildStatus) {
        match status {
            BuildStatus::Success | BuildStatus::Failure => {
                self.stats.completed.fetch_add(1, Ordering::SeqCst);
            }
            _ => {
                self.stats.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    pub fn stats(&self) -> QueueStatsSnapshot {
        let enqueued = self.stats.enqueued.load(Ordering::SeqCst);
        let claimed = self.stats.claimed.load(Ordering::SeqCst);
        QueueStatsSnapshot {
            enqueued,
            claimed,
            completed: self.stats.completed.load(Ordering::SeqCst),
            failed: self.stats.failed.load(Ordering::SeqCst),
            pending: enqueued.saturating_sub(claimed),
        }
    }

    /// Spawn `count` workers running `pipeline`.
    pub fn start(self: &Arc<Self>, pipeline: Arc<BuildPipeline>, count: usize) {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        for i in 0..count {
            let worker = Worker::new(format!("worker-{i}"), self.clone(), pipeline.clone());
            workers.push(tokio::spawn(async move { worker.run().await }));
        }
        info!(workers = count, "Started job queue");
    }

    /// Stop accepting jobs. Workers drain what is queued, then exit.
    pub fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Close the queue and wait for every worker to finish.
    pub async fn shutdown(&self) {
        self.close();
        let workers: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }
        info!("Job queue shut down");
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
