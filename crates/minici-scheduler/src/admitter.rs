//! Strategies for handing admitted jobs to the pipeline.

use async_trait::async_trait;
use minici_core::Result;
use minici_core::job::{JobDescriptor, JobHandle};
use std::sync::Arc;
use tracing::info;

use crate::pipeline::BuildPipeline;
use crate::queue::{JobQueue, QueueStatsSnapshot};
use crate::worker::run_contained;

/// Accepts a job for execution without waiting for it to run.
#[async_trait]
pub trait JobAdmitter: Send + Sync {
    async fn admit(&self, job: JobDescriptor) -> Result<JobHandle>;

    /// Queue counters, for strategies that queue.
    fn stats(&self) -> Option<QueueStatsSnapshot> {
        None
    }
}

/// Runs every job at once on its own task. No concurrency bound.
pub struct DirectAdmitter {
    pipeline: Arc<BuildPipeline>,
}

impl DirectAdmitter {
    pub fn new(pipeline: Arc<BuildPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl JobAdmitter for DirectAdmitter {
    async fn admit(&self, job: JobDescriptor) -> Result<JobHandle> {
        let handle = job.handle();
        let pipeline = self.pipeline.clone();
        info!(job_id = %handle.job_id, build_id = %handle.build_id, "Running job directly");
        tokio::spawn(async move {
            run_contained(&pipeline, &job).await;
        });
        Ok(handle)
    }
}

/// Hands jobs to the FIFO queue and its worker pool.
pub struct QueuedAdmitter {
    queue: Arc<JobQueue>,
}

impl QueuedAdmitter {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl JobAdmitter for QueuedAdmitter {
    async fn admit(&self, job: JobDescriptor) -> Result<JobHandle> {
        self.queue.enqueue(job)
    }

    fn stats(&self) -> Option<QueueStatsSnapshot> {
        Some(self.queue.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minici_core::{BuildRecord, TriggerSource};

    #[tokio::test]
    async fn test_queued_admitter_enqueues() {
        let queue = Arc::new(JobQueue::new());
        let admitter = QueuedAdmitter::new(queue.clone());
        let job = JobDescriptor::for_build(&BuildRecord::new("repo", "main", TriggerSource::Manual));

        let handle = admitter.admit(job.clone()).await.unwrap();
        assert_eq!(handle, job.handle());
        assert_eq!(admitter.stats().unwrap().pending, 1);
        assert_eq!(queue.claim().await, Some(job));
    }
}
