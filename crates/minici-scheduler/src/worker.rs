//! Worker that processes jobs from the queue.

use futures::FutureExt;
use minici_core::BuildStatus;
use minici_core::job::JobDescriptor;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::pipeline::BuildPipeline;
use crate::queue::JobQueue;

/// A worker that claims jobs and runs each through the pipeline.
pub struct Worker {
    id: String,
    queue: Arc<JobQueue>,
    pipeline: Arc<BuildPipeline>,
}

impl Worker {
    pub fn new(id: impl Into<String>, queue: Arc<JobQueue>, pipeline: Arc<BuildPipeline>) -> Self {
        Self {
            id: id.into(),
            queue,
            pipeline,
        }
    }

    /// Run the worker loop until the queue is shut down.
    pub async fn run(&self) {
        info!(worker_id = %self.id, "Starting worker");

        while let Some(job) = self.queue.claim().await {
            info!(
                worker_id = %self.id,
                job_id = %job.job_id,
                build_id = %job.build_id,
                "Claimed job"
            );
            let status = run_contained(&self.pipeline, &job).await;
            self.queue.report(status);
        }

        info!(worker_id = %self.id, "Queue closed, stopping worker");
    }
}

/// Run the pipeline, turning a panic into an `error` build.
///
/// Output buffered before the panic is persisted ahead of the error.
pub async fn run_contained(pipeline: &BuildPipeline, job: &JobDescriptor) -> BuildStatus {
    let writer = pipeline.output_writer(job.build_id);
    match AssertUnwindSafe(pipeline.run_with_writer(job, &writer))
        .catch_unwind()
        .await
    {
        Ok(status) => status,
        Err(panic) => {
            let reason = format!("pipeline panicked: {}", panic_message(&*panic));
            error!(job_id = %job.job_id, build_id = %job.build_id, "{reason}");
            if let Err(e) = writer.finish().await {
                warn!(build_id = %job.build_id, error = %e, "Failed to persist output of panicked build");
            }
            pipeline.abandon(job.build_id, &reason).await;
            BuildStatus::Error
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
