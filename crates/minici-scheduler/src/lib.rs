//! Build pipeline and job scheduling for minici.
//!
//! Runs the clone, install and test pipeline for one build, and admits
//! jobs either directly or through a FIFO queue drained by a worker pool.

pub mod admitter;
pub mod output;
pub mod pipeline;
pub mod queue;
pub mod service;
pub mod worker;

pub use admitter::{DirectAdmitter, JobAdmitter, QueuedAdmitter};
pub use output::OutputWriter;
pub use pipeline::{BuildPipeline, PipelineSettings};
pub use queue::{JobQueue, QueueStats, QueueStatsSnapshot};
pub use service::BuildService;
pub use worker::Worker;
