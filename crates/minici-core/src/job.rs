//! Job descriptors handed from admission to a worker.

use serde::{Deserialize, Serialize};

use crate::{BuildId, BuildRecord, JobId};

/// A queued request to run the pipeline for one build.
///
/// Owned by the queue until a worker claims it, then by that worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub job_id: JobId,
    pub repository: String,
    pub branch: String,
    pub build_id: BuildId,
}

impl JobDescriptor {
    pub fn for_build(build: &BuildRecord) -> Self {
        Self {
            job_id: JobId::new(),
            repository: build.repository.clone(),
            branch: build.branch.clone(),
            build_id: build.id,
        }
    }

    pub fn handle(&self) -> JobHandle {
        JobHandle {
            job_id: self.job_id,
            build_id: self.build_id,
        }
    }
}

/// Returned to the caller once a job has been admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHandle {
    pub job_id: JobId,
    pub build_id: BuildId,
}
