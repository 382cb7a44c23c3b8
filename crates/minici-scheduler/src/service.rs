//! Build trigger entry point shared by the HTTP API and webhook intake.

use minici_core::job::{JobDescriptor, JobHandle};
use minici_core::{BuildId, BuildRecord, BuildStatus, Error, Result, TriggerSource};
use minici_db::BuildStore;
use std::sync::Arc;
use tracing::{error, info};

use crate::admitter::JobAdmitter;
use crate::queue::QueueStatsSnapshot;
use crate::pipeline::ERROR_CONCLUSION;

/// Creates build records and admits their jobs.
#[derive(Clone)]
pub struct BuildService {
    store: Arc<dyn BuildStore>,
    admitter: Arc<dyn JobAdmitter>,
    default_branch: String,
}

impl BuildService {
    pub fn new(
        store: Arc<dyn BuildStore>,
        admitter: Arc<dyn JobAdmitter>,
        default_branch: impl Into<String>,
    ) -> Self {
        Self {
            store,
            admitter,
            default_branch: default_branch.into(),
        }
    }

    /// Create a `pending` build and admit a job for it.
    ///
    /// A blank branch falls back to the default branch. If admission fails
    /// the record is marked `error` so it does not stay pending forever.
    pub async fn trigger(
        &self,
        repository: &str,
        branch: Option<&str>,
        trigger: TriggerSource,
    ) -> Result<JobHandle> {
        let repository = repository.trim();
        if repository.is_empty() {
            return Err(Error::InvalidInput("repository is required".to_string()));
        }
        let branch = branch
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .unwrap_or(&self.default_branch);

        let build = self.store.create(repository, branch, trigger).await?;
        let job = JobDescriptor::for_build(&build);

        match self.admitter.admit(job).await {
            Ok(handle) => {
                info!(
                    build_id = %handle.build_id,
                    job_id = %handle.job_id,
                    repository = %repository,
                    branch = %branch,
                    trigger = trigger.as_str(),
                    "Build admitted"
                );
                Ok(handle)
            }
            Err(e) => {
                error!(build_id = %build.id, error = %e, "Failed to admit build");
                let reason = format!("Error: could not admit build: {e}\n");
                if let Err(e) = self.store.append_output(build.id, &reason).await {
                    error!(build_id = %build.id, error = %e, "Failed to record admission failure");
                }
                if let Err(e) = self
                    .store
                    .update(
                        build.id,
                        Box::new(|b| b.finish(BuildStatus::Error, ERROR_CONCLUSION, None)),
                    )
                    .await
                {
                    error!(build_id = %build.id, error = %e, "Failed to mark unadmitted build");
                }
                Err(e)
            }
        }
    }

    pub async fn get(&self, id: BuildId) -> Result<BuildRecord> {
        Ok(self.store.get(id).await?)
    }

    pub async fn list_recent(&self, limit: usize) -> Result<Vec<BuildRecord>> {
        Ok(self.store.list_recent(limit).await?)
    }

    pub fn queue_stats(&self) -> Option<QueueStatsSnapshot> {
        self.admitter.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use minici_db::InMemoryBuildStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingAdmitter {
        jobs: Mutex<Vec<JobDescriptor>>,
        refuse: bool,
    }

    #[async_trait]
    impl JobAdmitter for RecordingAdmitter {
        async fn admit(&self, job: JobDescriptor) -> Result<JobHandle> {
            if self.refuse {
                return Err(Error::Internal("job queue is shut down".to_string()));
            }
            let handle = job.handle();
            self.jobs.lock().unwrap().push(job);
            Ok(handle)
        }
    }

    fn service(admitter: Arc<RecordingAdmitter>) -> (BuildService, Arc<InMemoryBuildStore>) {
        let store = Arc::new(InMemoryBuildStore::new());
        (BuildService::new(store.clone(), admitter, "main"), store)
    }

    #[tokio::test]
    async fn test_trigger_creates_pending_build_and_admits() {
        let admitter = Arc::new(RecordingAdmitter::default());
        let (service, store) = service(admitter.clone());

        let handle = service
            .trigger("https://example.com/org/repo.git", Some("dev"), TriggerSource::Manual)
            .await
            .unwrap();

        let build = store.get(handle.build_id).await.unwrap();
        assert_eq!(build.status, BuildStatus::Pending);
        assert_eq!(build.branch, "dev");
        let jobs = admitter.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].build_id, build.id);
    }

    #[tokio::test]
    async fn test_missing_branch_uses_default() {
        let (service, store) = service(Arc::new(RecordingAdmitter::default()));
        let handle = service
            .trigger("https://example.com/org/repo.git", Some("  "), TriggerSource::Manual)
            .await
            .unwrap();
        assert_eq!(store.get(handle.build_id).await.unwrap().branch, "main");
    }

    #[tokio::test]
    async fn test_blank_repository_is_rejected() {
        let (service, store) = service(Arc::new(RecordingAdmitter::default()));
        let err = service.trigger("   ", None, TriggerSource::Manual).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(store.list_recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refused_admission_marks_build_error() {
        let admitter = Arc::new(RecordingAdmitter {
            refuse: true,
            ..Default::default()
        });
        let (service, store) = service(admitter);
        assert!(service.trigger("repo", None, TriggerSource::Manual).await.is_err());

        let builds = store.list_recent(10).await.unwrap();
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].status, BuildStatus::Error);
        assert!(builds[0].output.contains("could not admit build"));
    }

    #[tokio::test]
    async fn test_get_unknown_build() {
        let (service, _) = service(Arc::new(RecordingAdmitter::default()));
        let err = service.get(BuildId::new()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
