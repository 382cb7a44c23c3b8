//! Shared fixtures for router and intake tests.

use async_trait::async_trait;
use axum::Router;
use axum::response::Response;
use minici_core::job::{JobDescriptor, JobHandle};
use minici_db::InMemoryBuildStore;
use minici_scheduler::{BuildService, JobAdmitter};
use std::sync::{Arc, Mutex};

use crate::services::intake::WebhookIntake;
use crate::ws::ChannelBroadcaster;
use crate::{AppState, routes};

#[derive(Default)]
pub struct RecordingAdmitter {
    jobs: Mutex<Vec<JobDescriptor>>,
    refuse: bool,
}

#[async_trait]
impl JobAdmitter for RecordingAdmitter {
    async fn admit(&self, job: JobDescriptor) -> minici_core::Result<JobHandle> {
        if self.refuse {
            return Err(minici_core::Error::Internal("job queue is shut down".to_string()));
        }
        let handle = job.handle();
        self.jobs.lock().unwrap().push(job);
        Ok(handle)
    }
}

pub struct TestApp {
    pub store: Arc<InMemoryBuildStore>,
    admitter: Arc<RecordingAdmitter>,
    state: AppState,
}

impl TestApp {
    pub fn new(secret: Option<&str>) -> Self {
        Self::with_admitter(secret, RecordingAdmitter::default())
    }

    pub fn refusing(secret: Option<&str>) -> Self {
        Self::with_admitter(
            secret,
            RecordingAdmitter {
                refuse: true,
                ..Default::default()
            },
        )
    }

    fn with_admitter(secret: Option<&str>, admitter: RecordingAdmitter) -> Self {
        let store = Arc::new(InMemoryBuildStore::new());
        let admitter = Arc::new(admitter);
        let builds = BuildService::new(store.clone(), admitter.clone(), "main");
        let state = AppState::new(builds, secret.map(String::from), ChannelBroadcaster::new(16));
        Self {
            store,
            admitter,
            state,
        }
    }

    pub fn router(&self) -> Router {
        routes::router(self.state.clone())
    }

    pub fn intake(&self) -> Arc<WebhookIntake> {
        self.state.intake.clone()
    }

    pub fn admitted(&self) -> Vec<JobDescriptor> {
        self.admitter.jobs.lock().unwrap().clone()
    }
}

pub async fn json_body(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
