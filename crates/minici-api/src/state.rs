//! Application state.

use minici_scheduler::BuildService;
use std::sync::Arc;

use crate::services::intake::WebhookIntake;
use crate::ws::ChannelBroadcaster;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub builds: BuildService,
    pub intake: Arc<WebhookIntake>,
    pub events: ChannelBroadcaster,
}

impl AppState {
    pub fn new(builds: BuildService, webhook_secret: Option<String>, events: ChannelBroadcaster) -> Self {
        let intake = Arc::new(WebhookIntake::new(webhook_secret, builds.clone()));
        Self {
            builds,
            intake,
            events,
        }
    }
}
