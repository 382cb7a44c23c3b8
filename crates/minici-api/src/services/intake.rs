//! GitHub webhook intake.
//!
//! Authenticates the raw body, filters for push events and turns each
//! push into an admitted build.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hmac::{Hmac, Mac};
use minici_core::TriggerSource;
use minici_core::job::JobHandle;
use minici_core::push::PushEvent;
use minici_scheduler::BuildService;
use serde_json::json;
use sha2::Sha256;
use tracing::{error, info, warn};

const SIGNATURE_PREFIX: &str = "sha256=";

/// What happened to one webhook delivery.
#[derive(Debug)]
pub enum IntakeOutcome {
    Accepted(JobHandle),
    /// A well-formed, authenticated event that is not a push.
    Ignored { event: String },
    Unauthorized(String),
    Malformed(String),
    Failed(String),
}

impl IntoResponse for IntakeOutcome {
    fn into_response(self) -> Response {
        match self {
            IntakeOutcome::Accepted(handle) => (
                StatusCode::ACCEPTED,
                Json(json!({
                    "status": "accepted",
                    "buildId": handle.build_id,
                    "jobId": handle.job_id,
                })),
            )
                .into_response(),
            IntakeOutcome::Ignored { event } => (
                StatusCode::OK,
                Json(json!({ "status": "ignored", "event": event })),
            )
                .into_response(),
            IntakeOutcome::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, Json(json!({ "error": msg }))).into_response()
            }
            IntakeOutcome::Malformed(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            IntakeOutcome::Failed(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": msg }))).into_response()
            }
        }
    }
}

pub struct WebhookIntake {
    secret: Option<String>,
    builds: BuildService,
}

impl WebhookIntake {
    pub fn new(secret: Option<String>, builds: BuildService) -> Self {
        Self { secret, builds }
    }

    /// Handle one delivery. Rejects everything while no secret is configured.
    pub async fn handle(
        &self,
        body: &[u8],
        event: Option<&str>,
        signature: Option<&str>,
    ) -> IntakeOutcome {
        let Some(secret) = self.secret.as_deref() else {
            warn!("Webhook received but no secret is configured, rejecting");
            return IntakeOutcome::Unauthorized("webhook secret not configured".to_string());
        };
        if !verify_signature(secret, body, signature) {
            warn!(event = ?event, "Invalid webhook signature");
            return IntakeOutcome::Unauthorized("invalid signature".to_string());
        }

        let event = event.unwrap_or("unknown");
        if event != "push" {
            info!(event = %event, "Ignoring non-push webhook event");
            return IntakeOutcome::Ignored {
                event: event.to_string(),
            };
        }

        let payload: serde_json::Value = match serde_json::from_slice(body) {
            Ok(payload) => payload,
            Err(e) => return IntakeOutcome::Malformed(format!("invalid JSON: {e}")),
        };
        let push = match PushEvent::from_github_payload(&payload) {
            Ok(push) => push,
            Err(e) => {
                warn!(error = %e, "Rejecting malformed push payload");
                return IntakeOutcome::Malformed(e.to_string());
            }
        };

        info!(
            repo = %push.repository_full_name,
            branch = %push.branch,
            sha = %push.head_commit.short_hash(),
            pusher = ?push.pusher,
            "Processing push event"
        );

        match self
            .builds
            .trigger(&push.clone_url, Some(&push.branch), TriggerSource::GithubWebhook)
            .await
        {
            Ok(handle) => IntakeOutcome::Accepted(handle),
            Err(e) => {
                error!(repo = %push.repository_full_name, error = %e, "Failed to admit push build");
                IntakeOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Verify a `sha256=<hex>` signature over `body` in constant time.
pub fn verify_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(sig_hex) = signature.and_then(|s| s.strip_prefix(SIGNATURE_PREFIX)) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&sig_bytes).is_ok()
}

#[cfg(test)]
pub(crate) fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}
