//! Webhook endpoints for GitHub.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/github", post(github_webhook))
        .route("/health", get(health))
}

/// Handle GitHub webhook events.
async fn github_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let event = header(&headers, "X-GitHub-Event");
    let signature = header(&headers, "X-Hub-Signature-256");
    state
        .intake
        .handle(&body, event, signature)
        .await
        .into_response()
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "webhooks" }))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use crate::services::intake::sign;
    use crate::test_support::{TestApp, json_body};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use minici_db::BuildStore;
    use serde_json::json;
    use tower::ServiceExt;

    const SECRET: &str = "webhook-secret";

    fn push_payload() -> String {
        json!({
            "ref": "refs/heads/main",
            "repository": {
                "full_name": "org/repo",
                "clone_url": "https://example.com/org/repo.git"
            },
            "head_commit": {
                "id": "0123456789abcdef",
                "message": "Ship it",
                "author": { "name": "Sam" }
            }
        })
        .to_string()
    }

    fn webhook(event: &str, body: &str, signature: Option<String>) -> Request<Body> {
        let mut request = Request::post("/webhooks/github")
            .header("content-type", "application/json")
            .header("X-GitHub-Event", event);
        if let Some(signature) = signature {
            request = request.header("X-Hub-Signature-256", signature);
        }
        request.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_signed_push_is_accepted() {
        let app = TestApp::new(Some(SECRET));
        let body = push_payload();
        let response = app
            .router()
            .oneshot(webhook("push", &body, Some(sign(SECRET, body.as_bytes()))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json = json_body(response).await;
        assert!(json["buildId"].is_string());

        let jobs = app.admitted();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].repository, "https://example.com/org/repo.git");
        assert_eq!(jobs[0].branch, "main");
        let build = app.store.get(jobs[0].build_id).await.unwrap();
        assert_eq!(build.trigger, minici_core::TriggerSource::GithubWebhook);
    }

    #[tokio::test]
    async fn test_route_rejects_unsigned_request() {
        let app = TestApp::new(Some(SECRET));
        let response = app
            .router()
            .oneshot(webhook("push", &push_payload(), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(app.admitted().is_empty());
    }

    #[tokio::test]
    async fn test_webhook_health() {
        let app = TestApp::new(None);
        let response = app
            .router()
            .oneshot(Request::get("/webhooks/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
