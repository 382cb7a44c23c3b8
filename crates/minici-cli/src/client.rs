//! Thin client for the server's JSON API.

use anyhow::{Context, Result, bail};
use minici_core::BuildRecord;
use minici_core::job::JobHandle;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;

pub struct ApiClient {
    base: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(api_url: &str) -> Self {
        Self {
            base: api_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base, path)
    }

    pub async fn trigger(&self, repository: &str, branch: Option<&str>) -> Result<JobHandle> {
        let response = self
            .http
            .post(self.url("/builds"))
            .json(&json!({ "repository": repository, "branch": branch }))
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base))?;
        decode(response).await
    }

    pub async fn list_builds(&self, limit: usize) -> Result<Vec<BuildRecord>> {
        let response = self
            .http
            .get(self.url("/builds"))
            .query(&[("limit", limit)])
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base))?;
        decode(response).await
    }

    pub async fn get_build(&self, id: &str) -> Result<BuildRecord> {
        let response = self
            .http
            .get(self.url(&format!("/builds/{id}")))
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base))?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response.json().await.context("Malformed response from server");
    }
    let body = response.text().await.unwrap_or_default();
    bail!("{}", error_message(status, &body))
}

/// Prefer the server's `{"error": ...}` message over the bare status.
fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
        .map(|message| format!("{status}: {message}"))
        .unwrap_or_else(|| format!("server returned {status}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_ignores_trailing_slash() {
        let client = ApiClient::new("http://localhost:3000/");
        assert_eq!(client.url("/builds"), "http://localhost:3000/api/builds");
    }

    #[test]
    fn test_error_message_uses_server_error() {
        let message = error_message(StatusCode::NOT_FOUND, r#"{"error":"build not found"}"#);
        assert_eq!(message, "404 Not Found: build not found");

        let message = error_message(StatusCode::BAD_GATEWAY, "<html>");
        assert_eq!(message, "server returned 502 Bad Gateway");
    }
}
