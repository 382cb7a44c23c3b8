//! Parsing of source-control push notifications.

use serde::{Deserialize, Serialize};

use crate::{CommitInfo, Error, Result};

const BRANCH_PREFIX: &str = "refs/heads/";

/// The parts of a GitHub push payload the orchestrator acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    pub repository_full_name: String,
    pub clone_url: String,
    /// Target branch with the `refs/heads/` prefix removed.
    pub branch: String,
    pub head_commit: CommitInfo,
    pub pusher: Option<String>,
}

impl PushEvent {
    /// Parse a GitHub push webhook payload.
    ///
    /// A payload without repository, ref or head commit information is
    /// rejected rather than silently dropped.
    pub fn from_github_payload(payload: &serde_json::Value) -> Result<Self> {
        let repository = payload
            .get("repository")
            .filter(|r| r.is_object())
            .ok_or_else(|| malformed("missing repository"))?;
        let repository_full_name = string_field(repository, "full_name")
            .ok_or_else(|| malformed("missing repository.full_name"))?;
        let clone_url = string_field(repository, "clone_url")
            .ok_or_else(|| malformed("missing repository.clone_url"))?;

        let r#ref = string_field(payload, "ref").ok_or_else(|| malformed("missing ref"))?;
        let branch = r#ref
            .strip_prefix(BRANCH_PREFIX)
            .unwrap_or(&r#ref)
            .to_string();
        if branch.is_empty() {
            return Err(malformed("empty branch in ref"));
        }

        let head = payload
            .get("head_commit")
            .filter(|c| c.is_object())
            .ok_or_else(|| malformed("missing head_commit"))?;
        let head_commit = CommitInfo {
            hash: string_field(head, "id").ok_or_else(|| malformed("missing head_commit.id"))?,
            message: string_field(head, "message").unwrap_or_default(),
            author_name: head
                .get("author")
                .and_then(|a| string_field(a, "name"))
                .unwrap_or_else(|| "unknown".to_string()),
        };

        let pusher = payload
            .get("pusher")
            .and_then(|p| string_field(p, "name"));

        Ok(PushEvent {
            repository_full_name,
            clone_url,
            branch,
            head_commit,
            pusher,
        })
    }
}

fn string_field(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn malformed(detail: &str) -> Error {
    Error::InvalidInput(format!("invalid push payload: {detail}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> serde_json::Value {
        json!({
            "ref": "refs/heads/feature/login",
            "repository": {
                "full_name": "org/repo",
                "clone_url": "https://github.com/org/repo.git"
            },
            "head_commit": {
                "id": "abc123def456",
                "message": "Add login form",
                "author": { "name": "Robin", "email": "robin@example.com" }
            },
            "pusher": { "name": "robin" }
        })
    }

    #[test]
    fn test_parse_push_payload() {
        let event = PushEvent::from_github_payload(&payload()).unwrap();
        assert_eq!(event.repository_full_name, "org/repo");
        assert_eq!(event.clone_url, "https://github.com/org/repo.git");
        assert_eq!(event.branch, "feature/login");
        assert_eq!(event.head_commit.hash, "abc123def456");
        assert_eq!(event.head_commit.message, "Add login form");
        assert_eq!(event.head_commit.author_name, "Robin");
        assert_eq!(event.pusher.as_deref(), Some("robin"));
    }

    #[test]
    fn test_missing_head_commit_is_rejected() {
        let mut value = payload();
        value.as_object_mut().unwrap().remove("head_commit");
        let err = PushEvent::from_github_payload(&value).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(msg) if msg.contains("head_commit")));
    }

    #[test]
    fn test_null_head_commit_is_rejected() {
        let mut value = payload();
        value["head_commit"] = serde_json::Value::Null;
        assert!(PushEvent::from_github_payload(&value).is_err());
    }

    #[test]
    fn test_missing_repository_or_ref_is_rejected() {
        let mut value = payload();
        value.as_object_mut().unwrap().remove("repository");
        assert!(PushEvent::from_github_payload(&value).is_err());

        let mut value = payload();
        value.as_object_mut().unwrap().remove("ref");
        assert!(PushEvent::from_github_payload(&value).is_err());
    }

    #[test]
    fn test_author_defaults_to_unknown() {
        let mut value = payload();
        value["head_commit"].as_object_mut().unwrap().remove("author");
        let event = PushEvent::from_github_payload(&value).unwrap();
        assert_eq!(event.head_commit.author_name, "unknown");
    }
}
