//! The build record and its status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{BuildId, Error, Result};

/// Lifecycle status of a build.
///
/// `Pending -> Running -> {Success | Failure}`, and any non-terminal
/// status may move to `Error`. Nothing moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Pending,
    Running,
    Success,
    Failure,
    Error,
}

impl BuildStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Success | BuildStatus::Failure | BuildStatus::Error
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Running => "running",
            BuildStatus::Success => "success",
            BuildStatus::Failure => "failure",
            BuildStatus::Error => "error",
        }
    }

    /// Whether `self -> next` is a legal forward transition.
    pub fn can_transition_to(&self, next: BuildStatus) -> bool {
        use BuildStatus::*;
        match (self, next) {
            (Pending, Running) => true,
            (Running, Success) | (Running, Failure) => true,
            (Pending, Error) | (Running, Error) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BuildStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(BuildStatus::Pending),
            "running" => Ok(BuildStatus::Running),
            "success" => Ok(BuildStatus::Success),
            "failure" => Ok(BuildStatus::Failure),
            "error" => Ok(BuildStatus::Error),
            other => Err(Error::InvalidInput(format!("unknown build status: {other}"))),
        }
    }
}

/// What caused a build to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Manual,
    GithubWebhook,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Manual => "manual",
            TriggerSource::GithubWebhook => "github_webhook",
        }
    }
}

impl std::str::FromStr for TriggerSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "manual" => Ok(TriggerSource::Manual),
            "github_webhook" => Ok(TriggerSource::GithubWebhook),
            other => Err(Error::InvalidInput(format!("unknown trigger source: {other}"))),
        }
    }
}

/// The revision a build checked out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    pub hash: String,
    pub message: String,
    pub author_name: String,
}

impl CommitInfo {
    pub fn short_hash(&self) -> &str {
        &self.hash[..7.min(self.hash.len())]
    }
}

/// The durable record of one build attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRecord {
    pub id: BuildId,
    pub repository: String,
    pub branch: String,
    pub commit: Option<CommitInfo>,
    pub status: BuildStatus,
    /// Process output interleaved with pipeline markers. Append-only.
    pub output: String,
    /// Wall-clock milliseconds of the test step.
    pub duration: Option<u64>,
    pub conclusion: Option<String>,
    pub trigger: TriggerSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BuildRecord {
    pub fn new(
        repository: impl Into<String>,
        branch: impl Into<String>,
        trigger: TriggerSource,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: BuildId::new(),
            repository: repository.into(),
            branch: branch.into(),
            commit: None,
            status: BuildStatus::Pending,
            output: String::new(),
            duration: None,
            conclusion: None,
            trigger,
            created_at: now,
            updated_at: now,
        }
    }

    /// Short repository name, used to partition working directories.
    ///
    /// `https://example.com/org/repo.git` and `git@host:org/repo.git` both yield `repo`.
    pub fn repo_name(&self) -> String {
        repo_name(&self.repository)
    }

    /// Move to `next`, rejecting anything but a forward transition.
    pub fn transition(&mut self, next: BuildStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Reach a terminal status, recording the conclusion and test duration.
    ///
    /// `duration` and `conclusion` may only be set once.
    pub fn finish(
        &mut self,
        status: BuildStatus,
        conclusion: impl Into<String>,
        duration: Option<Duration>,
    ) -> Result<()> {
        if !status.is_terminal() {
            return Err(Error::InvalidInput(format!(
                "{status} is not a terminal status"
            )));
        }
        if self.conclusion.is_some() {
            return Err(Error::AlreadySet {
                field: "conclusion",
            });
        }
        if self.duration.is_some() && duration.is_some() {
            return Err(Error::AlreadySet { field: "duration" });
        }
        self.transition(status)?;
        self.conclusion = Some(conclusion.into());
        if let Some(duration) = duration {
            self.duration = Some(duration.as_millis() as u64);
        }
        Ok(())
    }
}

pub fn repo_name(repository: &str) -> String {
    let trimmed = repository.trim_end_matches('/');
    let last = trimmed
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(trimmed);
    let name = last.strip_suffix(".git").unwrap_or(last);
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        "repo".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_pending() {
        let record = BuildRecord::new("https://example.com/org/repo.git", "main", TriggerSource::Manual);
        assert_eq!(record.status, BuildStatus::Pending);
        assert!(record.commit.is_none());
        assert!(record.output.is_empty());
        assert!(record.duration.is_none());
        assert!(record.conclusion.is_none());
    }

    #[test]
    fn test_forward_transitions() {
        assert!(BuildStatus::Pending.can_transition_to(BuildStatus::Running));
        assert!(BuildStatus::Running.can_transition_to(BuildStatus::Success));
        assert!(BuildStatus::Running.can_transition_to(BuildStatus::Failure));
        assert!(BuildStatus::Pending.can_transition_to(BuildStatus::Error));
        assert!(BuildStatus::Running.can_transition_to(BuildStatus::Error));
    }

    #[test]
    fn test_no_backward_or_skipping_transitions() {
        assert!(!BuildStatus::Running.can_transition_to(BuildStatus::Pending));
        assert!(!BuildStatus::Pending.can_transition_to(BuildStatus::Success));
        assert!(!BuildStatus::Pending.can_transition_to(BuildStatus::Failure));
        for terminal in [BuildStatus::Success, BuildStatus::Failure, BuildStatus::Error] {
            for next in [
                BuildStatus::Pending,
                BuildStatus::Running,
                BuildStatus::Success,
                BuildStatus::Failure,
                BuildStatus::Error,
            ] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn test_finish_sets_fields_once() {
        let mut record = BuildRecord::new("repo", "main", TriggerSource::Manual);
        record.transition(BuildStatus::Running).unwrap();
        record
            .finish(BuildStatus::Success, "All tests passed", Some(Duration::from_millis(1500)))
            .unwrap();
        assert_eq!(record.status, BuildStatus::Success);
        assert_eq!(record.duration, Some(1500));
        assert_eq!(record.conclusion.as_deref(), Some("All tests passed"));

        let err = record.finish(BuildStatus::Error, "again", None).unwrap_err();
        assert!(matches!(err, Error::AlreadySet { field: "conclusion" }));
    }

    #[test]
    fn test_finish_rejects_non_terminal() {
        let mut record = BuildRecord::new("repo", "main", TriggerSource::Manual);
        assert!(record.finish(BuildStatus::Running, "nope", None).is_err());
        assert_eq!(record.status, BuildStatus::Pending);
    }

    #[test]
    fn test_error_from_pending_leaves_duration_unset() {
        let mut record = BuildRecord::new("repo", "main", TriggerSource::Manual);
        record.finish(BuildStatus::Error, "Build process failed", None).unwrap();
        assert_eq!(record.status, BuildStatus::Error);
        assert!(record.duration.is_none());
    }

    #[test]
    fn test_repo_name() {
        assert_eq!(repo_name("https://example.com/org/repo.git"), "repo");
        assert_eq!(repo_name("https://github.com/org/my-app/"), "my-app");
        assert_eq!(repo_name("git@github.com:org/tool.git"), "tool");
        assert_eq!(repo_name("/srv/git/local"), "local");
        assert_eq!(repo_name(".."), "repo");
        assert_eq!(repo_name("weird name?"), "weird_name_");
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&BuildStatus::Failure).unwrap();
        assert_eq!(json, "\"failure\"");
        let parsed: BuildStatus = "running".parse().unwrap();
        assert_eq!(parsed, BuildStatus::Running);
        assert!("done".parse::<BuildStatus>().is_err());
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = BuildRecord::new("repo", "main", TriggerSource::GithubWebhook);
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("createdAt").is_some());
        assert_eq!(json["trigger"], "github_webhook");
        assert_eq!(json["status"], "pending");
    }
}
