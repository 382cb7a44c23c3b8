//! The notification seam invoked when a build reaches a terminal status.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{BuildRecord, BuildStatus, Result};

/// Which terminal statuses trigger a notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotifyPolicy {
    /// Only `success` and `failure`: the outcome of the test step.
    #[default]
    TestOutcomes,
    /// Every terminal status, `error` included.
    AllTerminal,
}

impl NotifyPolicy {
    pub fn should_notify(&self, status: BuildStatus) -> bool {
        match self {
            NotifyPolicy::TestOutcomes => {
                matches!(status, BuildStatus::Success | BuildStatus::Failure)
            }
            NotifyPolicy::AllTerminal => status.is_terminal(),
        }
    }
}

impl std::str::FromStr for NotifyPolicy {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "test-outcomes" => Ok(NotifyPolicy::TestOutcomes),
            "all-terminal" => Ok(NotifyPolicy::AllTerminal),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown notify policy: {other}"
            ))),
        }
    }
}

/// Delivers a finished build to a list of recipients.
///
/// Failures are reported back to the caller, which logs them; they never
/// change the build's own status.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, build: &BuildRecord, recipients: &[String]) -> Result<()>;
}

/// Subject line and plain-text body describing a finished build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub subject: String,
    pub body: String,
}

impl Summary {
    pub fn of(build: &BuildRecord) -> Self {
        let subject = format!("Build {}: {}", build.status, build.repository);

        let mut body = String::new();
        body.push_str(&format!("Build {}\n", build.status.as_str().to_uppercase()));
        body.push_str(&format!("Repository: {}\n", build.repository));
        body.push_str(&format!("Branch: {}\n", build.branch));
        if let Some(commit) = &build.commit {
            body.push_str(&format!(
                "Commit: {} {} ({})\n",
                commit.short_hash(),
                commit.message.lines().next().unwrap_or_default(),
                commit.author_name
            ));
        }
        match build.duration {
            Some(ms) => body.push_str(&format!("Duration: {}s\n", (ms + 500) / 1000)),
            None => body.push_str("Duration: N/A\n"),
        }
        if let Some(conclusion) = &build.conclusion {
            body.push_str(&format!("Conclusion: {conclusion}\n"));
        }

        Self { subject, body }
    }
}
