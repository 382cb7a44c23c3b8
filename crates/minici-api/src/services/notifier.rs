//! Notifier that writes build summaries to the log.

use async_trait::async_trait;
use minici_core::BuildRecord;
use minici_core::notify::{Notifier, Summary};
use tracing::{debug, info};

/// Renders a summary per recipient and logs it instead of sending mail.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, build: &BuildRecord, recipients: &[String]) -> minici_core::Result<()> {
        if recipients.is_empty() {
            debug!(build_id = %build.id, "No notification recipients configured");
            return Ok(());
        }

        let summary = Summary::of(build);
        for recipient in recipients {
            info!(
                build_id = %build.id,
                recipient = %recipient,
                subject = %summary.subject,
                "Sending build notification"
            );
            debug!(build_id = %build.id, body = %summary.body, "Notification body");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minici_core::{BuildStatus, TriggerSource};

    #[tokio::test]
    async fn test_notify_never_fails() {
        let mut build = BuildRecord::new("repo", "main", TriggerSource::Manual);
        build.transition(BuildStatus::Running).unwrap();
        build.finish(BuildStatus::Success, "All tests passed", None).unwrap();

        assert!(LogNotifier.notify(&build, &[]).await.is_ok());
        assert!(
            LogNotifier
                .notify(&build, &["dev@example.com".to_string()])
                .await
                .is_ok()
        );
    }
}
