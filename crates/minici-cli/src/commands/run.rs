//! Local build execution command.

use anyhow::{Context, Result};
use async_trait::async_trait;
use minici_config::SystemConfig;
use minici_core::event::{BuildEvent, Broadcaster};
use minici_core::job::JobDescriptor;
use minici_core::notify::{Notifier, NotifyPolicy, Summary};
use minici_core::{BuildRecord, BuildStatus, TriggerSource};
use minici_db::{BuildStore, InMemoryBuildStore};
use minici_executor::LocalProcessSupervisor;
use minici_scheduler::worker::run_contained;
use minici_scheduler::{BuildPipeline, PipelineSettings};
use std::io::Write;
use std::sync::Arc;

/// Run one build in this process, streaming its output to the terminal.
pub async fn run_local(
    repository: &str,
    branch: Option<String>,
    config_path: Option<&str>,
) -> Result<BuildStatus> {
    let config = match config_path {
        Some(path) => SystemConfig::load(path)
            .with_context(|| format!("Failed to load config file: {path}"))?,
        None => SystemConfig::from_env().context("Failed to read configuration")?,
    };

    std::fs::create_dir_all(&config.workspace_dir).with_context(|| {
        format!(
            "Failed to create workspace directory: {}",
            config.workspace_dir.display()
        )
    })?;

    let branch = branch
        .filter(|b| !b.trim().is_empty())
        .unwrap_or_else(|| config.default_branch.clone());

    let mut settings = PipelineSettings::from(&config);
    settings.notify_policy = NotifyPolicy::AllTerminal;

    let store: Arc<dyn BuildStore> = Arc::new(InMemoryBuildStore::new());
    let pipeline = BuildPipeline::new(
        store.clone(),
        Arc::new(LocalProcessSupervisor::new()),
        Arc::new(ConsoleReporter),
        Arc::new(ConsoleNotifier),
        settings,
    );

    let build = store
        .create(repository, &branch, TriggerSource::Manual)
        .await
        .context("Failed to create build record")?;

    println!("Running build {} for {}@{}", build.id, repository, branch);
    println!("Working directory: {}", pipeline.workdir(repository, build.id).display());
    println!("\n--- Starting build ---\n");

    let status = run_contained(&pipeline, &JobDescriptor::for_build(&build)).await;
    Ok(status)
}

/// Prints lifecycle events and streamed output as they happen.
struct ConsoleReporter;

impl Broadcaster for ConsoleReporter {
    fn publish(&self, event: BuildEvent) {
        let Some(text) = render(&event) else { return };
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }
}

fn render(event: &BuildEvent) -> Option<String> {
    match event {
        BuildEvent::NewBuild { build } => Some(format!("▶ Build started ({})\n", build.status)),
        BuildEvent::BuildUpdate { output, .. } if !output.is_empty() => Some(output.clone()),
        BuildEvent::BuildUpdate { .. } => None,
        BuildEvent::BuildComplete { build } => Some(format!(
            "\n{} Build finished: {}\n",
            if build.status == BuildStatus::Success { "✓" } else { "✗" },
            build.conclusion.as_deref().unwrap_or(build.status.as_str())
        )),
        BuildEvent::BuildError { reason, .. } => Some(format!("\n! Build error: {reason}\n")),
    }
}

/// Prints the notification summary instead of delivering it.
struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn notify(&self, build: &BuildRecord, _recipients: &[String]) -> minici_core::Result<()> {
        let summary = Summary::of(build);
        println!("\n--- {} ---\n{}", summary.subject, summary.body);
        Ok(())
    }
}
