//! CLI command implementations.

pub mod builds;
pub mod run;

use anyhow::{Context, Result};
use minici_config::SystemConfig;

use crate::client::ApiClient;

pub async fn trigger(api_url: &str, repository: &str, branch: Option<String>) -> Result<()> {
    let handle = ApiClient::new(api_url)
        .trigger(repository, branch.as_deref())
        .await?;
    println!("Build {} queued (job {})", handle.build_id, handle.job_id);
    Ok(())
}

pub fn validate(path: &str) -> Result<()> {
    let config = SystemConfig::load(path).with_context(|| format!("Invalid configuration: {path}"))?;
    println!("Configuration is valid");
    println!("  bind:      {}", config.server.bind);
    println!("  workspace: {}", config.workspace_dir.display());
    println!("  mode:      {:?} ({} workers)", config.queue.mode, config.queue.workers);
    println!("  install:   {}", config.pipeline.install.command);
    println!("  test:      {}", config.pipeline.test.command);
    Ok(())
}
