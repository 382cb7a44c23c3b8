//! Build inspection commands.

use anyhow::Result;
use minici_core::{BuildRecord, BuildStatus};

use crate::client::ApiClient;

pub async fn list(api_url: &str, limit: usize) -> Result<()> {
    let builds = ApiClient::new(api_url).list_builds(limit).await?;
    if builds.is_empty() {
        println!("No builds yet");
        return Ok(());
    }
    for build in &builds {
        println!("{}", summary_line(build));
    }
    Ok(())
}

pub async fn show(api_url: &str, id: &str) -> Result<()> {
    let build = ApiClient::new(api_url).get_build(id).await?;

    println!("Build {}", build.id);
    println!("  {}", summary_line(&build));
    if let Some(commit) = &build.commit {
        println!("  commit:     {} {} ({})", commit.short_hash(), commit.message, commit.author_name);
    }
    if let Some(conclusion) = &build.conclusion {
        println!("  conclusion: {conclusion}");
    }
    if let Some(ms) = build.duration {
        println!("  duration:   {}", format_duration(ms));
    }
    println!("  triggered:  {} at {}", build.trigger.as_str(), build.created_at);

    if !build.output.is_empty() {
        println!("\n--- Output ---");
        print!("{}", build.output);
        if !build.output.ends_with('\n') {
            println!();
        }
    }
    Ok(())
}

fn status_marker(status: BuildStatus) -> &'static str {
    match status {
        BuildStatus::Pending => "○",
        BuildStatus::Running => "▶",
        BuildStatus::Success => "✓",
        BuildStatus::Failure => "✗",
        BuildStatus::Error => "!",
    }
}

fn summary_line(build: &BuildRecord) -> String {
    format!(
        "{} {:<8} {} {}@{}",
        status_marker(build.status),
        build.status.as_str(),
        build.id,
        build.repo_name(),
        build.branch
    )
}

fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minici_core::TriggerSource;

    #[test]
    fn test_summary_line() {
        let build = BuildRecord::new("https://github.com/acme/widgets.git", "main", TriggerSource::Manual);
        let line = summary_line(&build);
        assert!(line.starts_with("○ pending"));
        assert!(line.ends_with("widgets@main"));
        assert!(line.contains(&build.id.to_string()));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(250), "250ms");
        assert_eq!(format_duration(1500), "1.5s");
        assert_eq!(format_duration(125_000), "2m05s");
    }
}
