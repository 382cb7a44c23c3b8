//! minici CLI tool.

use clap::{Parser, Subcommand};
use minici_core::BuildStatus;
use tracing_subscriber::EnvFilter;

mod client;
mod commands;

#[derive(Parser)]
#[command(name = "minici")]
#[command(about = "minici build CLI", long_about = None)]
struct Cli {
    /// API server URL
    #[arg(long, env = "MINICI_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trigger a build on the server
    Trigger {
        /// Repository clone URL
        repository: String,
        /// Branch to build
        #[arg(long)]
        branch: Option<String>,
    },
    /// Inspect builds on the server
    Builds {
        #[command(subcommand)]
        command: BuildCommands,
    },
    /// Run one build locally without a server
    Run {
        /// Repository clone URL or local path
        repository: String,
        /// Branch to build
        #[arg(long)]
        branch: Option<String>,
        /// System configuration file
        #[arg(long)]
        config: Option<String>,
    },
    /// Validate a system configuration file
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "minici.kdl")]
        path: String,
    },
}

#[derive(Subcommand)]
enum BuildCommands {
    /// List recent builds
    List {
        /// Maximum number of builds to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show build details and output
    Show {
        /// Build ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Trigger { repository, branch } => {
            commands::trigger(&cli.api_url, &repository, branch).await?;
        }
        Commands::Builds { command } => match command {
            BuildCommands::List { limit } => {
                commands::builds::list(&cli.api_url, limit).await?;
            }
            BuildCommands::Show { id } => {
                commands::builds::show(&cli.api_url, &id).await?;
            }
        },
        Commands::Run {
            repository,
            branch,
            config,
        } => {
            let status = commands::run::run_local(&repository, branch, config.as_deref()).await?;
            if status != BuildStatus::Success {
                std::process::exit(1);
            }
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
    }

    Ok(())
}
