//! minici API server

use anyhow::Context;
use clap::Parser;
use minici_api::services::LogNotifier;
use minici_api::ws::ChannelBroadcaster;
use minici_api::{AppState, routes};
use minici_config::{AdmissionMode, SystemConfig};
use minici_db::{BuildStore, InMemoryBuildStore, PgBuildStore, create_pool, run_migrations};
use minici_executor::LocalProcessSupervisor;
use minici_scheduler::{
    BuildPipeline, BuildService, DirectAdmitter, JobAdmitter, JobQueue, PipelineSettings,
    QueuedAdmitter,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_FILE: &str = "minici.kdl";

#[derive(Parser)]
#[command(name = "minici-server")]
#[command(about = "minici build server", long_about = None)]
struct Args {
    /// Path to the system configuration file
    #[arg(long, env = "MINICI_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = load_config(args.config.as_deref())?;
    info!(
        bind = %config.server.bind,
        workspace = %config.workspace_dir.display(),
        mode = ?config.queue.mode,
        "Loaded configuration"
    );

    std::fs::create_dir_all(&config.workspace_dir).with_context(|| {
        format!(
            "creating workspace directory {}",
            config.workspace_dir.display()
        )
    })?;

    let store: Arc<dyn BuildStore> = match &config.database_url {
        Some(url) => {
            info!("Connecting to database...");
            let pool = create_pool(url).await.context("connecting to database")?;
            run_migrations(&pool).await.context("running migrations")?;
            info!("Database connected");
            Arc::new(PgBuildStore::new(pool))
        }
        None => {
            warn!("No database configured, build history will not survive a restart");
            Arc::new(InMemoryBuildStore::new())
        }
    };

    let events = ChannelBroadcaster::new(1024);
    let pipeline = Arc::new(BuildPipeline::new(
        store.clone(),
        Arc::new(LocalProcessSupervisor::new()),
        Arc::new(events.clone()),
        Arc::new(LogNotifier),
        PipelineSettings::from(&config),
    ));

    let mut queue = None;
    let admitter: Arc<dyn JobAdmitter> = match config.queue.mode {
        AdmissionMode::Direct => Arc::new(DirectAdmitter::new(pipeline)),
        AdmissionMode::Queued => {
            let jobs = Arc::new(JobQueue::new());
            jobs.start(pipeline, config.queue.workers);
            queue = Some(jobs.clone());
            Arc::new(QueuedAdmitter::new(jobs))
        }
    };

    let builds = BuildService::new(store, admitter, config.default_branch.clone());
    let state = AppState::new(builds, config.webhook.secret.clone(), events);

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    info!("Starting server on {}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(queue) = queue {
        info!("Waiting for queued builds to finish");
        queue.shutdown().await;
    }
    info!("Server stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("MINICI_LOG_FORMAT").is_ok_and(|format| format == "json");
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SystemConfig> {
    if let Some(path) = path {
        return SystemConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()));
    }
    let default = Path::new(DEFAULT_CONFIG_FILE);
    if default.exists() {
        return SystemConfig::load(default)
            .with_context(|| format!("loading configuration from {DEFAULT_CONFIG_FILE}"));
    }
    SystemConfig::from_env().context("reading configuration from environment")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
