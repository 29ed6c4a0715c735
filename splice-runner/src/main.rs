//! Splice Runner
//!
//! A stateless worker that pulls action jobs from a remote queue, executes
//! them against repository snapshots, and reports the resulting patches.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Repositories: HTTP communication with the job queue
//! - Services: Business logic (execution, log buffering, orphan reclamation)
//! - Scheduler: Worker slots and per-job lifecycle management
//!
//! Each worker slot pulls one job at a time, streams its log back
//! periodically, watches for remote cancellation, and reports the terminal
//! state once the log is flushed.

mod config;
mod repository;
mod scheduler;
mod service;
mod sinks;

use anyhow::Result;
use splice_client::QueueClient;
use splice_engine::{
    ArchiveSource, CliRuntime, ContainerRuntime, DiffTool, DiskCache, Engine, StepExecutor, Stager,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::repository::{JobRepository, QueueJobRepository};
use crate::scheduler::JobPoller;
use crate::service::{ExecutionService, StandardExecutionService, reclaim_orphans};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "splice_runner=info,splice_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Splice Runner");

    // Load configuration
    let config = load_config()?;
    info!(
        "Loaded configuration: runner_id={}, queue_url={}, endpoint={}",
        config.runner_id, config.queue_url, config.endpoint
    );

    // Initialize queue client
    let mut client = QueueClient::new(config.queue_url.clone());
    if let Some(token) = &config.access_token {
        client = client.with_access_token(token.clone());
    }
    let jobs: Arc<dyn JobRepository> = Arc::new(QueueJobRepository::new(client));

    info!("Queue client initialized");

    // Initialize the container runtime
    let cli_runtime = CliRuntime::new(config.container_runtime.clone());
    if let Err(e) = cli_runtime.check_available().await {
        warn!("Container steps will fail: {}", e);
    }
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(cli_runtime);

    // Containers left behind by a previous run of this host
    reclaim_orphans(runtime.as_ref()).await;

    // Initialize services
    let source = ArchiveSource::new(config.endpoint.clone())
        .with_access_token(config.access_token.clone())
        .with_format(config.archive_format);
    let engine = Engine::new(
        Stager::new(source, config.temp_dir.clone()),
        StepExecutor::new(Arc::clone(&runtime), config.cache_dir.clone()),
        DiffTool::probe("diff").await,
        Arc::new(DiskCache::under(&config.cache_dir)),
    );
    let execution_service: Arc<dyn ExecutionService> =
        Arc::new(StandardExecutionService::new(engine));

    info!("Services initialized");

    // Create job poller
    let poller = JobPoller::new(config.clone(), jobs, execution_service);

    let shutdown = poller.shutdown_handle();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown requested, canceling running jobs");
        shutdown.cancel();
    });

    info!("Runner initialized successfully");
    info!(
        "Slots: {}, Poll interval: {:?}, Log send interval: {:?}, Cancel check interval: {:?}",
        config.max_parallel_jobs,
        config.poll_interval,
        config.log_send_interval,
        config.cancel_check_interval
    );

    // Run until shutdown
    poller.run().await;

    reclaim_orphans(runtime.as_ref()).await;
    info!("Runner stopped");

    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(e) => {
            info!("Failed to load config from environment ({}), using defaults", e);
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
