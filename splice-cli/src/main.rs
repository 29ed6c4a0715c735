//! Splice CLI
//!
//! Command-line interface for running actions locally against one or more
//! repositories, without a job queue, and for checking action files.

mod commands;
mod config;
mod sink;
mod types;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use splice_engine::ArchiveFormat;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "splice")]
#[command(about = "Run actions against repository snapshots and collect the patches", long_about = None)]
struct Cli {
    /// Code host serving repository archives
    #[arg(
        long,
        global = true,
        env = "SPLICE_ENDPOINT",
        default_value = "http://localhost:8080"
    )]
    endpoint: String,

    /// Token sent as `Authorization: token <value>`
    #[arg(long, global = true, env = "SPLICE_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Cache root for results and container caches
    #[arg(long, global = true, env = "SPLICE_CACHE_DIR")]
    cache: Option<PathBuf>,

    /// Container runtime binary
    #[arg(long, global = true, env = "CONTAINER_RUNTIME", default_value = "podman")]
    runtime: String,

    /// Repository archive format (zip or tar.gz)
    #[arg(long, global = true, default_value = "zip")]
    archive_format: ArchiveFormat,

    /// Print engine diagnostics and job logs to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries the patch list; diagnostics go to stderr
    let default_filter = if cli.verbose {
        "splice=debug,splice_engine=debug"
    } else {
        "warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config {
        endpoint: cli.endpoint,
        access_token: cli.access_token.filter(|t| !t.is_empty()),
        cache_dir: cli.cache.unwrap_or_else(splice_engine::default_cache_dir),
        temp_dir: std::env::temp_dir(),
        runtime: cli.runtime,
        archive_format: cli.archive_format,
        verbose: cli.verbose,
    };

    handle_command(cli.command, &config).await
}
