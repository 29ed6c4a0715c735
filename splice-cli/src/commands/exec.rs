//! Exec command handler
//!
//! Runs one action against each requested repository on this machine,
//! without a job queue. Repositories run concurrently up to `-j`; each gets
//! its own log file. A status line per repository goes to stderr and the
//! JSON list of non-empty patches goes to stdout.

use anyhow::{Context, Result, anyhow};
use clap::Args;
use colored::*;
use splice_core::domain::action::Action;
use splice_core::domain::patch::Patch;
use splice_core::domain::repository::Repository;
use splice_engine::{Cancellation, DiffStat, Engine, ExecRequest, LogSink, NoopObserver};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::Config;
use crate::sink::FileSink;
use crate::types::{RepoRevision, load_action, parse_duration};

/// Arguments of `splice exec`
#[derive(Args)]
pub struct ExecArgs {
    /// Action file (JSON); read from stdin when omitted
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Repository and revision to run against, e.g. github.com/acme/app@main
    #[arg(short, long = "repo", required = true, value_parser = RepoRevision::parse)]
    repos: Vec<RepoRevision>,

    /// Maximum number of repositories processed at the same time
    #[arg(short = 'j', long, default_value_t = default_parallelism())]
    parallel: usize,

    /// Keep the log files of successful runs
    #[arg(long)]
    keep_logs: bool,

    /// Cancel everything still running after this long (e.g. 90s, 60m, 2h)
    #[arg(long, default_value = "60m", value_parser = parse_duration)]
    timeout: Duration,
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Result of running the action against one repository
#[derive(Debug)]
pub(crate) enum Outcome {
    Done { patch: Patch, cached: bool },
    Failed { error: String, log_file: PathBuf },
}

pub(crate) struct ExecSettings {
    pub log_dir: PathBuf,
    pub keep_logs: bool,
    pub verbose: bool,
}

/// Handle `splice exec`
pub async fn handle_exec(args: ExecArgs, config: &Config) -> Result<()> {
    let action = Arc::new(load_action(args.file.as_deref())?);
    splice_engine::validate(&action).context("Invalid action")?;

    let engine = Arc::new(config.engine().await?);
    let settings = Arc::new(ExecSettings {
        log_dir: config.temp_dir.clone(),
        keep_logs: args.keep_logs,
        verbose: config.verbose,
    });

    let cancel = Cancellation::new();
    cancel.cancel_after(args.timeout);
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{}", "Interrupted, canceling...".yellow());
                cancel.cancel();
            }
        });
    }

    let total = args.repos.len();
    let semaphore = Arc::new(Semaphore::new(args.parallel.max(1)));
    let mut tasks = JoinSet::new();

    for (index, repo) in args.repos.into_iter().enumerate() {
        let engine = Arc::clone(&engine);
        let action = Arc::clone(&action);
        let settings = Arc::clone(&settings);
        let semaphore = Arc::clone(&semaphore);
        let cancel = cancel.clone();

        tasks.spawn(async move {
            // The semaphore is never closed
            let _permit = semaphore.acquire_owned().await.ok();
            let outcome = run_repository(&engine, &action, &repo, &settings, &cancel).await;
            (index, repo, outcome)
        });
    }

    let mut outcomes: Vec<Option<Outcome>> = (0..total).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, repo, outcome)) => {
                eprintln!("{}", status_line(&repo, &outcome));
                outcomes[index] = Some(outcome);
            }
            Err(e) => warn!("Repository task panicked: {}", e),
        }
    }

    let patches: Vec<&Patch> = outcomes
        .iter()
        .flatten()
        .filter_map(|outcome| match outcome {
            Outcome::Done { patch, .. } if !patch.is_empty() => Some(patch),
            _ => None,
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&patches)?);

    let succeeded = outcomes
        .iter()
        .flatten()
        .filter(|o| matches!(o, Outcome::Done { .. }))
        .count();
    if succeeded < total {
        return Err(anyhow!(
            "{} of {} repositories failed",
            total - succeeded,
            total
        ));
    }
    Ok(())
}

/// Runs the action against one repository, logging to a fresh log file
pub(crate) async fn run_repository(
    engine: &Engine,
    action: &Action,
    repo: &RepoRevision,
    settings: &ExecSettings,
    cancel: &Cancellation,
) -> Outcome {
    // Local runs have no code host ID; the name identifies the repository
    let repository = Repository::new(&repo.name, &repo.name);
    let echo = settings.verbose.then(|| format!("[{}]", repo));
    let sink = match FileSink::create(&settings.log_dir, &repository.slug(), echo) {
        Ok(sink) => sink,
        Err(e) => {
            return Outcome::Failed {
                error: format!("{:#}", e),
                log_file: settings.log_dir.clone(),
            };
        }
    };

    let request = ExecRequest::new(repository, &repo.revision, action.clone());
    match engine.execute(&request, &sink, &NoopObserver, cancel).await {
        Ok(execution) => {
            engine.remember(&request, &execution).await;
            debug!("Log for {} is {}", repo, sink.path().display());
            if !settings.keep_logs {
                sink.remove();
            }
            Outcome::Done {
                patch: execution.patch,
                cached: execution.cached,
            }
        }
        Err(e) => {
            sink.error(&format!("# ERROR: {}", e.source));
            if let Some(partial) = &e.partial_patch {
                sink.info("# Changes made before the failure:");
                for line in partial.diff.lines() {
                    sink.info(line);
                }
            }
            Outcome::Failed {
                error: e.to_string(),
                log_file: sink.path().to_path_buf(),
            }
        }
    }
}

fn status_line(repo: &RepoRevision, outcome: &Outcome) -> String {
    match outcome {
        Outcome::Done { patch, cached } => {
            let summary = match DiffStat::from_patch(&patch.diff) {
                Ok(stat) => stat.to_string(),
                Err(e) => format!("unreadable diff: {}", e),
            };
            let cached = if *cached {
                format!(" {}", "(cached)".dimmed())
            } else {
                String::new()
            };
            format!(
                "{} {} {}{}",
                "✔".green(),
                repo.to_string().bold(),
                summary.green(),
                cached
            )
        }
        Outcome::Failed { error, log_file } => format!(
            "{} {} {}\n    {}",
            "✘".red(),
            repo.to_string().bold(),
            format!("error: see {}", log_file.display()).red(),
            error.dimmed()
        ),
    }
}
