//! Job poller
//!
//! Runs a fixed number of worker slots. Each slot pulls one job at a time
//! from the queue and owns it until the terminal state has been reported.
//! While a job runs, two helper tasks accompany it: a log flusher that sends
//! buffered output to the queue on an interval, and a cancel watcher that
//! trips the job's cancellation when the queue marks it `CANCELED` or the
//! runner is shutting down.

use splice_core::domain::job::{Job, JobState};
use splice_engine::{Cancellation, LogSink};
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::repository::JobRepository;
use crate::scheduler::JobLifecycle;
use crate::service::{ExecutionService, InMemoryLogBuffer, LogBufferService};
use crate::sinks::BufferedLogSink;

/// Job poller that pulls and executes jobs on a fixed set of slots
#[derive(Clone)]
pub struct JobPoller {
    config: Config,
    jobs: Arc<dyn JobRepository>,
    execution: Arc<dyn ExecutionService>,
    shutdown: Cancellation,
}

impl JobPoller {
    /// Creates a new job poller
    ///
    /// # Arguments
    /// * `config` - Runner configuration (slots and intervals)
    /// * `jobs` - Queue access
    /// * `execution` - Runs a job's action
    pub fn new(
        config: Config,
        jobs: Arc<dyn JobRepository>,
        execution: Arc<dyn ExecutionService>,
    ) -> Self {
        Self {
            config,
            jobs,
            execution,
            shutdown: Cancellation::new(),
        }
    }

    /// Handle that stops the poller when tripped
    ///
    /// Slots stop pulling, running jobs are canceled and report `CANCELED`,
    /// and `run` returns once every slot is idle.
    pub fn shutdown_handle(&self) -> Cancellation {
        self.shutdown.clone()
    }

    /// Runs all worker slots until shutdown
    pub async fn run(&self) {
        info!(
            "Starting {} worker slot(s) (poll interval: {:?})",
            self.config.max_parallel_jobs, self.config.poll_interval
        );

        let mut slots = JoinSet::new();
        for slot in 0..self.config.max_parallel_jobs {
            let poller = self.clone();
            slots.spawn(async move { poller.slot_loop(slot).await });
        }

        while let Some(result) = slots.join_next().await {
            if let Err(e) = result {
                error!("Worker slot panicked: {}", e);
            }
        }

        info!("All worker slots stopped");
    }

    async fn slot_loop(&self, slot: usize) {
        debug!("Slot {} started", slot);

        while !self.shutdown.is_cancelled() {
            let pulled = tokio::select! {
                pulled = self.jobs.pull_job(&self.config.runner_id) => pulled,
                _ = self.shutdown.cancelled() => break,
            };

            match pulled {
                Ok(Some(job)) => {
                    self.run_job(job).await;
                    // Ask for more work right away while the queue has some
                    continue;
                }
                Ok(None) => debug!("Slot {}: no jobs available", slot),
                Err(e) => warn!("Slot {}: {:#}", slot, e),
            }

            tokio::select! {
                _ = time::sleep(self.config.poll_interval) => {}
                _ = self.shutdown.cancelled() => break,
            }
        }

        debug!("Slot {} stopped", slot);
    }

    /// Executes one job and reports its terminal state
    ///
    /// Every log line is sent to the queue before the terminal state, since
    /// the queue accepts no appends once a job is terminal.
    pub(crate) async fn run_job(&self, job: Job) {
        let job_id = job.id;
        info!(
            "Starting job {} ({} @ {})",
            job_id, job.repository, job.base_revision
        );

        let buffer = InMemoryLogBuffer::new();
        let sink = BufferedLogSink::new(Arc::new(buffer.clone()));
        let lifecycle = JobLifecycle::new(job_id, Arc::clone(&self.jobs));
        let cancel = Cancellation::new();
        let done = Cancellation::new();

        let flusher = self.spawn_log_flusher(job_id, buffer, done.clone());
        let watcher = self.spawn_cancel_watcher(job_id, cancel.clone(), done.clone());

        let result = self
            .execution
            .execute(&job, &sink, &lifecycle, &cancel)
            .await;

        let (state, completed) = match result {
            Ok(execution) => {
                // A cached result never passes through the engine's phases
                lifecycle.transition(JobState::Running, None).await;
                (JobState::Completed, Some(execution))
            }
            Err(e) if e.is_canceled() => {
                sink.warning("# Job canceled");
                (JobState::Canceled, None)
            }
            Err(e) => {
                error!("Job {} failed: {}", job_id, e);
                sink.error(&format!("# ERROR: {}", e.source));
                if let Some(partial) = &e.partial_patch {
                    sink.info("# Changes made before the failure:");
                    for line in partial.diff.lines() {
                        sink.info(line);
                    }
                }
                (JobState::Errored, None)
            }
        };

        done.cancel();
        if let Err(e) = flusher.await {
            warn!("Log flusher for job {} panicked: {}", job_id, e);
        }
        if let Err(e) = watcher.await {
            warn!("Cancel watcher for job {} panicked: {}", job_id, e);
        }

        match completed {
            // Cached only once the queue has accepted the completion
            Some(execution) => {
                if lifecycle.complete(execution.patch.clone()).await {
                    self.execution.remember(&job, &execution).await;
                }
            }
            None => {
                lifecycle.transition(state, None).await;
            }
        }
        info!("Job {} finished: {}", job_id, lifecycle.state());
    }

    /// Spawns a task that sends buffered logs periodically and once more
    /// when `done` trips
    fn spawn_log_flusher(
        &self,
        job_id: Uuid,
        buffer: InMemoryLogBuffer,
        done: Cancellation,
    ) -> JoinHandle<()> {
        let jobs = Arc::clone(&self.jobs);
        let interval = self.config.log_send_interval;

        tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => flush(jobs.as_ref(), job_id, &buffer).await,
                    _ = done.cancelled() => break,
                }
            }

            flush(jobs.as_ref(), job_id, &buffer).await;
        })
    }

    /// Spawns a task that trips `cancel` when the queue reports the job as
    /// `CANCELED` or the runner shuts down, until `done` trips
    fn spawn_cancel_watcher(
        &self,
        job_id: Uuid,
        cancel: Cancellation,
        done: Cancellation,
    ) -> JoinHandle<()> {
        let jobs = Arc::clone(&self.jobs);
        let shutdown = self.shutdown.clone();
        let interval = self.config.cancel_check_interval;

        tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => match jobs.get_job_state(job_id).await {
                        Ok(JobState::Canceled) => {
                            info!("Job {} was canceled remotely", job_id);
                            cancel.cancel();
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => debug!("Cancel check for job {} failed: {:#}", job_id, e),
                    },
                    _ = shutdown.cancelled() => {
                        info!("Canceling job {} for shutdown", job_id);
                        cancel.cancel();
                        break;
                    }
                    _ = done.cancelled() => break,
                }
            }
        })
    }
}

/// Sends everything currently buffered; failures are logged and the lines
/// are dropped
async fn flush(jobs: &dyn JobRepository, job_id: Uuid, buffer: &dyn LogBufferService) {
    let content = buffer.drain_rendered();
    if content.is_empty() {
        return;
    }

    debug!("Sending {} bytes of logs for job {}", content.len(), job_id);
    if let Err(e) = jobs.append_log(job_id, content).await {
        warn!("{:#}", e);
    }
}
