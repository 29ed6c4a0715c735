//! Jobs repository
//!
//! Handles communication with the job queue for job-related operations:
//! - Pulling the next queued job
//! - Reporting state transitions (with the patch on completion)
//! - Appending log output
//! - Reading a job's remote state for cancellation checks

use anyhow::{Context, Result};
use async_trait::async_trait;
use splice_client::QueueClient;
use splice_core::domain::job::{Job, JobState};
use splice_core::domain::patch::Patch;
use uuid::Uuid;

/// Repository trait for job-related operations with the queue
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Acquires the next queued job for this runner
    ///
    /// # Returns
    /// The job, or `None` when the queue is empty
    async fn pull_job(&self, runner_id: &str) -> Result<Option<Job>>;

    /// Reports that a job entered `state`
    ///
    /// # Arguments
    /// * `job_id` - The ID of the job
    /// * `state` - The new state
    /// * `patch` - The produced patch, only for `COMPLETED`
    async fn report_state(&self, job_id: Uuid, state: JobState, patch: Option<Patch>)
    -> Result<()>;

    /// Appends rendered log lines to a job's log
    async fn append_log(&self, job_id: Uuid, content: String) -> Result<()>;

    /// Reads the job's state as the queue sees it
    async fn get_job_state(&self, job_id: Uuid) -> Result<JobState>;
}

/// `JobRepository` backed by the HTTP queue client
pub struct QueueJobRepository {
    client: QueueClient,
}

impl QueueJobRepository {
    /// Creates a new queue-backed job repository
    ///
    /// # Arguments
    /// * `client` - Configured queue client
    pub fn new(client: QueueClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl JobRepository for QueueJobRepository {
    async fn pull_job(&self, runner_id: &str) -> Result<Option<Job>> {
        self.client
            .pull_job(runner_id)
            .await
            .context("Failed to pull job")
    }

    async fn report_state(
        &self,
        job_id: Uuid,
        state: JobState,
        patch: Option<Patch>,
    ) -> Result<()> {
        self.client
            .report_state(job_id, state, patch)
            .await
            .with_context(|| format!("Failed to report state {} for job {}", state, job_id))
    }

    async fn append_log(&self, job_id: Uuid, content: String) -> Result<()> {
        self.client
            .append_log(job_id, content)
            .await
            .with_context(|| format!("Failed to append logs for job {}", job_id))
    }

    async fn get_job_state(&self, job_id: Uuid) -> Result<JobState> {
        self.client
            .get_job_state(job_id)
            .await
            .with_context(|| format!("Failed to read state of job {}", job_id))
    }
}
