//! Execution service
//!
//! Runs a job's action against its repository through the engine. Everything
//! job-visible goes to the caller's log sink; phase changes go to the
//! caller's observer so they can be reported to the queue as they happen.

use async_trait::async_trait;
use splice_core::domain::job::Job;
use splice_engine::{ActionRunError, Cancellation, Engine, ExecRequest, Execution, LogSink, PhaseObserver};
use tracing::info;

/// Service trait for executing jobs
#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Executes a job
    ///
    /// # Arguments
    /// * `job` - The job to run
    /// * `sink` - Receives the job's log
    /// * `observer` - Told about each phase the job enters
    /// * `cancel` - Aborts the run when tripped
    ///
    /// # Returns
    /// The produced patch, or the failure with any partial patch
    async fn execute(
        &self,
        job: &Job,
        sink: &dyn LogSink,
        observer: &dyn PhaseObserver,
        cancel: &Cancellation,
    ) -> Result<Execution, ActionRunError>;

    /// Stores a job's successful result so a repeat of the same job can be
    /// answered without running it
    async fn remember(&self, job: &Job, execution: &Execution);
}

/// Standard implementation of ExecutionService
pub struct StandardExecutionService {
    engine: Engine,
}

impl StandardExecutionService {
    /// Creates a new execution service around a configured engine
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl ExecutionService for StandardExecutionService {
    async fn execute(
        &self,
        job: &Job,
        sink: &dyn LogSink,
        observer: &dyn PhaseObserver,
        cancel: &Cancellation,
    ) -> Result<Execution, ActionRunError> {
        info!(
            "Starting execution of job {} - {} @ {}",
            job.id, job.repository, job.base_revision
        );

        let request = ExecRequest::from(job);
        let execution = self.engine.execute(&request, sink, observer, cancel).await?;

        info!(
            "Job {} produced {} bytes of diff{}",
            job.id,
            execution.patch.diff.len(),
            if execution.cached { " (cached)" } else { "" }
        );
        Ok(execution)
    }

    async fn remember(&self, job: &Job, execution: &Execution) {
        self.engine.remember(&ExecRequest::from(job), execution).await;
    }
}
