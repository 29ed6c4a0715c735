//! Job lifecycle
//!
//! Tracks one job's state on the runner and forwards the transitions the
//! queue cares about (`RUNNING` and the terminal states). Illegal transitions
//! are refused and logged; reporting failures are logged and never abort the
//! job.

use async_trait::async_trait;
use splice_core::domain::job::JobState;
use splice_core::domain::patch::Patch;
use splice_engine::PhaseObserver;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::repository::JobRepository;

/// State machine of a single job
pub struct JobLifecycle {
    job_id: Uuid,
    state: Mutex<JobState>,
    jobs: Arc<dyn JobRepository>,
}

impl JobLifecycle {
    /// Creates the lifecycle of a freshly pulled job, in `PREPARING`
    pub fn new(job_id: Uuid, jobs: Arc<dyn JobRepository>) -> Self {
        Self {
            job_id,
            state: Mutex::new(JobState::Preparing),
            jobs,
        }
    }

    pub fn state(&self) -> JobState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Moves the job to `next`, reporting it when the queue tracks that state
    ///
    /// # Arguments
    /// * `next` - The state to enter
    /// * `patch` - Sent along with the report; only meaningful for `COMPLETED`
    ///
    /// # Returns
    /// Whether the transition happened
    pub async fn transition(&self, next: JobState, patch: Option<Patch>) -> bool {
        self.enter(next, patch).await.is_some()
    }

    /// Moves the job to `COMPLETED` with its patch
    ///
    /// # Returns
    /// Whether the queue acknowledged the completion
    pub async fn complete(&self, patch: Patch) -> bool {
        self.enter(JobState::Completed, Some(patch)).await == Some(true)
    }

    /// `None` when the transition is refused, otherwise whether the report
    /// (if any) reached the queue
    async fn enter(&self, next: JobState, patch: Option<Patch>) -> Option<bool> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state == next {
                return None;
            }
            if !state.can_transition_to(next) {
                warn!(
                    "Refusing transition {} -> {} for job {}",
                    *state, next, self.job_id
                );
                return None;
            }
            *state = next;
        }

        debug!("Job {} entered {}", self.job_id, next);
        if next.is_reported() {
            if let Err(e) = self.jobs.report_state(self.job_id, next, patch).await {
                warn!("{:#}", e);
                return Some(false);
            }
        }
        Some(true)
    }
}

#[async_trait]
impl PhaseObserver for JobLifecycle {
    async fn phase(&self, state: JobState) {
        self.transition(state, None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::testing::FakeQueue;

    #[tokio::test]
    async fn test_only_reported_states_reach_queue() {
        let queue = Arc::new(FakeQueue::default());
        let job_id = Uuid::new_v4();
        let lifecycle = JobLifecycle::new(job_id, queue.clone());

        assert!(lifecycle.transition(JobState::Pulling, None).await);
        assert!(lifecycle.transition(JobState::Creating, None).await);
        assert!(lifecycle.transition(JobState::Running, None).await);
        assert!(lifecycle.transition(JobState::Completed, None).await);

        assert_eq!(
            queue.reported_states(job_id),
            vec![JobState::Running, JobState::Completed]
        );
        assert_eq!(lifecycle.state(), JobState::Completed);
    }

    #[tokio::test]
    async fn test_illegal_transitions_are_refused() {
        let queue = Arc::new(FakeQueue::default());
        let job_id = Uuid::new_v4();
        let lifecycle = JobLifecycle::new(job_id, queue.clone());

        // Same state is a quiet no-op
        assert!(!lifecycle.transition(JobState::Preparing, None).await);
        // COMPLETED needs RUNNING first
        assert!(!lifecycle.transition(JobState::Completed, None).await);

        assert!(lifecycle.transition(JobState::Running, None).await);
        assert!(!lifecycle.transition(JobState::Pulling, None).await);
        assert!(lifecycle.transition(JobState::Canceled, None).await);
        assert!(!lifecycle.transition(JobState::Errored, None).await);

        assert_eq!(
            queue.reported_states(job_id),
            vec![JobState::Running, JobState::Canceled]
        );
    }

    #[tokio::test]
    async fn test_report_failure_still_transitions() {
        let queue = Arc::new(FakeQueue::default());
        queue.fail_reports();
        let lifecycle = JobLifecycle::new(Uuid::new_v4(), queue.clone());

        assert!(lifecycle.transition(JobState::Running, None).await);
        assert_eq!(lifecycle.state(), JobState::Running);
    }

    #[tokio::test]
    async fn test_complete_reports_whether_queue_acknowledged() {
        let patch = Patch::new("UmVwbzox", "main", "+x\n");

        let queue = Arc::new(FakeQueue::default());
        let lifecycle = JobLifecycle::new(Uuid::new_v4(), queue.clone());
        lifecycle.transition(JobState::Running, None).await;
        assert!(lifecycle.complete(patch.clone()).await);
        // Already terminal
        assert!(!lifecycle.complete(patch.clone()).await);

        let queue = Arc::new(FakeQueue::default());
        let lifecycle = JobLifecycle::new(Uuid::new_v4(), queue.clone());
        lifecycle.transition(JobState::Running, None).await;
        queue.fail_reports();
        assert!(!lifecycle.complete(patch).await);
        assert_eq!(lifecycle.state(), JobState::Completed);
    }
}
