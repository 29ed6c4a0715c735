//! In-memory queue and execution service for scheduler tests

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use splice_core::domain::action::{Action, Step};
use splice_core::domain::job::{Job, JobState};
use splice_core::domain::patch::Patch;
use splice_core::domain::repository::Repository;
use splice_engine::{
    ActionRunError, Cancellation, EngineError, Execution, LogSink, PhaseObserver,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use crate::repository::JobRepository;

pub fn job() -> Job {
    Job {
        id: Uuid::new_v4(),
        repository: Repository::new("UmVwbzox", "github.com/acme/app"),
        base_revision: "main".to_string(),
        action: Action::new(vec![
            Step::command(["sh", "-c", "echo a >> FILE"]),
            Step::command(["false"]),
        ]),
        env: BTreeMap::new(),
        state: JobState::Preparing,
    }
}

/// Everything the runner sent to the queue, in order
#[derive(Debug, Clone)]
pub enum Event {
    State(Uuid, JobState, Option<Patch>),
    Log(Uuid, String),
}

#[derive(Default)]
pub struct FakeQueue {
    queued: Mutex<VecDeque<Job>>,
    events: Mutex<Vec<Event>>,
    remote_states: Mutex<HashMap<Uuid, JobState>>,
    fail_reports: AtomicBool,
}

impl FakeQueue {
    pub fn enqueue(&self, job: Job) {
        self.queued.lock().unwrap().push_back(job);
    }

    pub fn cancel_remotely(&self, job_id: Uuid) {
        self.remote_states
            .lock()
            .unwrap()
            .insert(job_id, JobState::Canceled);
    }

    pub fn fail_reports(&self) {
        self.fail_reports.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn reported_states(&self, job_id: Uuid) -> Vec<JobState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::State(id, state, _) if id == job_id => Some(state),
                _ => None,
            })
            .collect()
    }

    pub fn completed_patch(&self, job_id: Uuid) -> Option<Patch> {
        self.events().into_iter().find_map(|e| match e {
            Event::State(id, JobState::Completed, patch) if id == job_id => patch,
            _ => None,
        })
    }

    pub fn log_text(&self, job_id: Uuid) -> String {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Log(id, content) if id == job_id => Some(content),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl JobRepository for FakeQueue {
    async fn pull_job(&self, _runner_id: &str) -> Result<Option<Job>> {
        Ok(self.queued.lock().unwrap().pop_front())
    }

    async fn report_state(&self, job_id: Uuid, state: JobState, patch: Option<Patch>) -> Result<()> {
        if self.fail_reports.load(Ordering::SeqCst) {
            return Err(anyhow!("queue unavailable"));
        }
        self.events
            .lock()
            .unwrap()
            .push(Event::State(job_id, state, patch));
        Ok(())
    }

    async fn append_log(&self, job_id: Uuid, content: String) -> Result<()> {
        self.events.lock().unwrap().push(Event::Log(job_id, content));
        Ok(())
    }

    async fn get_job_state(&self, job_id: Uuid) -> Result<JobState> {
        Ok(self
            .remote_states
            .lock()
            .unwrap()
            .get(&job_id)
            .copied()
            .unwrap_or(JobState::Running))
    }
}

/// What the fake execution does with a job
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Goes through every phase and produces this diff
    Succeed(String),
    /// Returns this diff from the cache without entering any phase
    Cached(String),
    /// Fails at step 2 after the first step changed a file
    Fail,
    /// Runs until canceled
    Hang,
}

pub struct FakeExecution {
    behavior: Behavior,
    remembered: Mutex<Vec<Uuid>>,
}

impl FakeExecution {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            remembered: Mutex::new(Vec::new()),
        }
    }

    /// Jobs whose result was handed back for caching, in order
    pub fn remembered(&self) -> Vec<Uuid> {
        self.remembered.lock().unwrap().clone()
    }
}

async fn enter_running(observer: &dyn PhaseObserver) {
    for state in [
        JobState::Preparing,
        JobState::Pulling,
        JobState::Creating,
        JobState::Running,
    ] {
        observer.phase(state).await;
    }
}

#[async_trait]
impl crate::service::ExecutionService for FakeExecution {
    async fn execute(
        &self,
        job: &Job,
        sink: &dyn LogSink,
        observer: &dyn PhaseObserver,
        cancel: &Cancellation,
    ) -> std::result::Result<Execution, ActionRunError> {
        let patch = |diff: &str| Patch::new(&job.repository.id, &job.base_revision, diff);
        let fail = |source: EngineError, partial_patch: Option<Patch>| ActionRunError {
            repository: job.repository.name.clone(),
            revision: job.base_revision.clone(),
            partial_patch,
            source,
        };

        match &self.behavior {
            Behavior::Cached(diff) => Ok(Execution {
                patch: patch(diff),
                cached: true,
            }),
            Behavior::Succeed(diff) => {
                enter_running(observer).await;
                sink.info("# Step 1: sh -c 'echo hi'");
                sink.info("# Step 1: done. (1ms)");
                Ok(Execution {
                    patch: patch(diff),
                    cached: false,
                })
            }
            Behavior::Fail => {
                enter_running(observer).await;
                sink.info("# Step 1: done. (1ms)");
                sink.error("# Step 2: error: exit status 1 (1ms)");
                Err(fail(
                    EngineError::Step {
                        index: 2,
                        description: "false".to_string(),
                        exit_code: Some(1),
                        output: String::new(),
                    },
                    Some(patch("--- FILE\n+++ FILE\n@@ -0,0 +1 @@\n+partial\n")),
                ))
            }
            Behavior::Hang => {
                enter_running(observer).await;
                cancel.cancelled().await;
                Err(fail(EngineError::Canceled, None))
            }
        }
    }

    async fn remember(&self, job: &Job, _execution: &Execution) {
        self.remembered.lock().unwrap().push(job.id);
    }
}
