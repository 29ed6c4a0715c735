//! Local execution entry point
//!
//! `Engine::execute` runs one action against one repository revision:
//! cache check, stage, pull, run steps, diff, cache store. Both the runner and
//! the `splice exec` command drive execution through it.

use crate::cache::{CacheKey, ResultCache};
use crate::cancel::Cancellation;
use crate::diff::DiffTool;
use crate::error::{ActionRunError, EngineError};
use crate::executor::{PulledImages, StepExecutor, StepTarget, relative_cache_path};
use crate::sink::LogSink;
use crate::snapshot::Stager;
use async_trait::async_trait;
use splice_core::domain::action::{Action, Step};
use splice_core::domain::job::{Job, JobState};
use splice_core::domain::patch::Patch;
use splice_core::domain::repository::Repository;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One action run requested against one repository revision
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub repository: Repository,
    pub revision: String,
    pub action: Action,
    pub env: BTreeMap<String, String>,
    pub job_id: Option<Uuid>,
}

impl ExecRequest {
    pub fn new(repository: Repository, revision: impl Into<String>, action: Action) -> Self {
        Self {
            repository,
            revision: revision.into(),
            action,
            env: BTreeMap::new(),
            job_id: None,
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    fn cache_key(&self) -> CacheKey {
        CacheKey::new(
            self.repository.name.clone(),
            self.revision.clone(),
            self.action.steps.clone(),
        )
        .with_env(self.env.clone())
    }
}

impl From<&Job> for ExecRequest {
    fn from(job: &Job) -> Self {
        Self {
            repository: job.repository.clone(),
            revision: job.base_revision.clone(),
            action: job.action.clone(),
            env: job.env.clone(),
            job_id: Some(job.id),
        }
    }
}

/// Receives the preparation phases of a run as it enters them
#[async_trait]
pub trait PhaseObserver: Send + Sync {
    async fn phase(&self, state: JobState);
}

/// Observer that ignores phases
pub struct NoopObserver;

#[async_trait]
impl PhaseObserver for NoopObserver {
    async fn phase(&self, _state: JobState) {}
}

/// Successful outcome of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub patch: Patch,
    /// True when the patch came from the result cache and nothing ran
    pub cached: bool,
}

/// Checks that every step of `action` can be executed
pub fn validate(action: &Action) -> Result<(), EngineError> {
    for (i, step) in action.steps.iter().enumerate() {
        match step {
            Step::Command { args } if args.is_empty() || args[0].trim().is_empty() => {
                return Err(EngineError::InvalidAction(format!(
                    "step {} has an empty command",
                    i + 1
                )));
            }
            Step::Container { image, .. } if image.trim().is_empty() => {
                return Err(EngineError::InvalidAction(format!(
                    "step {} has no container image",
                    i + 1
                )));
            }
            Step::Container { cache_dirs, .. } => {
                if let Some(dir) = cache_dirs.iter().find(|d| relative_cache_path(d).is_none()) {
                    return Err(EngineError::InvalidAction(format!(
                        "step {}: cache directory {:?} must be an absolute path without '..'",
                        i + 1,
                        dir
                    )));
                }
            }
            Step::Command { .. } => {}
        }
    }
    Ok(())
}

pub struct Engine {
    stager: Stager,
    executor: StepExecutor,
    diff: DiffTool,
    cache: Arc<dyn ResultCache>,
}

impl Engine {
    pub fn new(
        stager: Stager,
        executor: StepExecutor,
        diff: DiffTool,
        cache: Arc<dyn ResultCache>,
    ) -> Self {
        Self {
            stager,
            executor,
            diff,
            cache,
        }
    }

    pub fn executor(&self) -> &StepExecutor {
        &self.executor
    }

    /// Runs `request` end to end
    ///
    /// A cache hit returns without fetching, staging or creating containers,
    /// and cache read failures count as misses. A fresh result is not stored
    /// here: callers hand it to [`Engine::remember`] once the run is
    /// completed. When a step fails the tree is still diffed and the result is
    /// returned as `ActionRunError::partial_patch`. The execution context is
    /// removed on every path, cancellation included.
    ///
    /// # Arguments
    /// * `request` - Repository, revision, action and environment
    /// * `sink` - Receives the job-visible log
    /// * `observer` - Told about PREPARING, PULLING, CREATING and RUNNING
    /// * `cancel` - Tripping it aborts the run with `EngineError::Canceled`
    pub async fn execute(
        &self,
        request: &ExecRequest,
        sink: &dyn LogSink,
        observer: &dyn PhaseObserver,
        cancel: &Cancellation,
    ) -> Result<Execution, ActionRunError> {
        let repository = &request.repository;
        let revision = request.revision.as_str();
        let fail = |source: EngineError, partial_patch: Option<Patch>| ActionRunError {
            repository: repository.name.clone(),
            revision: revision.to_string(),
            partial_patch,
            source,
        };

        validate(&request.action).map_err(|e| fail(e, None))?;

        let key = request.cache_key();
        match self.cache.get(&key).await {
            Ok(Some(patch)) => {
                info!("Cache hit for {}@{}", repository, revision);
                sink.info(&format!("# Cache hit for {} @ {}", repository, revision));
                return Ok(Execution {
                    patch,
                    cached: true,
                });
            }
            Ok(None) => debug!("Cache miss for {}@{}", repository, revision),
            Err(e) => {
                warn!("Cache lookup for {}@{} failed: {}", repository, revision, e);
                sink.warning(&format!("# Cache lookup failed, running anyway: {}", e));
            }
        }

        sink.info(&format!(
            "# Repository {} @ {} ({} steps)",
            repository,
            revision,
            request.action.steps.len()
        ));

        observer.phase(JobState::Preparing).await;
        let staged = tokio::select! {
            staged = self.stager.stage(repository, revision) => staged,
            _ = cancel.cancelled() => Err(EngineError::Canceled),
        };
        let mut context = staged.map_err(|e| fail(e, None))?;

        observer.phase(JobState::Pulling).await;
        let mut pulled = PulledImages::default();
        self.executor
            .pull_images(&request.action.images(), &mut pulled, sink, cancel)
            .await
            .map_err(|e| fail(e, None))?;

        // Containers are created per step; this phase covers the per-run
        // setup before the first one
        observer.phase(JobState::Creating).await;
        let target = StepTarget {
            repository,
            revision,
            workdir: context.workdir(),
            env: &request.env,
            job_id: request.job_id,
        };

        observer.phase(JobState::Running).await;
        let run = self
            .executor
            .run(&request.action.steps, &target, &mut pulled, sink, cancel)
            .await;

        if let Err(e) = run {
            if e.is_canceled() {
                info!("Execution of {}@{} canceled", repository, revision);
                context.cleanup();
                return Err(fail(e, None));
            }

            let partial = match self.diff.diff(context.pristine(), context.workdir()).await {
                Ok(diff) if !diff.is_empty() => Some(Patch::new(&repository.id, revision, diff)),
                Ok(_) => None,
                Err(diff_err) => {
                    warn!("Diff of partial result failed: {}", diff_err);
                    None
                }
            };
            context.cleanup();
            return Err(fail(e, partial));
        }

        let diff = self
            .diff
            .diff(context.pristine(), context.workdir())
            .await
            .map_err(|e| fail(e, None))?;
        context.cleanup();

        let patch = Patch::new(&repository.id, revision, diff);

        info!(
            "Executed {}@{} ({} bytes of diff)",
            repository,
            revision,
            patch.diff.len()
        );
        Ok(Execution {
            patch,
            cached: false,
        })
    }

    /// Stores a successful execution in the result cache
    ///
    /// Results that came from the cache are not written again. Write
    /// failures are only logged.
    pub async fn remember(&self, request: &ExecRequest, execution: &Execution) {
        if execution.cached {
            return;
        }
        if let Err(e) = self.cache.set(&request.cache_key(), &execution.patch).await {
            warn!(
                "Failed to cache result for {}@{}: {}",
                request.repository, request.revision, e
            );
        }
    }
}
