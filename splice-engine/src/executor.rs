//! Step Executor
//!
//! Runs an action's steps, strictly in order, against a working tree. The
//! first failing step halts the run and leaves the tree as that step left it.
//!
//! Command steps are direct subprocesses rooted at the working tree. Container
//! steps run through a `ContainerRuntime` with the tree mounted at `/work` and
//! optional persistent cache directories keyed by (image, repository,
//! revision).

use crate::cancel::Cancellation;
use crate::container::{self, ContainerRuntime, ContainerSpec};
use crate::error::{EngineError, Result};
use crate::process;
use crate::sink::{LogSink, TailSink};
use sha2::{Digest, Sha256};
use splice_core::domain::action::Step;
use splice_core::domain::repository::Repository;
use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

/// Bytes of trailing step output attached to a step failure
pub const OUTPUT_TAIL_LIMIT: usize = 4096;

/// Where and for whom steps run
#[derive(Debug, Clone, Copy)]
pub struct StepTarget<'a> {
    pub repository: &'a Repository,
    pub revision: &'a str,
    pub workdir: &'a Path,
    pub env: &'a BTreeMap<String, String>,
    /// Labels containers for per-job reclamation when set
    pub job_id: Option<Uuid>,
}

/// Images already pulled during one run
#[derive(Debug, Default)]
pub struct PulledImages(HashSet<String>);

impl PulledImages {
    pub fn contains(&self, image: &str) -> bool {
        self.0.contains(image)
    }
}

pub struct StepExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    cache_root: PathBuf,
}

impl StepExecutor {
    /// # Arguments
    /// * `runtime` - Container runtime for container steps
    /// * `cache_root` - Process-wide cache root; container cache directories
    ///   live under `<cache_root>/container-cache`
    pub fn new(runtime: Arc<dyn ContainerRuntime>, cache_root: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            cache_root: cache_root.into(),
        }
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Host directory backing the persistent caches of one (image, repo, rev)
    pub fn cache_dir(&self, image: &str, repository: &Repository, revision: &str) -> PathBuf {
        let digest = Sha256::digest(format!("{}:{}:{}", image, repository.name, revision));
        self.cache_root
            .join("container-cache")
            .join(hex::encode(&digest[..16]))
    }

    /// Pulls every image not yet in `pulled`
    pub async fn pull_images(
        &self,
        images: &[&str],
        pulled: &mut PulledImages,
        sink: &dyn LogSink,
        cancel: &Cancellation,
    ) -> Result<()> {
        for image in images {
            if pulled.contains(image) {
                continue;
            }
            sink.info(&format!("# Pulling image {}", image));
            let started = Instant::now();
            tokio::select! {
                result = self.runtime.pull(image, sink) => result?,
                _ = cancel.cancelled() => return Err(EngineError::Canceled),
            }
            sink.info(&format!("# Pulled {}. ({:.2?})", image, started.elapsed()));
            pulled.0.insert(image.to_string());
        }
        Ok(())
    }

    /// Runs `steps` in order, stopping at the first failure
    ///
    /// Step indices in markers and errors are 1-based.
    pub async fn run(
        &self,
        steps: &[Step],
        target: &StepTarget<'_>,
        pulled: &mut PulledImages,
        sink: &dyn LogSink,
        cancel: &Cancellation,
    ) -> Result<()> {
        for (i, step) in steps.iter().enumerate() {
            let index = i + 1;
            if cancel.is_cancelled() {
                return Err(EngineError::Canceled);
            }

            sink.info(&format!("# Step {}: {}", index, step.describe()));
            let started = Instant::now();

            let result = match step {
                Step::Command { args } => self.run_command(index, step, args, target, sink, cancel).await,
                Step::Container {
                    image,
                    args,
                    cache_dirs,
                } => {
                    if let Err(e) = self.pull_images(&[image.as_str()], pulled, sink, cancel).await {
                        Err(e)
                    } else {
                        self.run_container(index, step, image, args, cache_dirs, target, sink, cancel)
                            .await
                    }
                }
            };

            match result {
                Ok(()) => {
                    sink.info(&format!("# Step {}: done. ({:.2?})", index, started.elapsed()));
                }
                Err(e) => {
                    sink.error(&format!(
                        "# Step {}: error: {}. ({:.2?})",
                        index,
                        e,
                        started.elapsed()
                    ));
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn run_command(
        &self,
        index: usize,
        step: &Step,
        args: &[String],
        target: &StepTarget<'_>,
        sink: &dyn LogSink,
        cancel: &Cancellation,
    ) -> Result<()> {
        let Some((program, rest)) = args.split_first() else {
            return Err(EngineError::InvalidAction(format!(
                "step {} has an empty command",
                index
            )));
        };

        let mut command = Command::new(program);
        command
            .args(rest)
            .current_dir(target.workdir)
            .envs(target.env.iter());

        let mut child = process::spawn_piped(&mut command).map_err(|e| EngineError::Step {
            index,
            description: step.describe(),
            exit_code: None,
            output: format!("failed to start {}: {}", program, e),
        })?;
        debug!("Spawned step {} as pid {:?}", index, child.id());

        let tail = TailSink::new(sink, OUTPUT_TAIL_LIMIT);
        let outcome = tokio::select! {
            status = async {
                process::pump_output(&mut child, &tail).await?;
                child.wait().await
            } => Some(status),
            _ = cancel.cancelled() => None,
        };

        let Some(status) = outcome else {
            if let Err(e) = child.kill().await {
                debug!("Killing step {} failed: {}", index, e);
            }
            return Err(EngineError::Canceled);
        };

        let status = status?;
        if status.success() {
            Ok(())
        } else {
            Err(EngineError::Step {
                index,
                description: step.describe(),
                exit_code: status.code(),
                output: tail.tail(),
            })
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_container(
        &self,
        index: usize,
        step: &Step,
        image: &str,
        args: &[String],
        cache_dirs: &[String],
        target: &StepTarget<'_>,
        sink: &dyn LogSink,
        cancel: &Cancellation,
    ) -> Result<()> {
        let mut spec = ContainerSpec::new(image, args.to_vec(), target.workdir.to_path_buf())
            .with_env(target.env);
        if let Some(job_id) = target.job_id {
            spec = spec.with_job(job_id);
        }

        if !cache_dirs.is_empty() {
            let base = self.cache_dir(image, target.repository, target.revision);
            for path in cache_dirs {
                let host = relative_cache_path(path)
                    .map(|relative| base.join(relative))
                    .filter(|host| host.starts_with(&base))
                    .ok_or_else(|| {
                        EngineError::InvalidAction(format!(
                            "step {}: cache directory {:?} leaves the cache root",
                            index, path
                        ))
                    })?;
                tokio::fs::create_dir_all(&host).await?;
                debug!("Mounting cache {} at {}", host.display(), path);
                spec = spec.with_mount(host, path.clone());
            }
        }

        let id = self.runtime.create(&spec).await?;
        info!("Step {} running in container {}", index, id);

        let tail = TailSink::new(sink, OUTPUT_TAIL_LIMIT);
        let outcome = tokio::select! {
            code = self.runtime.start_attached(&id, &tail) => Some(code),
            _ = cancel.cancelled() => None,
        };

        let Some(code) = outcome else {
            container::discard(self.runtime.as_ref(), &id).await;
            return Err(EngineError::Canceled);
        };

        if let Err(e) = self.runtime.remove(&id).await {
            tracing::warn!("Failed to remove container {}: {}", id, e);
        }

        match code? {
            0 => Ok(()),
            code => Err(EngineError::Step {
                index,
                description: step.describe(),
                exit_code: Some(code),
                output: tail.tail(),
            }),
        }
    }
}

/// Maps an absolute in-container cache path to its location relative to the
/// per-image cache directory
///
/// Returns `None` for relative paths and for paths with `..` components.
pub(crate) fn relative_cache_path(path: &str) -> Option<PathBuf> {
    let path = Path::new(path);
    if !path.is_absolute() {
        return None;
    }
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(part) => relative.push(part),
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    Some(relative)
}
