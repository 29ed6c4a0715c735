//! Container runtime driver
//!
//! Container steps are run through a `ContainerRuntime`. The production
//! implementation shells out to the podman (or docker) CLI:
//! - Pulling images, with progress forwarded to the job log
//! - Creating labeled containers with bind mounts
//! - Starting attached and waiting for the exit code
//! - Killing and force-removing containers
//! - Listing containers by label for orphan reclamation

use crate::error::{EngineError, Result, truncate};
use crate::process;
use crate::sink::LogSink;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Label carried by every container this engine creates
pub const OWNER_LABEL: &str = "io.splice.runner";

/// Label carrying the job a container belongs to
pub const JOB_LABEL: &str = "io.splice.job";

/// Fixed in-container path of the working tree
pub const WORK_MOUNT: &str = "/work";

const CLI_OUTPUT_LIMIT: usize = 1024;

/// Host directory bind-mounted into a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: PathBuf,
    pub target: String,
}

/// Everything needed to create one step container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub args: Vec<String>,
    pub workdir: String,
    pub mounts: Vec<Mount>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

impl ContainerSpec {
    /// Creates a spec with the working tree mounted at `/work` and the
    /// ownership label set
    pub fn new(image: impl Into<String>, args: Vec<String>, workdir: PathBuf) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(OWNER_LABEL.to_string(), "true".to_string());
        Self {
            image: image.into(),
            args,
            workdir: WORK_MOUNT.to_string(),
            mounts: vec![Mount {
                source: workdir,
                target: WORK_MOUNT.to_string(),
            }],
            env: BTreeMap::new(),
            labels,
        }
    }

    pub fn with_job(mut self, job_id: impl std::fmt::Display) -> Self {
        self.labels.insert(JOB_LABEL.to_string(), job_id.to_string());
        self
    }

    pub fn with_mount(mut self, source: PathBuf, target: impl Into<String>) -> Self {
        self.mounts.push(Mount {
            source,
            target: target.into(),
        });
        self
    }

    pub fn with_env(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }
}

/// Lifecycle operations on containers
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull `image`, logging progress into `sink`
    async fn pull(&self, image: &str, sink: &dyn LogSink) -> Result<()>;

    /// Create (but do not start) a container, returning its ID
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    /// Start a created container with output attached to `sink`
    ///
    /// # Returns
    /// The container's exit code
    async fn start_attached(&self, id: &str, sink: &dyn LogSink) -> Result<i32>;

    async fn kill(&self, id: &str) -> Result<()>;

    /// Force-remove a container, running or not
    async fn remove(&self, id: &str) -> Result<()>;

    /// IDs of all containers, running or not, carrying `label`
    async fn list_labeled(&self, label: &str) -> Result<Vec<String>>;
}

/// `ContainerRuntime` driving the podman or docker CLI
#[derive(Debug, Clone)]
pub struct CliRuntime {
    binary: String,
}

impl CliRuntime {
    /// # Arguments
    /// * `binary` - Runtime executable, e.g. "podman" or "docker"
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }

    /// Checks that the runtime CLI is installed and answering
    pub async fn check_available(&self) -> Result<()> {
        let output = process::capture(self.command().arg("--version"))
            .await
            .map_err(|e| {
                EngineError::container(format!(
                    "failed to execute '{} --version'. Is {} installed? ({})",
                    self.binary, self.binary, e
                ))
            })?;

        if !output.status.success() {
            return Err(EngineError::container(format!(
                "{} is not working correctly: {}",
                self.binary,
                truncate(&output.combined(), CLI_OUTPUT_LIMIT)
            )));
        }

        info!("{} is available: {}", self.binary, output.stdout.trim());
        Ok(())
    }

    /// Runs a short runtime command and returns its stdout
    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = process::capture(self.command().args(args))
            .await
            .map_err(|e| EngineError::container(format!("{} {}: {}", self.binary, args[0], e)))?;

        if !output.status.success() {
            return Err(EngineError::container(format!(
                "{} {} exited with {}: {}",
                self.binary,
                args.join(" "),
                output.status,
                truncate(&output.combined(), CLI_OUTPUT_LIMIT)
            )));
        }
        Ok(output.stdout)
    }

    /// Arguments for `create`, excluding the binary itself
    pub fn create_args(spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec![
            "create".to_string(),
            "--workdir".to_string(),
            spec.workdir.clone(),
        ];
        for (key, value) in &spec.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }
        for mount in &spec.mounts {
            args.push("--mount".to_string());
            args.push(format!(
                "type=bind,source={},target={}",
                mount.source.display(),
                mount.target
            ));
        }
        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(spec.image.clone());
        args.extend(spec.args.iter().cloned());
        args
    }
}

impl Default for CliRuntime {
    fn default() -> Self {
        Self::new("podman")
    }
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    async fn pull(&self, image: &str, sink: &dyn LogSink) -> Result<()> {
        debug!("Pulling image {}", image);
        let mut child = process::spawn_piped(self.command().arg("pull").arg(image))
            .map_err(|e| EngineError::container(format!("{} pull: {}", self.binary, e)))?;

        process::pump_output(&mut child, sink).await?;
        let status = child.wait().await?;
        if !status.success() {
            return Err(EngineError::container(format!(
                "pulling image {} failed with {}",
                image, status
            )));
        }
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let args = Self::create_args(spec);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let stdout = self.run(&args).await?;

        let id = stdout.trim().to_string();
        if id.is_empty() {
            return Err(EngineError::container(format!(
                "{} create returned no container ID for image {}",
                self.binary, spec.image
            )));
        }
        debug!("Created container {} from {}", id, spec.image);
        Ok(id)
    }

    async fn start_attached(&self, id: &str, sink: &dyn LogSink) -> Result<i32> {
        let mut child =
            process::spawn_piped(self.command().arg("start").arg("--attach").arg(id))
                .map_err(|e| EngineError::container(format!("{} start: {}", self.binary, e)))?;

        process::pump_output(&mut child, sink).await?;
        let status = child.wait().await?;
        // A signal-terminated attach has no code; surface it as a generic failure
        Ok(status.code().unwrap_or(-1))
    }

    async fn kill(&self, id: &str) -> Result<()> {
        self.run(&["kill", id]).await.map(|_| ())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.run(&["rm", "-f", id]).await.map(|_| ())
    }

    async fn list_labeled(&self, label: &str) -> Result<Vec<String>> {
        let filter = format!("label={}", label);
        let stdout = self
            .run(&["ps", "-a", "--filter", &filter, "--format", "{{.ID}}"])
            .await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Kills and removes a container, logging instead of failing
pub async fn discard(runtime: &dyn ContainerRuntime, id: &str) {
    if let Err(e) = runtime.kill(id).await {
        debug!("Kill of container {} failed (may have exited): {}", id, e);
    }
    if let Err(e) = runtime.remove(id).await {
        warn!("Failed to remove container {}: {}", id, e);
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_args() {
        let mut env = BTreeMap::new();
        env.insert("TOKEN".to_string(), "x".to_string());
        let spec = ContainerSpec::new("node:20", vec!["yarn".into()], PathBuf::from("/tmp/w"))
            .with_job("42")
            .with_mount(PathBuf::from("/cache/ab/usr/cache"), "/usr/cache")
            .with_env(&env);

        assert_eq!(
            CliRuntime::create_args(&spec),
            vec![
                "create",
                "--workdir",
                "/work",
                "--label",
                "io.splice.job=42",
                "--label",
                "io.splice.runner=true",
                "--mount",
                "type=bind,source=/tmp/w,target=/work",
                "--mount",
                "type=bind,source=/cache/ab/usr/cache,target=/usr/cache",
                "-e",
                "TOKEN=x",
                "node:20",
                "yarn",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_container_error() {
        let runtime = CliRuntime::new("splice-no-such-runtime");
        let err = runtime.check_available().await.unwrap_err();
        assert!(matches!(err, EngineError::Container { .. }));

        let err = runtime.list_labeled(OWNER_LABEL).await.unwrap_err();
        assert!(matches!(err, EngineError::Container { .. }));
    }

    #[tokio::test]
    async fn test_discarding_labeled_containers_spares_others() {
        let runtime = testing::FakeRuntime::default();
        runtime.seed("left-over", &[(OWNER_LABEL, "true"), (JOB_LABEL, "7")]);
        runtime.seed("also-ours", &[(OWNER_LABEL, "true")]);
        runtime.seed("someone-elses", &[("com.example.app", "db")]);

        let mut ours = runtime.list_labeled(OWNER_LABEL).await.unwrap();
        ours.sort();
        assert_eq!(ours, vec!["also-ours", "left-over"]);
        assert_eq!(
            runtime.list_labeled(&format!("{}=7", JOB_LABEL)).await.unwrap(),
            vec!["left-over"]
        );

        for id in &ours {
            discard(&runtime, id).await;
        }
        assert_eq!(runtime.alive(), vec!["someone-elses"]);
        assert_eq!(*runtime.removed.lock().unwrap(), ours);
    }
}
