//! Configuration module
//!
//! Handles CLI configuration: where archives come from, where results are
//! cached, and which container runtime runs container steps.

use anyhow::{Context, Result};
use splice_engine::{
    ArchiveFormat, ArchiveSource, CliRuntime, DiffTool, DiskCache, Engine, StepExecutor, Stager,
};
use std::path::PathBuf;
use std::sync::Arc;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the code host serving repository archives
    pub endpoint: String,
    pub access_token: Option<String>,
    /// Cache root for the result cache and container caches
    pub cache_dir: PathBuf,
    /// Where archives and working trees are staged
    pub temp_dir: PathBuf,
    /// Container runtime binary
    pub runtime: String,
    pub archive_format: ArchiveFormat,
    pub verbose: bool,
}

impl Config {
    /// Builds an engine for local runs
    pub async fn engine(&self) -> Result<Engine> {
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            anyhow::bail!("endpoint must start with http:// or https://");
        }
        std::fs::create_dir_all(&self.cache_dir).with_context(|| {
            format!("Failed to create cache dir {}", self.cache_dir.display())
        })?;

        let source = ArchiveSource::new(self.endpoint.clone())
            .with_access_token(self.access_token.clone())
            .with_format(self.archive_format);

        Ok(Engine::new(
            Stager::new(source, self.temp_dir.clone()),
            StepExecutor::new(
                Arc::new(CliRuntime::new(self.runtime.clone())),
                self.cache_dir.clone(),
            ),
            DiffTool::probe("diff").await,
            Arc::new(DiskCache::under(&self.cache_dir)),
        ))
    }
}

#[cfg(test)]
pub(crate) fn test_config(root: &std::path::Path) -> Config {
    Config {
        endpoint: "http://127.0.0.1:1".to_string(),
        access_token: None,
        cache_dir: root.join("cache"),
        temp_dir: root.to_path_buf(),
        runtime: "podman".to_string(),
        archive_format: ArchiveFormat::TarGz,
        verbose: false,
    }
}
