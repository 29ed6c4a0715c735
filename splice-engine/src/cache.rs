//! Result Cache
//!
//! Maps the identity of an action run (repository, revision, steps and the
//! environment handed to them) to the patch it produced. There is no eviction;
//! entries live until something outside the engine prunes the directory.

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use splice_core::domain::action::Step;
use splice_core::domain::patch::Patch;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Semantic identity of one action run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheKey {
    /// Repository name
    pub repository: String,
    pub revision: String,
    pub steps: Vec<Step>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl CacheKey {
    pub fn new(repository: impl Into<String>, revision: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            repository: repository.into(),
            revision: revision.into(),
            steps,
            env: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Hex of the first 16 bytes of SHA-256 over the key's JSON form
    pub fn digest(&self) -> Result<String> {
        let raw = serde_json::to_vec(self).map_err(EngineError::cache)?;
        let hash = Sha256::digest(&raw);
        Ok(hex::encode(&hash[..16]))
    }
}

/// Storage for computed patches
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// The stored patch, or `None` on a miss
    async fn get(&self, key: &CacheKey) -> Result<Option<Patch>>;

    /// Stores `patch` under `key`, replacing any previous entry
    async fn set(&self, key: &CacheKey, patch: &Patch) -> Result<()>;
}

/// One JSON file per entry: `<dir>/<digest>.json`
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    /// # Arguments
    /// * `dir` - Entry directory, usually `<cache root>/action-exec`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cache rooted at `<cache_root>/action-exec`
    pub fn under(cache_root: &Path) -> Self {
        Self::new(cache_root.join("action-exec"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &CacheKey) -> Result<PathBuf> {
        Ok(self.dir.join(format!("{}.json", key.digest()?)))
    }
}

#[async_trait]
impl ResultCache for DiskCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Patch>> {
        let path = self.entry_path(key)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(EngineError::cache(format!(
                    "reading {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        match serde_json::from_slice::<Patch>(&data) {
            Ok(patch) => {
                debug!("Cache hit {}", path.display());
                Ok(Some(patch))
            }
            Err(parse_err) => {
                // Drop the bad entry so the next run can repopulate it
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!("Failed to delete corrupt cache entry {}: {}", path.display(), e);
                }
                Err(EngineError::cache(format!(
                    "corrupt cache entry {}: {}",
                    path.display(),
                    parse_err
                )))
            }
        }
    }

    async fn set(&self, key: &CacheKey, patch: &Patch) -> Result<()> {
        let path = self.entry_path(key)?;
        let data = serde_json::to_vec(patch).map_err(EngineError::cache)?;
        let dir = self.dir.clone();

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            std::fs::create_dir_all(&dir)?;
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&data)?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(EngineError::cache)?
        .map_err(|e| EngineError::cache(format!("writing cache entry: {}", e)))?;

        debug!("Cached patch for {}@{}", key.repository, key.revision);
        Ok(())
    }
}

/// Cache that never stores anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

#[async_trait]
impl ResultCache for NoopCache {
    async fn get(&self, _key: &CacheKey) -> Result<Option<Patch>> {
        Ok(None)
    }

    async fn set(&self, _key: &CacheKey, _patch: &Patch) -> Result<()> {
        Ok(())
    }
}

/// Default cache root: `splice` under the platform's per-user cache
/// directory, or under the system temp dir when there is none
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("splice")
}
