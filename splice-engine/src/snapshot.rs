//! Snapshot Manager
//!
//! Downloads a repository archive at a revision and materializes it twice:
//! a pristine tree that is only ever read, and a working tree that steps
//! mutate. Everything created here is owned by an `ExecutionContext` and
//! removed when it is cleaned up or dropped, including when staging fails or
//! is abandoned halfway.

use crate::error::{EngineError, Result, truncate};
use crate::process;
use splice_core::domain::repository::Repository;
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Upper bound on the response body kept for fetch diagnostics
const ERROR_BODY_LIMIT: usize = 512;

/// Upper bound on extraction tool output kept for diagnostics
const EXTRACT_OUTPUT_LIMIT: usize = 512;

/// Archive encoding requested from the code host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveFormat {
    #[default]
    Zip,
    TarGz,
}

impl ArchiveFormat {
    fn accept(self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "application/zip",
            ArchiveFormat::TarGz => "application/x-gzip",
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            ArchiveFormat::Zip => ".zip",
            ArchiveFormat::TarGz => ".tar.gz",
        }
    }

    fn extract_command(self, archive: &Path, dest: &Path) -> Command {
        let mut command = match self {
            ArchiveFormat::Zip => {
                let mut c = Command::new("unzip");
                c.arg("-qq").arg(archive).arg("-d").arg(dest);
                c
            }
            ArchiveFormat::TarGz => {
                let mut c = Command::new("tar");
                c.arg("-xzf").arg(archive).arg("-C").arg(dest);
                c
            }
        };
        command.env("LC_ALL", "C");
        command
    }
}

impl std::str::FromStr for ArchiveFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zip" => Ok(ArchiveFormat::Zip),
            "tar.gz" | "tgz" => Ok(ArchiveFormat::TarGz),
            other => Err(format!(
                "unknown archive format '{}' (expected zip or tar.gz)",
                other
            )),
        }
    }
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveFormat::Zip => write!(f, "zip"),
            ArchiveFormat::TarGz => write!(f, "tar.gz"),
        }
    }
}

/// Code host endpoint serving repository archives
#[derive(Clone)]
pub struct ArchiveSource {
    endpoint: String,
    access_token: Option<String>,
    format: ArchiveFormat,
    client: reqwest::Client,
}

impl ArchiveSource {
    /// Creates a source for the given code host
    ///
    /// # Arguments
    /// * `endpoint` - Base URL of the code host (e.g., "https://code.example.com")
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            access_token: None,
            format: ArchiveFormat::default(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_format(mut self, format: ArchiveFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    /// URL of the raw archive of `repository` at `revision`
    pub fn archive_url(&self, repository: &Repository, revision: &str) -> String {
        format!("{}/{}@{}/-/raw/", self.endpoint, repository.name, revision)
    }

    /// Streams the archive into `dest`
    ///
    /// # Errors
    /// `Fetch` on transport failure or a non-2xx response. The error keeps the
    /// status and at most 512 bytes of the response body.
    pub async fn fetch(
        &self,
        repository: &Repository,
        revision: &str,
        dest: &Path,
    ) -> Result<u64> {
        let url = self.archive_url(repository, revision);
        debug!("Fetching archive {}", url);

        let fetch_error = |status: Option<u16>, message: String| EngineError::Fetch {
            repository: repository.name.clone(),
            revision: revision.to_string(),
            status,
            message,
        };

        let mut request = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, self.format.accept());
        if let Some(token) = &self.access_token {
            request = request.header(reqwest::header::AUTHORIZATION, format!("token {}", token));
        }

        let mut response = request
            .send()
            .await
            .map_err(|e| fetch_error(None, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = Vec::new();
            while body.len() < ERROR_BODY_LIMIT {
                match response.chunk().await {
                    Ok(Some(chunk)) => body.extend_from_slice(&chunk),
                    _ => break,
                }
            }
            let snippet = String::from_utf8_lossy(&body);
            return Err(fetch_error(
                Some(status.as_u16()),
                truncate(snippet.trim(), ERROR_BODY_LIMIT),
            ));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| fetch_error(Some(status.as_u16()), e.to_string()))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!("Fetched {} bytes for {}@{}", written, repository, revision);
        Ok(written)
    }
}

/// Stages repository snapshots under a temporary root
#[derive(Clone)]
pub struct Stager {
    source: ArchiveSource,
    temp_root: PathBuf,
}

impl Stager {
    /// # Arguments
    /// * `source` - Where archives are downloaded from
    /// * `temp_root` - Directory under which archives and trees are created
    pub fn new(source: ArchiveSource, temp_root: impl Into<PathBuf>) -> Self {
        Self {
            source,
            temp_root: temp_root.into(),
        }
    }

    pub fn source(&self) -> &ArchiveSource {
        &self.source
    }

    /// Fetches and extracts `repository` at `revision` into a fresh context
    ///
    /// On any failure the partially created context is dropped, which removes
    /// whatever had been created so far. The same holds when the returned
    /// future is dropped before completion.
    pub async fn stage(&self, repository: &Repository, revision: &str) -> Result<ExecutionContext> {
        std::fs::create_dir_all(&self.temp_root)?;
        let slug = repository.slug();

        let archive = tempfile::Builder::new()
            .prefix(&format!("splice-{}-", slug))
            .suffix(self.source.format().suffix())
            .tempfile_in(&self.temp_root)?;
        let pristine = tempfile::Builder::new()
            .prefix(&format!("splice-{}-pristine-", slug))
            .tempdir_in(&self.temp_root)?;
        let workdir = tempfile::Builder::new()
            .prefix(&format!("splice-{}-work-", slug))
            .tempdir_in(&self.temp_root)?;

        let archive_path = archive.path().to_path_buf();
        let context = ExecutionContext {
            pristine_path: pristine.path().to_path_buf(),
            workdir_path: workdir.path().to_path_buf(),
            archive: Some(archive),
            pristine: Some(pristine),
            workdir: Some(workdir),
        };

        self.source.fetch(repository, revision, &archive_path).await?;

        let format = self.source.format();
        tokio::try_join!(
            extract(format, &archive_path, context.pristine()),
            extract(format, &archive_path, context.workdir()),
        )?;

        info!(
            "Staged {}@{} into {}",
            repository,
            revision,
            context.workdir().display()
        );
        Ok(context)
    }
}

async fn extract(format: ArchiveFormat, archive: &Path, dest: &Path) -> Result<()> {
    let output = process::capture(&mut format.extract_command(archive, dest))
        .await
        .map_err(|e| EngineError::Extract {
            message: format!("running {} extractor: {}", format, e),
        })?;

    if !output.status.success() {
        return Err(EngineError::Extract {
            message: format!(
                "{} extraction into {} exited with {}: {}",
                format,
                dest.display(),
                output.status,
                truncate(&output.combined(), EXTRACT_OUTPUT_LIMIT)
            ),
        });
    }
    Ok(())
}

/// The pristine and working trees of one job, plus the downloaded archive
///
/// Exactly one context exists per running job and its directories are never
/// shared. Dropping the context removes everything it owns.
pub struct ExecutionContext {
    pristine_path: PathBuf,
    workdir_path: PathBuf,
    archive: Option<NamedTempFile>,
    pristine: Option<TempDir>,
    workdir: Option<TempDir>,
}

impl ExecutionContext {
    /// Read-only reference tree
    pub fn pristine(&self) -> &Path {
        &self.pristine_path
    }

    /// Tree mutated by steps
    pub fn workdir(&self) -> &Path {
        &self.workdir_path
    }

    /// Removes the archive and both trees
    ///
    /// Best-effort and idempotent: failures are logged, a second call is a
    /// no-op.
    pub fn cleanup(&mut self) {
        if let Some(archive) = self.archive.take() {
            if let Err(e) = archive.close() {
                warn!("Failed to remove archive: {}", e);
            }
        }
        for dir in [self.pristine.take(), self.workdir.take()].into_iter().flatten() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process archive host used by snapshot and engine tests

    use axum::{
        Router,
        body::Bytes,
        extract::State,
        http::{HeaderMap, StatusCode, Uri, header},
        routing::get,
    };
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// What the host saw of one archive request
    #[derive(Debug, Clone)]
    pub struct SeenRequest {
        pub path: String,
        pub authorization: Option<String>,
        pub accept: Option<String>,
    }

    #[derive(Clone)]
    pub struct ArchiveHost {
        pub url: String,
        pub hits: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<SeenRequest>>>,
    }

    impl ArchiveHost {
        pub fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }

        pub fn requests(&self) -> Vec<SeenRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[derive(Clone)]
    struct HostState {
        hits: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<SeenRequest>>>,
        status: StatusCode,
        body: Bytes,
    }

    /// Builds a tar.gz of `files` (relative path, content)
    pub fn tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
        let src = tempfile::tempdir().unwrap();
        for (path, content) in files {
            let full = src.path().join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, content).unwrap();
        }
        let out = tempfile::tempdir().unwrap();
        let archive = out.path().join("repo.tar.gz");
        let status = std::process::Command::new("tar")
            .arg("-czf")
            .arg(&archive)
            .arg("-C")
            .arg(src.path())
            .arg(".")
            .status()
            .unwrap();
        assert!(status.success());
        std::fs::read(archive).unwrap()
    }

    /// Serves `body` with `status` for every archive URL
    pub async fn serve(status: StatusCode, body: Vec<u8>) -> ArchiveHost {
        let state = HostState {
            hits: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
            status,
            body: Bytes::from(body),
        };

        async fn archive(
            State(state): State<HostState>,
            uri: Uri,
            headers: HeaderMap,
        ) -> (StatusCode, Bytes) {
            let value = |name: header::HeaderName| {
                headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            };
            state.seen.lock().unwrap().push(SeenRequest {
                path: uri.path().to_string(),
                authorization: value(header::AUTHORIZATION),
                accept: value(header::ACCEPT),
            });
            state.hits.fetch_add(1, Ordering::SeqCst);
            (state.status, state.body)
        }

        let host = ArchiveHost {
            url: String::new(),
            hits: state.hits.clone(),
            seen: state.seen.clone(),
        };
        let app = Router::new()
            .route("/{*path}", get(archive))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        ArchiveHost {
            url: format!("http://{}", addr),
            ..host
        }
    }

    pub fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use axum::http::StatusCode;

    fn repo() -> Repository {
        Repository::new("UmVwbzox", "github.com/acme/app")
    }

    #[test]
    fn test_archive_url() {
        let source = ArchiveSource::new("https://code.example.com/");
        assert_eq!(
            source.archive_url(&repo(), "deadbeef"),
            "https://code.example.com/github.com/acme/app@deadbeef/-/raw/"
        );
    }

    #[test]
    fn test_archive_format_parse() {
        assert_eq!("zip".parse::<ArchiveFormat>().unwrap(), ArchiveFormat::Zip);
        assert_eq!("TAR.GZ".parse::<ArchiveFormat>().unwrap(), ArchiveFormat::TarGz);
        assert!("rar".parse::<ArchiveFormat>().is_err());
    }

    #[tokio::test]
    async fn test_stage_produces_two_independent_trees() {
        let host = serve(StatusCode::OK, tar_gz(&[("FILE", "a\n"), ("src/lib.rs", "")])).await;
        let root = tempfile::tempdir().unwrap();
        let stager = Stager::new(
            ArchiveSource::new(&host.url).with_format(ArchiveFormat::TarGz),
            root.path(),
        );

        let mut context = stager.stage(&repo(), "main").await.unwrap();
        assert_eq!(std::fs::read_to_string(context.pristine().join("FILE")).unwrap(), "a\n");
        assert_eq!(std::fs::read_to_string(context.workdir().join("FILE")).unwrap(), "a\n");

        std::fs::write(context.workdir().join("FILE"), "changed\n").unwrap();
        assert_eq!(std::fs::read_to_string(context.pristine().join("FILE")).unwrap(), "a\n");

        let pristine = context.pristine().to_path_buf();
        context.cleanup();
        context.cleanup();
        assert!(!pristine.exists());
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_carries_status_and_cleans_up() {
        let host = serve(StatusCode::NOT_FOUND, b"revision not found".to_vec()).await;
        let root = tempfile::tempdir().unwrap();
        let stager = Stager::new(
            ArchiveSource::new(&host.url).with_format(ArchiveFormat::TarGz),
            root.path(),
        );

        let err = stager.stage(&repo(), "nope").await.err().unwrap();
        match err {
            EngineError::Fetch {
                status, message, ..
            } => {
                assert_eq!(status, Some(404));
                assert_eq!(message, "revision not found");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_fetch_error_body_is_bounded() {
        let host = serve(StatusCode::INTERNAL_SERVER_ERROR, vec![b'x'; 10_000]).await;
        let dest = tempfile::NamedTempFile::new().unwrap();

        let err = ArchiveSource::new(&host.url)
            .fetch(&repo(), "main", dest.path())
            .await
            .unwrap_err();
        match err {
            EngineError::Fetch { message, .. } => assert!(message.len() <= ERROR_BODY_LIMIT + 3),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_sends_token_and_format_headers() {
        let host = serve(StatusCode::OK, tar_gz(&[("FILE", "a\n")])).await;
        let dest = tempfile::NamedTempFile::new().unwrap();

        ArchiveSource::new(&host.url)
            .with_access_token(Some("secret".to_string()))
            .with_format(ArchiveFormat::TarGz)
            .fetch(&repo(), "main", dest.path())
            .await
            .unwrap();
        ArchiveSource::new(&host.url)
            .fetch(&repo(), "main", dest.path())
            .await
            .unwrap();

        let seen = host.requests();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].path, "/github.com/acme/app@main/-/raw/");
        assert_eq!(seen[0].authorization.as_deref(), Some("token secret"));
        assert_eq!(seen[0].accept.as_deref(), Some("application/x-gzip"));
        assert_eq!(seen[1].authorization, None);
        assert_eq!(seen[1].accept.as_deref(), Some("application/zip"));
    }

    #[tokio::test]
    async fn test_corrupt_archive_is_extract_error() {
        let host = serve(StatusCode::OK, b"definitely not gzip".to_vec()).await;
        let root = tempfile::tempdir().unwrap();
        let stager = Stager::new(
            ArchiveSource::new(&host.url).with_format(ArchiveFormat::TarGz),
            root.path(),
        );

        let err = stager.stage(&repo(), "main").await.err().unwrap();
        assert!(matches!(err, EngineError::Extract { .. }), "{:?}", err);
        assert_eq!(entries(root.path()), 0);
    }
}
