//! Error types for the execution engine

use splice_core::domain::patch::Patch;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors produced while staging, executing, diffing or caching an action
#[derive(Debug, Error)]
pub enum EngineError {
    /// Repository archive could not be downloaded
    #[error("fetching archive for {repository}@{revision} failed{}: {message}", status_suffix(.status))]
    Fetch {
        repository: String,
        revision: String,
        /// HTTP status, absent for transport failures
        status: Option<u16>,
        message: String,
    },

    /// Archive could not be extracted (corrupt archive, disk exhaustion)
    #[error("extracting archive failed: {message}")]
    Extract { message: String },

    /// A step exited unsuccessfully
    #[error("step {index} ({description}) failed{}{}", exit_suffix(.exit_code), output_suffix(.output))]
    Step {
        index: usize,
        description: String,
        exit_code: Option<i32>,
        /// Last portion of the step's combined output
        output: String,
    },

    /// The container runtime could not pull, create or drive a container
    #[error("container runtime error: {message}")]
    Container { message: String },

    /// The diff tool failed for a reason other than "trees differ"
    #[error("diff failed: {message}")]
    Diff { message: String },

    /// The diff output was not a well-formed unified diff
    #[error("malformed diff at line {line}: {message}")]
    DiffParse { line: usize, message: String },

    /// Result cache storage failure
    #[error("cache error: {message}")]
    Cache { message: String },

    /// The job was canceled mid-run
    #[error("execution canceled")]
    Canceled,

    /// The action definition cannot be executed
    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, EngineError::Canceled)
    }

    pub(crate) fn cache(message: impl std::fmt::Display) -> Self {
        EngineError::Cache {
            message: message.to_string(),
        }
    }

    pub(crate) fn container(message: impl std::fmt::Display) -> Self {
        EngineError::Container {
            message: message.to_string(),
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

fn exit_suffix(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!(" with exit code {}", code),
        None => " without an exit code".to_string(),
    }
}

fn output_suffix(output: &str) -> String {
    if output.is_empty() {
        String::new()
    } else {
        format!("; output:\n{}", output)
    }
}

/// Failure of one action run against one repository
///
/// Carries the repository identity so a caller can diagnose the failure
/// without inspecting internal logs, and the diff of whatever the steps had
/// already changed when they failed.
#[derive(Debug, Error)]
#[error("{repository}@{revision}: {source}")]
pub struct ActionRunError {
    pub repository: String,
    pub revision: String,
    /// Diff of the partially mutated tree, when a step failed midway
    pub partial_patch: Option<Patch>,
    #[source]
    pub source: EngineError,
}

impl ActionRunError {
    pub fn is_canceled(&self) -> bool {
        self.source.is_canceled()
    }
}

/// Truncates `text` to at most `max` bytes on a char boundary, marking the cut
pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
