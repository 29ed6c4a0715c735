//! Per-repository log files
//!
//! Each repository run gets its own log file holding the job-visible log in
//! the same line format the runner sends to the queue. In verbose mode the
//! lines are echoed to stderr, prefixed with the repository.

use anyhow::{Context, Result};
use splice_core::domain::log::{LogEntry, LogLevel};
use splice_engine::LogSink;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

pub struct FileSink {
    file: Mutex<File>,
    path: PathBuf,
    echo_prefix: Option<String>,
}

impl FileSink {
    /// Creates a fresh log file `splice-<slug>-<random>.log` under `dir`
    ///
    /// # Arguments
    /// * `dir` - Directory holding the log file
    /// * `slug` - Filesystem-safe repository name
    /// * `echo_prefix` - When set, every line is also printed to stderr
    pub fn create(dir: &Path, slug: &str, echo_prefix: Option<String>) -> Result<Self> {
        let (file, path) = tempfile::Builder::new()
            .prefix(&format!("splice-{}-", slug))
            .suffix(".log")
            .tempfile_in(dir)
            .context("Failed to create log file")?
            .keep()
            .context("Failed to keep log file")?;

        Ok(Self {
            file: Mutex::new(file),
            path,
            echo_prefix,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the log file
    pub fn remove(self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove log file {}: {}", self.path.display(), e);
        }
    }
}

impl LogSink for FileSink {
    fn write(&self, level: LogLevel, message: &str) {
        let line = LogEntry::new(level, message).render();
        if let Some(prefix) = &self.echo_prefix {
            eprintln!("{} {}", prefix, line);
        }

        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writeln!(file, "{}", line) {
            warn!("Failed to write to {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_are_written_and_file_removed() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::create(dir.path(), "acme-app", None).unwrap();
        let path = sink.path().to_path_buf();

        assert!(
            path.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("splice-acme-app-")
        );

        sink.info("# Step 1: command [\"true\"]");
        sink.error("# ERROR: boom");

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" INFO # Step 1: command [\"true\"]"));
        assert!(lines[1].contains("ERROR # ERROR: boom"));

        sink.remove();
        assert!(!path.exists());
    }
}
