//! Diff Computer
//!
//! Compares the pristine and working trees with the system `diff` tool and
//! turns its output into a patch whose paths are relative to the repository
//! root, so the same change staged anywhere on the host yields the same bytes.

pub mod unified;

pub use unified::{DiffStat, FileDiff, FileHeader, Hunk};

use crate::error::{EngineError, Result, truncate};
use crate::process;
use std::ffi::OsString;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Bytes of diff tool output quoted in a failure
const FAILURE_SUMMARY_LIMIT: usize = 250;

/// The external directory comparison tool and the flags it understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffTool {
    program: String,
    no_dereference: bool,
    color: bool,
}

impl DiffTool {
    /// A tool assumed to support every optional flag (GNU diffutils >= 3.4)
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            no_dereference: true,
            color: true,
        }
    }

    /// Asks `program --help` which optional flags it supports
    ///
    /// A tool whose help cannot be read is assumed to support none of them.
    pub async fn probe(program: impl Into<String>) -> Self {
        let program = program.into();
        let help = match process::capture(Command::new(&program).arg("--help")).await {
            Ok(output) => output.stdout,
            Err(e) => {
                debug!("Probing {} failed: {}", program, e);
                String::new()
            }
        };

        let tool = Self {
            no_dereference: help.contains("--no-dereference"),
            color: help.contains("--color"),
            program,
        };
        debug!("Diff tool: {:?}", tool);
        tool
    }

    fn args(&self, pristine: &Path, workdir: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--unified".into(), "--new-file".into()];
        if self.no_dereference {
            args.push("--no-dereference".into());
        }
        args.push("--recursive".into());
        if self.color {
            args.push("--color=never".into());
        }
        args.push(pristine.into());
        args.push(workdir.into());
        args
    }

    /// Diffs `workdir` against `pristine`
    ///
    /// # Returns
    /// The normalized patch text; empty when the trees are identical
    ///
    /// # Errors
    /// `Diff` when the tool fails with any status other than 1 ("trees
    /// differ") or when the patch is not valid UTF-8, `DiffParse` when its
    /// output is not a well-formed diff.
    pub async fn diff(&self, pristine: &Path, workdir: &Path) -> Result<String> {
        let output = process::capture_raw(
            Command::new(&self.program)
                .args(self.args(pristine, workdir))
                .env("LC_ALL", "C"),
        )
        .await
        .map_err(|e| EngineError::Diff {
            message: format!("running {}: {}", self.program, e),
        })?;

        match output.status.code() {
            Some(0) => Ok(String::new()),
            Some(1) => {
                // Patches travel as JSON strings, so bytes that are not UTF-8
                // cannot be carried without altering the file content
                let text = String::from_utf8(output.stdout).map_err(|e| EngineError::Diff {
                    message: format!(
                        "diff output is not valid UTF-8 (first invalid byte at offset {})",
                        e.utf8_error().valid_up_to()
                    ),
                })?;
                let mut files = unified::parse(&text)?;
                normalize(&mut files, pristine, workdir);
                Ok(unified::render(&files))
            }
            _ => {
                let output = process::Captured::from(output);
                Err(EngineError::Diff {
                    message: format!(
                        "{} exited with {} (output was: {:?})",
                        self.program,
                        output.status,
                        truncate(&output.combined(), FAILURE_SUMMARY_LIMIT)
                    ),
                })
            }
        }
    }
}

impl Default for DiffTool {
    fn default() -> Self {
        Self::new("diff")
    }
}

/// Rewrites every reference to the two staging directories so paths are
/// relative to the repository root
pub fn normalize(files: &mut [FileDiff], pristine: &Path, workdir: &Path) {
    let pristine = pristine.to_string_lossy();
    let workdir = workdir.to_string_lossy();
    let pristine_prefix = format!("{}/", pristine);
    let workdir_prefix = format!("{}/", workdir);

    for file in files {
        for line in &mut file.extended {
            *line = line
                .replace(&pristine_prefix, "")
                .replace(&workdir_prefix, "")
                .replace(pristine.as_ref(), ".")
                .replace(workdir.as_ref(), ".");
        }
        if let Some(orig) = &mut file.orig {
            strip_prefix(&mut orig.path, &pristine_prefix);
        }
        if let Some(new) = &mut file.new {
            strip_prefix(&mut new.path, &workdir_prefix);
        }
    }
}

fn strip_prefix(path: &mut String, prefix: &str) {
    if let Some(stripped) = path.strip_prefix(prefix) {
        *path = stripped.to_string();
    }
}
