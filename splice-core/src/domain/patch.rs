//! Patch domain types

use serde::{Deserialize, Serialize};

/// The normalized unified diff produced by one successful action run
///
/// File headers in `diff` are relative to the repository root and never
/// contain host staging paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    /// Repository identifier the patch applies to
    pub repository: String,
    pub base_revision: String,
    pub diff: String,
}

impl Patch {
    pub fn new(
        repository: impl Into<String>,
        base_revision: impl Into<String>,
        diff: impl Into<String>,
    ) -> Self {
        Self {
            repository: repository.into(),
            base_revision: base_revision.into(),
            diff: diff.into(),
        }
    }

    /// True when the action left the tree unchanged
    pub fn is_empty(&self) -> bool {
        self.diff.is_empty()
    }
}
