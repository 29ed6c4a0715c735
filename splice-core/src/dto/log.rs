//! Log DTOs for runner <-> queue communication

use serde::{Deserialize, Serialize};

/// A chunk of captured job output appended to the job log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendLog {
    pub content: String,
}
