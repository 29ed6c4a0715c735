//! Job DTOs for runner <-> queue communication

use serde::{Deserialize, Serialize};

use crate::domain::job::JobState;
use crate::domain::patch::Patch;

/// State transition reported by a runner
///
/// `patch` is only present when `state` is `COMPLETED`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportState {
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<Patch>,
}

/// Current state of a job as seen by the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStateResponse {
    pub state: JobState,
}
