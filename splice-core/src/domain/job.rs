//! Job domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::action::Action;
use crate::domain::repository::Repository;

/// A remotely queued unit of work
///
/// Repository, revision and action are fixed when the queue creates the job;
/// only `state` changes once a runner has accepted it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub repository: Repository,
    pub base_revision: String,
    #[serde(alias = "stepDefinition")]
    pub action: Action,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub state: JobState,
}

/// Job execution state
///
/// `PREPARING -> PULLING -> CREATING -> RUNNING -> {COMPLETED | ERRORED | CANCELED}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Preparing,
    Pulling,
    Creating,
    Running,
    Completed,
    Errored,
    Canceled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Errored | JobState::Canceled
        )
    }

    /// Whether entering this state is reported to the remote queue
    ///
    /// Preparation states are internal; only `RUNNING` and terminal states
    /// leave the runner.
    pub fn is_reported(self) -> bool {
        self == JobState::Running || self.is_terminal()
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            JobState::Completed => self == JobState::Running,
            JobState::Errored | JobState::Canceled => true,
            _ => next.rank() > self.rank(),
        }
    }

    fn rank(self) -> u8 {
        match self {
            JobState::Preparing => 0,
            JobState::Pulling => 1,
            JobState::Creating => 2,
            JobState::Running => 3,
            JobState::Completed | JobState::Errored | JobState::Canceled => 4,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobState::Preparing => "PREPARING",
            JobState::Pulling => "PULLING",
            JobState::Creating => "CREATING",
            JobState::Running => "RUNNING",
            JobState::Completed => "COMPLETED",
            JobState::Errored => "ERRORED",
            JobState::Canceled => "CANCELED",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(JobState::Preparing.can_transition_to(JobState::Pulling));
        assert!(JobState::Pulling.can_transition_to(JobState::Creating));
        assert!(JobState::Creating.can_transition_to(JobState::Running));
        assert!(JobState::Preparing.can_transition_to(JobState::Running));
        assert!(JobState::Running.can_transition_to(JobState::Completed));
    }

    #[test]
    fn test_backward_and_self_transitions_rejected() {
        assert!(!JobState::Running.can_transition_to(JobState::Pulling));
        assert!(!JobState::Creating.can_transition_to(JobState::Creating));
    }

    #[test]
    fn test_completed_requires_running() {
        assert!(!JobState::Preparing.can_transition_to(JobState::Completed));
        assert!(!JobState::Creating.can_transition_to(JobState::Completed));
    }

    #[test]
    fn test_failure_states_reachable_from_any_live_state() {
        for state in [
            JobState::Preparing,
            JobState::Pulling,
            JobState::Creating,
            JobState::Running,
        ] {
            assert!(state.can_transition_to(JobState::Errored));
            assert!(state.can_transition_to(JobState::Canceled));
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [JobState::Completed, JobState::Errored, JobState::Canceled] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(JobState::Errored));
            assert!(!terminal.can_transition_to(JobState::Running));
        }
    }

    #[test]
    fn test_reported_states() {
        assert!(!JobState::Preparing.is_reported());
        assert!(!JobState::Pulling.is_reported());
        assert!(!JobState::Creating.is_reported());
        assert!(JobState::Running.is_reported());
        assert!(JobState::Canceled.is_reported());
    }

    #[test]
    fn test_job_wire_format() {
        let json = r#"{
            "id": "6a1f2c1e-7c55-4f63-a1a4-3f9d7c0b2a10",
            "repository": {"id": "UmVwbzox", "name": "github.com/acme/app"},
            "baseRevision": "main",
            "stepDefinition": {"steps": [{"kind": "command", "args": ["true"]}]},
            "state": "PREPARING"
        }"#;

        let job: Job = serde_json::from_str(json).unwrap();
        assert_eq!(job.repository.name, "github.com/acme/app");
        assert_eq!(job.base_revision, "main");
        assert_eq!(job.action.steps.len(), 1);
        assert!(job.env.is_empty());
        assert_eq!(job.state, JobState::Preparing);
        assert_eq!(
            serde_json::to_string(&JobState::Canceled).unwrap(),
            "\"CANCELED\""
        );
    }
}
