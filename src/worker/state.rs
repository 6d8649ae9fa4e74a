//! Per-account worker state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::AccountId;

/// Lifecycle state of the worker for one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// No live worker. Initial state.
    Stopped,
    /// A worker task is live for the account.
    Running,
}

impl WorkerState {
    /// Check if this state allows transitioning to another state.
    ///
    /// There is no terminal state: accounts move between the two for as long
    /// as the process runs.
    pub fn can_transition_to(&self, target: WorkerState) -> bool {
        use WorkerState::*;

        matches!((self, target), (Stopped, Running) | (Running, Stopped))
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
        };
        write!(f, "{s}")
    }
}

/// Point-in-time view of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub id: AccountId,
    pub username: String,
    pub state: WorkerState,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_toggle_transitions() {
        assert!(WorkerState::Stopped.can_transition_to(WorkerState::Running));
        assert!(WorkerState::Running.can_transition_to(WorkerState::Stopped));
        assert!(!WorkerState::Running.can_transition_to(WorkerState::Running));
        assert!(!WorkerState::Stopped.can_transition_to(WorkerState::Stopped));
    }

    #[test]
    fn display() {
        assert_eq!(WorkerState::Running.to_string(), "running");
        assert_eq!(WorkerState::Stopped.to_string(), "stopped");
    }
}
