//! Finite state machine for a deployment record

use serde::{Deserialize, Serialize};

/// Deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Created by the caller, orchestration not started
    Pending,

    /// Pipeline is running
    InProgress,

    /// Pipeline reached the end
    Success,

    /// Pipeline aborted or was rejected
    Failed,
}

impl DeploymentStatus {
    /// Terminal states accept no further events
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Success | DeploymentStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::InProgress => "in_progress",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Orchestration picked the record up
    Start,

    /// Pipeline completed
    Succeed,

    /// Pipeline aborted, or the request was rejected before starting
    Fail(String),
}

/// Compute the state reached by applying `event` in `state`
pub fn next_state(
    state: DeploymentStatus,
    event: &DeploymentEvent,
) -> Result<DeploymentStatus, String> {
    match (state, event) {
        (DeploymentStatus::Pending, DeploymentEvent::Start) => Ok(DeploymentStatus::InProgress),
        (DeploymentStatus::Pending, DeploymentEvent::Fail(_)) => Ok(DeploymentStatus::Failed),

        (DeploymentStatus::InProgress, DeploymentEvent::Succeed) => Ok(DeploymentStatus::Success),
        (DeploymentStatus::InProgress, DeploymentEvent::Fail(_)) => Ok(DeploymentStatus::Failed),

        (state, event) => Err(format!("Invalid transition: {:?} -> {:?}", state, event)),
    }
}
