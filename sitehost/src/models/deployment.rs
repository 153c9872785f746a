//! Deployment models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::{next_state, DeploymentEvent, DeploymentStatus};
use crate::errors::HostError;

/// One attempt to bring a project's running service up to date
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    /// Unique deployment ID
    pub id: String,

    /// Name of the owning project
    pub project: String,

    /// Current status
    pub status: DeploymentStatus,

    /// Append-only, human-readable log lines
    #[serde(default)]
    pub logs: Vec<String>,

    pub created_at: DateTime<Utc>,

    /// Set when the record reaches a terminal state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Deployment {
    /// Create a pending deployment for `project`
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project: project.into(),
            status: DeploymentStatus::Pending,
            logs: Vec::new(),
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn append_log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
    }

    /// The log as a single newline-joined text
    pub fn logs_text(&self) -> String {
        self.logs.join("\n")
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a state machine event
    pub fn apply(&mut self, event: DeploymentEvent) -> Result<(), HostError> {
        let status = next_state(self.status, &event).map_err(HostError::Internal)?;
        self.status = status;
        if status.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }
}

/// Outcome of publishing one piece of system configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum PublishOutcome {
    /// The pipeline never reached this step
    Skipped,

    /// Written and activated
    Applied,

    /// The running context lacks the privilege to write system configuration
    NotApplied(String),

    /// Attempted and failed
    Failed(String),
}

/// Summary returned to the caller of `deploy`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployReport {
    pub deployment_id: String,
    pub status: DeploymentStatus,
    pub proxy_config: PublishOutcome,
    pub service_unit: PublishOutcome,

    /// Advisory failures recorded along the way
    pub warnings: Vec<String>,
}

/// Result of tearing a project down
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovalReport {
    pub success: bool,
    pub message: String,
}
