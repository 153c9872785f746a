//! Error types for sitehost

use thiserror::Error;

/// Main error type for the deployment engine
#[derive(Error, Debug)]
pub enum HostError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// A launched command exited non-zero
    #[error("{command} exited with code {exit_code}: {stderr}")]
    ExecutionFailure {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// A command exceeded its allotted time and was killed
    #[error("{command} timed out after {seconds}s")]
    TimeoutFailure { command: String, seconds: u64 },

    #[error("Invalid path: access denied ({0})")]
    PathSecurityViolation(String),

    #[error("Git failed: {0}")]
    FatalSyncFailure(String),

    #[error("Venv creation failed: {0}")]
    FatalProvisionFailure(String),

    /// A step that failed without aborting the pipeline
    #[error("Warning: {0}")]
    Advisory(String),

    /// Another writer holds the project
    #[error("Another change to '{0}' is already in progress")]
    ProjectBusy(String),

    /// The deployment log could not be stored before the next step
    #[error("Could not persist deployment: {0}")]
    PersistenceFailure(String),

    #[error("Invalid project: {0}")]
    InvalidProject(String),

    #[error("Path does not exist: {0}")]
    NotFound(String),

    #[error("Path is not a directory: {0}")]
    NotADirectory(String),

    #[error("Path is not a file: {0}")]
    NotAFile(String),

    /// Too large or not UTF-8 text
    #[error("File cannot be edited: {0}")]
    NotEditable(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
