//! One-off commands inside a project's virtualenv.
//!
//! Each command runs in a fresh `/bin/sh` rooted at the project directory;
//! no shell state carries over between calls. Commands starting with `cd`
//! are refused outright. That guard is literal: chained or nested directory
//! changes inside a single command line are not detected.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::deploy::runner::{CommandOutput, CommandRunner, CommandSpec};
use crate::locks::ProjectLocks;
use crate::models::project::Project;
use crate::storage::layout::HostingLayout;

/// Hard upper bound for a console command
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const CD_REJECTION: &str = "Directory navigation is not supported in this console mode.";

/// Result of a console invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsoleOutcome {
    /// The command ran to completion (successfully or not)
    Completed(CommandOutput),

    /// Refused before anything was spawned
    Rejected { reason: String },

    /// Killed after exceeding the time limit
    TimedOut { limit_secs: u64, stdout: String },

    /// A deploy or removal holds the project
    Busy { reason: String },
}

impl ConsoleOutcome {
    /// Flatten into the common `{succeeded, stdout, stderr, exit_code}` shape
    pub fn to_output(&self) -> CommandOutput {
        match self {
            ConsoleOutcome::Completed(output) => output.clone(),
            ConsoleOutcome::Rejected { reason } | ConsoleOutcome::Busy { reason } => {
                CommandOutput::launch_failure(reason.clone())
            }
            ConsoleOutcome::TimedOut { limit_secs, stdout } => {
                CommandOutput::timed_out(Duration::from_secs(*limit_secs), stdout.clone())
            }
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self, ConsoleOutcome::Completed(output) if output.succeeded)
    }
}

pub struct InteractiveConsole {
    layout: HostingLayout,
    runner: Arc<dyn CommandRunner>,
    locks: Arc<ProjectLocks>,
    timeout: Duration,
}

impl InteractiveConsole {
    pub fn new(layout: HostingLayout, runner: Arc<dyn CommandRunner>, locks: Arc<ProjectLocks>) -> Self {
        Self {
            layout,
            runner,
            locks,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Environment overrides activating the project's virtualenv
    pub fn environment(&self, project: &Project) -> Vec<(String, String)> {
        let venv = self.layout.venv_dir(project);
        let venv_bin = self.layout.venv_bin(project);

        let mut paths = vec![venv_bin.path().to_path_buf()];
        if let Some(current) = std::env::var_os("PATH") {
            paths.extend(std::env::split_paths(&current));
        }
        let path = std::env::join_paths(paths)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| venv_bin.path().to_string_lossy().into_owned());

        let mut env = project.env_pairs();
        env.push(("PATH".to_string(), path));
        env.push(("VIRTUAL_ENV".to_string(), venv.path().to_string_lossy().into_owned()));
        env
    }

    pub async fn run(&self, project: &Project, command: &str) -> ConsoleOutcome {
        let command = command.trim();
        if command.is_empty() {
            return ConsoleOutcome::Rejected {
                reason: "No command given.".to_string(),
            };
        }
        if is_directory_change(command) {
            return ConsoleOutcome::Rejected {
                reason: CD_REJECTION.to_string(),
            };
        }

        let _guard = match self.locks.try_shared(&project.name) {
            Ok(guard) => guard,
            Err(e) => return ConsoleOutcome::Busy { reason: e.to_string() },
        };

        let project_dir = self.layout.project_dir(project);
        if !project_dir.exists().await {
            return ConsoleOutcome::Rejected {
                reason: format!("Project directory {} does not exist.", project_dir.path().display()),
            };
        }

        info!("Console [{}]: {}", project.name, command);
        let spec = CommandSpec::shell(command)
            .current_dir(project_dir.path())
            .envs(self.environment(project))
            .timeout(self.timeout);
        let output = self.runner.run(&spec).await;
        debug!("Console [{}] exited with {}", project.name, output.exit_code);

        if output.timed_out {
            ConsoleOutcome::TimedOut {
                limit_secs: self.timeout.as_secs(),
                stdout: output.stdout,
            }
        } else {
            ConsoleOutcome::Completed(output)
        }
    }
}

fn is_directory_change(command: &str) -> bool {
    command == "cd" || command.strip_prefix("cd").is_some_and(|rest| rest.starts_with(char::is_whitespace))
}
