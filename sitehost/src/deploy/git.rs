//! Source synchronisation with git

use std::time::Duration;

use tracing::{debug, info};

use crate::deploy::runner::{CommandRunner, CommandSpec};
use crate::errors::HostError;
use crate::filesys::dir::Dir;
use crate::models::project::Project;

/// What syncing a project's source will do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPlan {
    /// No checkout yet
    Clone,
    /// Existing checkout, fetch and fast-forward
    Pull,
    /// An interrupted clone left an empty directory behind
    Reclone,
}

/// Decide between clone and pull by looking at the project root
pub async fn plan_sync(project_dir: &Dir) -> Result<SyncPlan, HostError> {
    if !project_dir.exists().await {
        return Ok(SyncPlan::Clone);
    }
    if project_dir.subdir(".git").exists().await {
        return Ok(SyncPlan::Pull);
    }
    if project_dir.is_empty().await? {
        return Ok(SyncPlan::Reclone);
    }
    Err(HostError::FatalSyncFailure(format!(
        "{} exists but is not a git checkout",
        project_dir.path().display()
    )))
}

/// Sync a git repository (clone or pull)
pub async fn sync_repository(
    runner: &dyn CommandRunner,
    plan: SyncPlan,
    base_dir: &Dir,
    project: &Project,
    timeout: Duration,
) -> Result<(), HostError> {
    info!("Syncing Git repository: {} (branch: {})", project.repo_url, project.branch);
    let project_dir = base_dir.subdir(&project.name);

    let spec = match plan {
        SyncPlan::Pull => {
            debug!("Target directory exists, pulling updates...");
            CommandSpec::new("git")
                .args(["pull", "--ff-only", "origin"])
                .arg(&project.branch)
                .current_dir(project_dir.path())
        }
        SyncPlan::Clone | SyncPlan::Reclone => {
            if plan == SyncPlan::Reclone {
                project_dir.delete().await?;
            }
            debug!("Cloning repository to {}...", project_dir.path().display());
            CommandSpec::new("git")
                .args(["clone", "--branch"])
                .arg(&project.branch)
                .arg("--")
                .arg(&project.repo_url)
                .arg(&project.name)
                .current_dir(base_dir.path())
        }
    }
    .env("GIT_TERMINAL_PROMPT", "0")
    .timeout(timeout);

    let output = runner.run(&spec).await;
    if !output.succeeded {
        let reason = if output.stderr.trim().is_empty() {
            format!("exit code {}", output.exit_code)
        } else {
            output.stderr.trim().to_string()
        };
        return Err(HostError::FatalSyncFailure(reason));
    }

    info!("Successfully synced Git repository");
    Ok(())
}
