//! Placing files and running service commands that need privilege
//!
//! Every command spawned here is bounded by the caller's `timeout`, so a hung
//! `systemctl` cannot hold a project lock forever.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use crate::deploy::privilege::PrivilegeMode;
use crate::deploy::runner::{CommandOutput, CommandRunner, CommandSpec};
use crate::errors::HostError;
use crate::filesys::file::File;

/// Write `contents` to a temporary file, then move it over `dest`
pub async fn install_file(
    mode: PrivilegeMode,
    runner: &dyn CommandRunner,
    contents: &str,
    dest: &File,
    timeout: Duration,
) -> Result<(), HostError> {
    match mode {
        PrivilegeMode::Direct => {
            dest.write_atomic(contents.as_bytes()).await?;
            dest.set_permissions_644().await
        }
        PrivilegeMode::Sudo => {
            let contents = contents.to_string();
            let staged = tokio::task::spawn_blocking(move || -> Result<_, HostError> {
                let mut staged = tempfile::Builder::new().prefix("sitehost-").tempfile()?;
                staged.write_all(contents.as_bytes())?;
                staged.as_file().sync_all()?;
                Ok(staged.into_temp_path())
            })
            .await
            .map_err(|e| HostError::Internal(format!("staging task failed: {e}")))??;

            let mv = CommandSpec::new("mv")
                .arg("-f")
                .arg("--")
                .path_arg(&staged)
                .path_arg(dest.path())
                .timeout(timeout)
                .with_sudo();
            runner.run(&mv).await.into_result(&mv)?;
            // The temp file is gone after the move; nothing left to clean up
            let _ = staged.keep();

            let chmod = CommandSpec::new("chmod")
                .arg("644")
                .path_arg(dest.path())
                .timeout(timeout)
                .with_sudo();
            runner.run(&chmod).await.into_result(&chmod)?;
            Ok(())
        }
        PrivilegeMode::Unavailable => Err(not_applied()),
    }
}

/// Point `link` at `target`, replacing whatever was there
pub async fn link_file(
    mode: PrivilegeMode,
    runner: &dyn CommandRunner,
    target: &Path,
    link: &Path,
    timeout: Duration,
) -> Result<(), HostError> {
    match mode {
        PrivilegeMode::Direct => {
            remove_if_present(link).await?;
            if let Some(parent) = link.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            #[cfg(unix)]
            tokio::fs::symlink(target, link).await?;
            #[cfg(not(unix))]
            tokio::fs::copy(target, link).await.map(|_| ())?;
            Ok(())
        }
        PrivilegeMode::Sudo => {
            let ln = CommandSpec::new("ln")
                .arg("-sfn")
                .arg("--")
                .path_arg(target)
                .path_arg(link)
                .timeout(timeout)
                .with_sudo();
            runner.run(&ln).await.into_result(&ln)?;
            Ok(())
        }
        PrivilegeMode::Unavailable => Err(not_applied()),
    }
}

/// Remove a file or link; missing is fine
pub async fn remove_file(
    mode: PrivilegeMode,
    runner: &dyn CommandRunner,
    path: &Path,
    timeout: Duration,
) -> Result<(), HostError> {
    match mode {
        PrivilegeMode::Direct => remove_if_present(path).await,
        PrivilegeMode::Sudo => {
            let rm = CommandSpec::new("rm")
                .arg("-f")
                .arg("--")
                .path_arg(path)
                .timeout(timeout)
                .with_sudo();
            runner.run(&rm).await.into_result(&rm)?;
            Ok(())
        }
        PrivilegeMode::Unavailable => Err(not_applied()),
    }
}

/// `systemctl <args>` under the given privilege mode
pub async fn systemctl(
    mode: PrivilegeMode,
    runner: &dyn CommandRunner,
    args: &[&str],
    timeout: Duration,
) -> CommandOutput {
    if !mode.is_available() {
        return CommandOutput::launch_failure(not_applied().to_string());
    }
    let spec = mode.wrap(
        CommandSpec::new("systemctl")
            .args(args.iter().copied())
            .timeout(timeout),
    );
    runner.run(&spec).await
}

async fn remove_if_present(path: &Path) -> Result<(), HostError> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(_) => Ok(tokio::fs::remove_file(path).await?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn not_applied() -> HostError {
    HostError::Advisory("configuration not applied: insufficient privilege".to_string())
}
