//! Project removal: the reverse of the deploy pipeline

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::deploy::privilege;
use crate::deploy::publish;
use crate::deploy::runner::CommandRunner;
use crate::locks::ProjectLocks;
use crate::models::deployment::RemovalReport;
use crate::models::project::Project;
use crate::storage::layout::HostingLayout;
use crate::storage::settings::PrivilegeSetting;

pub struct ProjectLifecycleManager {
    layout: HostingLayout,
    runner: Arc<dyn CommandRunner>,
    locks: Arc<ProjectLocks>,
    privilege: PrivilegeSetting,
    proxy_service: String,

    /// Upper bound for each service command
    step_timeout: Duration,
}

impl ProjectLifecycleManager {
    pub fn new(
        layout: HostingLayout,
        runner: Arc<dyn CommandRunner>,
        locks: Arc<ProjectLocks>,
        privilege: PrivilegeSetting,
        proxy_service: impl Into<String>,
        step_timeout: Duration,
    ) -> Self {
        Self {
            layout,
            runner,
            locks,
            privilege,
            proxy_service: proxy_service.into(),
            step_timeout,
        }
    }

    /// Stop the service, drop its configuration and delete the project tree.
    ///
    /// System configuration steps are best-effort; only a failure to delete
    /// the project's files makes the removal unsuccessful. Waits for current
    /// listings and console commands to finish, and is refused while another
    /// deploy or removal holds the project.
    pub async fn remove_project(&self, project: &Project) -> RemovalReport {
        if let Err(e) = project.validate() {
            return RemovalReport {
                success: false,
                message: e.to_string(),
            };
        }

        let _guard = match self.locks.exclusive(&project.name).await {
            Ok(guard) => guard,
            Err(e) => {
                return RemovalReport {
                    success: false,
                    message: e.to_string(),
                }
            }
        };

        info!("Removing project {}", project.name);
        let mode = privilege::detect(self.privilege, &self.layout, self.runner.as_ref()).await;
        let runner = self.runner.as_ref();
        let timeout = self.step_timeout;

        let config_removed = if mode.is_available() {
            let service = project.service_name();

            // 1. Service
            for action in ["stop", "disable"] {
                let output = publish::systemctl(mode, runner, &[action, service.as_str()], timeout).await;
                if !output.succeeded {
                    debug!("systemctl {} {}: {}", action, service, output.stderr.trim());
                }
            }
            let unit_file = self.layout.unit_file(project);
            if let Err(e) = publish::remove_file(mode, runner, unit_file.path(), timeout).await {
                warn!("Could not delete {}: {}", unit_file.path().display(), e);
            }

            // 2. Proxy config and its enabled link
            let link = self.layout.proxy_enabled_link(project);
            let config = self.layout.proxy_config_file(project);
            for path in [link.as_path(), config.path()] {
                if let Err(e) = publish::remove_file(mode, runner, path, timeout).await {
                    warn!("Could not delete {}: {}", path.display(), e);
                }
            }

            // 3. Daemons
            let output = publish::systemctl(mode, runner, &["daemon-reload"], timeout).await;
            if !output.succeeded {
                debug!("systemctl daemon-reload: {}", output.stderr.trim());
            }
            let output =
                publish::systemctl(mode, runner, &["restart", self.proxy_service.as_str()], timeout)
                    .await;
            if !output.succeeded {
                debug!("systemctl restart {}: {}", self.proxy_service, output.stderr.trim());
            }
            true
        } else {
            warn!("Skipping system configuration removal for {}: insufficient privilege", project.name);
            false
        };

        // 4. Files
        let project_dir = self.layout.project_dir(project);
        match project_dir.delete_forced().await {
            Ok(()) => RemovalReport {
                success: true,
                message: if config_removed {
                    "Project removed successfully.".to_string()
                } else {
                    "Project files removed; system configuration was not removed (insufficient privilege)."
                        .to_string()
                },
            },
            Err(e) => RemovalReport {
                success: false,
                message: format!("Failed to remove {}: {}", project_dir.path().display(), e),
            },
        }
    }
}
