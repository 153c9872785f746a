//! Up-front detection of the privilege needed to touch system configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::deploy::runner::{CommandRunner, CommandSpec};
use crate::storage::layout::HostingLayout;
use crate::storage::settings::PrivilegeSetting;

/// `sudo -n` answers at once; anything slower is treated as unavailable
const SUDO_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// How privileged steps will be carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivilegeMode {
    /// We can write the config directories and manage services ourselves
    Direct,
    /// Passwordless `sudo` is available
    Sudo,
    /// System configuration cannot be applied from this context
    Unavailable,
}

impl PrivilegeMode {
    /// Apply the mode to a command that needs privilege
    pub fn wrap(&self, spec: CommandSpec) -> CommandSpec {
        match self {
            PrivilegeMode::Sudo => spec.with_sudo(),
            _ => spec,
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, PrivilegeMode::Unavailable)
    }
}

/// Resolve the privilege mode for the configured setting
pub async fn detect(
    setting: PrivilegeSetting,
    layout: &HostingLayout,
    runner: &dyn CommandRunner,
) -> PrivilegeMode {
    let mode = match setting {
        PrivilegeSetting::Direct => PrivilegeMode::Direct,
        PrivilegeSetting::Sudo => PrivilegeMode::Sudo,
        PrivilegeSetting::None => PrivilegeMode::Unavailable,
        PrivilegeSetting::Auto => {
            if is_root() || layout.system_dirs().iter().all(|dir| is_writable(dir)) {
                PrivilegeMode::Direct
            } else if runner.run(&sudo_check()).await.succeeded {
                PrivilegeMode::Sudo
            } else {
                PrivilegeMode::Unavailable
            }
        }
    };
    debug!("Privilege mode: {:?}", mode);
    mode
}

fn sudo_check() -> CommandSpec {
    CommandSpec::new("sudo")
        .args(["-n", "true"])
        .timeout(SUDO_CHECK_TIMEOUT)
}

fn is_root() -> bool {
    #[cfg(unix)]
    {
        nix::unistd::geteuid().is_root()
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Check by creating (and dropping) a temp file in `dir`
fn is_writable(dir: &Path) -> bool {
    tempfile::Builder::new()
        .prefix(".sitehost-check")
        .tempfile_in(dir)
        .is_ok()
}
