//! Utility functions

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::deploy::privilege::{self, PrivilegeMode};
use crate::deploy::runner::CommandRunner;
use crate::storage::layout::HostingLayout;
use crate::storage::settings::Settings;

/// Version information for the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Whether a host tool the engine shells out to is on PATH
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolStatus {
    pub name: String,
    pub path: Option<PathBuf>,
    /// Deploys cannot work without it
    pub required: bool,
}

/// Host readiness report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub version: VersionInfo,
    pub tools: Vec<ToolStatus>,
    pub privilege: PrivilegeMode,
}

impl Diagnostic {
    /// False when a required tool is missing
    pub fn is_ready(&self) -> bool {
        self.tools.iter().all(|t| !t.required || t.path.is_some())
    }
}

/// Check the tools the pipeline needs and the privilege available for system configuration
pub async fn run_diagnostic(settings: &Settings, runner: &dyn CommandRunner) -> Diagnostic {
    let tools = [
        ("git", true),
        (settings.hosting.interpreter.as_str(), true),
        ("systemctl", false),
        (settings.proxy.service.as_str(), false),
        ("sudo", false),
    ]
    .into_iter()
    .map(|(name, required)| ToolStatus {
        name: name.to_string(),
        path: which::which(name).ok(),
        required,
    })
    .collect();

    let layout = HostingLayout::from_settings(settings);
    let privilege = privilege::detect(settings.privilege, &layout, runner).await;

    Diagnostic {
        version: version_info(),
        tools,
        privilege,
    }
}
