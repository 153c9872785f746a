//! Storage layout configuration

use std::path::{Path, PathBuf};

use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::project::Project;
use crate::storage::settings::Settings;

/// Where sitehost keeps its own state (settings, registry, deployment history)
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Get the project registry file path
    pub fn projects_file(&self) -> File {
        File::new(self.base_dir.join("projects.json"))
    }

    /// Get the deployment history directory
    pub fn deployments_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("deployments"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), crate::errors::HostError> {
        self.deployments_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/etc/sitehost");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sitehost");

        Self::new(base_dir)
    }
}

/// On-disk layout of hosted projects and the system configuration they touch
#[derive(Debug, Clone)]
pub struct HostingLayout {
    /// One subdirectory per project
    pub base_dir: PathBuf,

    /// Name of the virtualenv directory inside a project root
    pub venv_dir_name: String,

    /// nginx `sites-available`
    pub sites_available: PathBuf,

    /// nginx `sites-enabled`
    pub sites_enabled: PathBuf,

    /// systemd unit directory
    pub unit_dir: PathBuf,

    /// Parent of the per-domain static directories
    pub static_root: PathBuf,
}

impl HostingLayout {
    /// Layout with every system path nested under `root`; used for isolated setups
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            base_dir: root.join("projects"),
            venv_dir_name: "venv".to_string(),
            sites_available: root.join("nginx").join("sites-available"),
            sites_enabled: root.join("nginx").join("sites-enabled"),
            unit_dir: root.join("systemd"),
            static_root: root.join("www"),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            base_dir: settings.hosting.base_dir.clone(),
            venv_dir_name: settings.hosting.venv_dir_name.clone(),
            sites_available: settings.proxy.sites_available.clone(),
            sites_enabled: settings.proxy.sites_enabled.clone(),
            unit_dir: settings.supervisor.unit_dir.clone(),
            static_root: settings.proxy.static_root.clone(),
        }
    }

    pub fn base(&self) -> Dir {
        Dir::new(&self.base_dir)
    }

    /// Root directory of a project
    pub fn project_dir(&self, project: &Project) -> Dir {
        self.base().subdir(&project.name)
    }

    /// The project's isolated runtime environment
    pub fn venv_dir(&self, project: &Project) -> Dir {
        self.project_dir(project).subdir(&self.venv_dir_name)
    }

    /// Executables of the project's runtime environment
    pub fn venv_bin(&self, project: &Project) -> Dir {
        let bin = if cfg!(windows) { "Scripts" } else { "bin" };
        self.venv_dir(project).subdir(bin)
    }

    pub fn proxy_config_file(&self, project: &Project) -> File {
        File::new(self.sites_available.join(&project.domain))
    }

    pub fn proxy_enabled_link(&self, project: &Project) -> PathBuf {
        self.sites_enabled.join(&project.domain)
    }

    pub fn unit_file(&self, project: &Project) -> File {
        File::new(self.unit_dir.join(project.service_name()))
    }

    /// Directories that must be writable to publish configuration directly
    pub fn system_dirs(&self) -> [&Path; 3] {
        [&self.sites_available, &self.sites_enabled, &self.unit_dir]
    }
}
