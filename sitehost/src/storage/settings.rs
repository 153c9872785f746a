//! Settings file management

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Also write logs to daily rolling files under the state directory
    #[serde(default)]
    pub log_to_file: bool,

    /// Project hosting configuration
    #[serde(default)]
    pub hosting: HostingSettings,

    /// nginx configuration
    #[serde(default)]
    pub proxy: ProxySettings,

    /// systemd/gunicorn configuration
    #[serde(default)]
    pub supervisor: SupervisorSettings,

    /// How privileged steps are performed
    #[serde(default)]
    pub privilege: PrivilegeSetting,

    /// Interactive console configuration
    #[serde(default)]
    pub console: ConsoleSettings,

    /// Maximum number of deploy/remove jobs running at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_jobs: usize,
}

fn default_max_concurrent() -> usize {
    2
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_to_file: false,
            hosting: HostingSettings::default(),
            proxy: ProxySettings::default(),
            supervisor: SupervisorSettings::default(),
            privilege: PrivilegeSetting::default(),
            console: ConsoleSettings::default(),
            max_concurrent_jobs: default_max_concurrent(),
        }
    }
}

/// Project hosting settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostingSettings {
    /// Base directory containing one subdirectory per project
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Virtualenv directory name inside each project
    #[serde(default = "default_venv_dir_name")]
    pub venv_dir_name: String,

    /// Host interpreter used to create virtualenvs
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Prefer `python{tag}` from PATH when the project declares a version tag
    #[serde(default = "default_true")]
    pub honor_runtime_version: bool,

    /// Upper bound for each pipeline command (git, pip, manage.py)
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("/srv/sitehost/projects")
}

fn default_venv_dir_name() -> String {
    "venv".to_string()
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_true() -> bool {
    true
}

fn default_step_timeout() -> u64 {
    900
}

impl Default for HostingSettings {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            venv_dir_name: default_venv_dir_name(),
            interpreter: default_interpreter(),
            honor_runtime_version: true,
            step_timeout_secs: default_step_timeout(),
        }
    }
}

/// nginx settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    #[serde(default = "default_sites_available")]
    pub sites_available: PathBuf,

    #[serde(default = "default_sites_enabled")]
    pub sites_enabled: PathBuf,

    /// Per-domain static files live at `{static_root}/{domain}/static/`
    #[serde(default = "default_static_root")]
    pub static_root: PathBuf,

    /// systemd name of the proxy daemon
    #[serde(default = "default_proxy_service")]
    pub service: String,
}

fn default_sites_available() -> PathBuf {
    PathBuf::from("/etc/nginx/sites-available")
}

fn default_sites_enabled() -> PathBuf {
    PathBuf::from("/etc/nginx/sites-enabled")
}

fn default_static_root() -> PathBuf {
    PathBuf::from("/var/www")
}

fn default_proxy_service() -> String {
    "nginx".to_string()
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            sites_available: default_sites_available(),
            sites_enabled: default_sites_enabled(),
            static_root: default_static_root(),
            service: default_proxy_service(),
        }
    }
}

/// systemd/gunicorn settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSettings {
    #[serde(default = "default_unit_dir")]
    pub unit_dir: PathBuf,

    /// gunicorn worker count
    #[serde(default = "default_workers")]
    pub workers: u32,

    /// WSGI application path passed to gunicorn
    #[serde(default = "default_wsgi_app")]
    pub wsgi_app: String,

    /// `User=` of the unit; omitted when unset
    #[serde(default)]
    pub user: Option<String>,

    /// `Group=` of the unit; omitted when unset
    #[serde(default = "default_group")]
    pub group: Option<String>,
}

fn default_unit_dir() -> PathBuf {
    PathBuf::from("/etc/systemd/system")
}

fn default_workers() -> u32 {
    3
}

fn default_wsgi_app() -> String {
    "config.wsgi:application".to_string()
}

fn default_group() -> Option<String> {
    Some("www-data".to_string())
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            unit_dir: default_unit_dir(),
            workers: default_workers(),
            wsgi_app: default_wsgi_app(),
            user: None,
            group: default_group(),
        }
    }
}

/// Privilege handling for system configuration steps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivilegeSetting {
    /// Detect at the start of each operation
    #[default]
    Auto,
    /// Write files and run service commands directly
    Direct,
    /// Prefix privileged commands with `sudo -n`
    Sudo,
    /// Never touch system configuration
    None,
}

/// Interactive console settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleSettings {
    /// Hard timeout per command
    #[serde(default = "default_console_timeout")]
    pub timeout_secs: u64,
}

fn default_console_timeout() -> u64 {
    30
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_console_timeout(),
        }
    }
}
