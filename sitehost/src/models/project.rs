//! Project models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::HostError;

/// A hosted web project, as handed over by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Unique name; also the on-disk directory and unit name
    pub name: String,

    /// Public hostname, e.g. `app.example.com`
    pub domain: String,

    /// Source repository URL
    pub repo_url: String,

    #[serde(default = "default_branch")]
    pub branch: String,

    /// Internal gunicorn port
    pub port: u16,

    /// Runtime version tag, e.g. `3.11`
    #[serde(default = "default_python_version")]
    pub python_version: String,

    /// `KEY=VALUE`, one per line
    #[serde(default)]
    pub env_vars: String,

    #[serde(default = "default_true")]
    pub is_active: bool,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_python_version() -> String {
    "3.11".to_string()
}

fn default_true() -> bool {
    true
}

impl Project {
    pub fn new(
        name: impl Into<String>,
        domain: impl Into<String>,
        repo_url: impl Into<String>,
        port: u16,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            domain: domain.into(),
            repo_url: repo_url.into(),
            branch: default_branch(),
            port,
            python_version: default_python_version(),
            env_vars: String::new(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Name of the systemd unit serving this project
    pub fn service_name(&self) -> String {
        format!("{}_gunicorn.service", self.name)
    }

    /// Parse `env_vars` into key/value pairs, skipping blanks and `#` comments
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        self.env_vars
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim().to_string(), value.to_string()))
            .filter(|(key, _)| !key.is_empty())
            .collect()
    }

    /// Reject values that would be unsafe as a directory, unit or config name
    pub fn validate(&self) -> Result<(), HostError> {
        let name_ok = !self.name.is_empty()
            && !self.name.starts_with('.')
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !name_ok {
            return Err(HostError::InvalidProject(format!(
                "name '{}' must use only letters, digits, '_', '-', '.' and not start with '.'",
                self.name
            )));
        }

        let domain_ok = !self.domain.is_empty()
            && !self.domain.starts_with(['.', '-'])
            && self
                .domain
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.'));
        if !domain_ok {
            return Err(HostError::InvalidProject(format!(
                "domain '{}' is not a valid hostname",
                self.domain
            )));
        }

        if self.port == 0 {
            return Err(HostError::InvalidProject("port must be non-zero".to_string()));
        }

        if self.repo_url.trim().is_empty() || self.repo_url.starts_with('-') {
            return Err(HostError::InvalidProject(format!(
                "repository URL '{}' is not usable",
                self.repo_url
            )));
        }

        if self.branch.is_empty() || self.branch.starts_with('-') {
            return Err(HostError::InvalidProject(format!(
                "branch '{}' is not usable",
                self.branch
            )));
        }

        Ok(())
    }
}
