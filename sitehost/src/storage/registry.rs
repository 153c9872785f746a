//! File-backed project registry
//!
//! The real registry lives outside this engine; this is the minimal
//! collaborator the command line uses to look projects up by name.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::errors::HostError;
use crate::filesys::file::File;
use crate::models::project::Project;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectRegistry {
    #[serde(default)]
    pub projects: Vec<Project>,
}

impl ProjectRegistry {
    /// Load and validate the registry; a missing file is an empty registry
    pub async fn load(file: &File) -> Result<Self, HostError> {
        if !file.exists().await {
            return Ok(Self::default());
        }
        let registry: Self = file.read_json().await?;
        registry.validate()?;
        Ok(registry)
    }

    /// Names and ports must be unique among active projects
    pub fn validate(&self) -> Result<(), HostError> {
        let mut names = HashSet::new();
        let mut ports = HashSet::new();
        for project in self.projects.iter().filter(|p| p.is_active) {
            project.validate()?;
            if !names.insert(project.name.as_str()) {
                return Err(HostError::ConfigError(format!(
                    "duplicate project name '{}'",
                    project.name
                )));
            }
            if !ports.insert(project.port) {
                return Err(HostError::ConfigError(format!(
                    "port {} is used by more than one project (second: '{}')",
                    project.port, project.name
                )));
            }
        }
        Ok(())
    }

    pub fn find(&self, name: &str) -> Result<&Project, HostError> {
        self.projects
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| HostError::NotFound(format!("project '{name}'")))
    }
}
