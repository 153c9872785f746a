//! Persistence of deployment records

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::HostError;
use crate::filesys::dir::Dir;
use crate::models::deployment::Deployment;

/// Where deployment records are persisted
///
/// `save` must be durable before it returns: the pipeline calls it after every
/// step so an interrupted deploy leaves an accurate partial log.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    async fn save(&self, deployment: &Deployment) -> Result<(), HostError>;

    async fn get(&self, id: &str) -> Result<Option<Deployment>, HostError>;

    /// Deployments of one project, newest first
    async fn list_for_project(&self, project: &str) -> Result<Vec<Deployment>, HostError>;
}

/// One JSON document per deployment
pub struct FileDeploymentStore {
    dir: Dir,
}

impl FileDeploymentStore {
    pub fn new(dir: Dir) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl DeploymentStore for FileDeploymentStore {
    async fn save(&self, deployment: &Deployment) -> Result<(), HostError> {
        self.dir
            .file(&format!("{}.json", deployment.id))
            .write_json(deployment)
            .await
    }

    async fn get(&self, id: &str) -> Result<Option<Deployment>, HostError> {
        let file = self.dir.file(&format!("{id}.json"));
        if !file.exists().await {
            return Ok(None);
        }
        Ok(Some(file.read_json().await?))
    }

    async fn list_for_project(&self, project: &str) -> Result<Vec<Deployment>, HostError> {
        if !self.dir.exists().await {
            return Ok(Vec::new());
        }

        let mut deployments = Vec::new();
        let mut entries = tokio::fs::read_dir(self.dir.path()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let deployment: Deployment = crate::filesys::file::File::new(path).read_json().await?;
            if deployment.project == project {
                deployments.push(deployment);
            }
        }

        deployments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(deployments)
    }
}

/// In-memory store; keeps every saved snapshot for inspection
#[derive(Default)]
pub struct MemoryDeploymentStore {
    records: Mutex<HashMap<String, Deployment>>,
    snapshots: Mutex<Vec<Deployment>>,
}

impl MemoryDeploymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every version passed to `save`, in order
    pub fn snapshots(&self) -> Vec<Deployment> {
        self.snapshots
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DeploymentStore for MemoryDeploymentStore {
    async fn save(&self, deployment: &Deployment) -> Result<(), HostError> {
        self.records
            .lock()
            .map_err(|_| HostError::Internal("deployment store lock poisoned".into()))?
            .insert(deployment.id.clone(), deployment.clone());
        self.snapshots
            .lock()
            .map_err(|_| HostError::Internal("deployment store lock poisoned".into()))?
            .push(deployment.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Deployment>, HostError> {
        let records = self
            .records
            .lock()
            .map_err(|_| HostError::Internal("deployment store lock poisoned".into()))?;
        Ok(records.get(id).cloned())
    }

    async fn list_for_project(&self, project: &str) -> Result<Vec<Deployment>, HostError> {
        let records = self
            .records
            .lock()
            .map_err(|_| HostError::Internal("deployment store lock poisoned".into()))?;
        let mut deployments: Vec<Deployment> = records
            .values()
            .filter(|d| d.project == project)
            .cloned()
            .collect();
        deployments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(deployments)
    }
}
