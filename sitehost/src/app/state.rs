//! Application state management

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::console::InteractiveConsole;
use crate::deploy::pipeline::{DeploymentOrchestrator, PipelineOptions};
use crate::deploy::runner::{CommandRunner, SystemCommandRunner};
use crate::deploy::teardown::ProjectLifecycleManager;
use crate::errors::HostError;
use crate::filesys::browser::FileBrowser;
use crate::locks::ProjectLocks;
use crate::storage::deployments::{DeploymentStore, FileDeploymentStore};
use crate::storage::layout::{HostingLayout, StorageLayout};
use crate::storage::settings::Settings;
use crate::workers::deployer::{self, DeployQueue};

/// Every engine component, wired against one runner, one lock table and one store
pub struct AppState {
    pub settings: Settings,
    pub hosting: HostingLayout,
    pub runner: Arc<dyn CommandRunner>,
    pub store: Arc<dyn DeploymentStore>,
    pub locks: Arc<ProjectLocks>,
    pub orchestrator: Arc<DeploymentOrchestrator>,
    pub lifecycle: Arc<ProjectLifecycleManager>,
    pub browser: FileBrowser,
    pub console: InteractiveConsole,
}

impl AppState {
    /// Initialize application state with the system command runner
    pub async fn init(settings: Settings, storage: &StorageLayout) -> Result<Self, HostError> {
        info!("Initializing application state...");
        storage.setup().await?;
        let store: Arc<dyn DeploymentStore> =
            Arc::new(FileDeploymentStore::new(storage.deployments_dir()));
        let hosting = HostingLayout::from_settings(&settings);
        Ok(Self::with_parts(
            settings,
            hosting,
            Arc::new(SystemCommandRunner::new()),
            store,
        ))
    }

    /// Build from explicit collaborators
    pub fn with_parts(
        settings: Settings,
        hosting: HostingLayout,
        runner: Arc<dyn CommandRunner>,
        store: Arc<dyn DeploymentStore>,
    ) -> Self {
        let locks = Arc::new(ProjectLocks::new());
        let orchestrator = Arc::new(DeploymentOrchestrator::new(
            hosting.clone(),
            PipelineOptions::from_settings(&settings),
            runner.clone(),
            store.clone(),
            locks.clone(),
        ));
        let lifecycle = Arc::new(ProjectLifecycleManager::new(
            hosting.clone(),
            runner.clone(),
            locks.clone(),
            settings.privilege,
            settings.proxy.service.clone(),
            Duration::from_secs(settings.hosting.step_timeout_secs),
        ));
        let browser = FileBrowser::new(hosting.clone(), locks.clone());
        let console = InteractiveConsole::new(hosting.clone(), runner.clone(), locks.clone())
            .with_timeout(Duration::from_secs(settings.console.timeout_secs));

        Self {
            settings,
            hosting,
            runner,
            store,
            locks,
            orchestrator,
            lifecycle,
            browser,
            console,
        }
    }

    /// Start the deployer worker pool
    pub fn spawn_deployer(
        &self,
        shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
    ) -> (DeployQueue, JoinHandle<()>) {
        let options = deployer::Options {
            max_concurrent: self.settings.max_concurrent_jobs,
            ..Default::default()
        };
        deployer::spawn(
            options,
            self.orchestrator.clone(),
            self.lifecycle.clone(),
            shutdown_signal,
        )
    }
}
