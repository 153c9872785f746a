//! Deployment worker for orchestration
//!
//! Deploy and removal jobs are queued and executed by a bounded pool. A
//! project may have at most one job queued or running; further submissions
//! for it are rejected until that job finishes.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

use crate::deploy::pipeline::DeploymentOrchestrator;
use crate::deploy::teardown::ProjectLifecycleManager;
use crate::errors::HostError;
use crate::models::deployment::{DeployReport, Deployment, RemovalReport};
use crate::models::project::Project;

/// Deployer worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Jobs running at the same time
    pub max_concurrent: usize,

    /// Jobs waiting for a free slot
    pub queue_capacity: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            queue_capacity: 64,
        }
    }
}

/// A unit of work for the pool
pub enum Job {
    Deploy {
        project: Project,
        deployment: Deployment,
        reply: Option<oneshot::Sender<DeployReport>>,
    },
    Remove {
        project: Project,
        reply: Option<oneshot::Sender<RemovalReport>>,
    },
}

impl Job {
    fn project_name(&self) -> &str {
        match self {
            Job::Deploy { project, .. } | Job::Remove { project, .. } => &project.name,
        }
    }
}

/// Handle for submitting jobs
#[derive(Clone)]
pub struct DeployQueue {
    tx: mpsc::Sender<Job>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    orchestrator: Arc<DeploymentOrchestrator>,
}

impl DeployQueue {
    /// Queue a job; rejected when the project already has one queued or running
    pub async fn submit(&self, job: Job) -> Result<(), HostError> {
        let name = job.project_name().to_string();
        {
            let mut in_flight = self
                .in_flight
                .lock()
                .map_err(|_| HostError::Internal("in-flight set poisoned".into()))?;
            if !in_flight.insert(name.clone()) {
                drop(in_flight);
                let err = HostError::ProjectBusy(name);
                self.reject_job(job, &err).await;
                return Err(err);
            }
        }

        if let Err(e) = self.tx.try_send(job) {
            release(&self.in_flight, &name);
            let err = HostError::Internal(format!("deploy queue unavailable for '{name}'"));
            let job = match e {
                mpsc::error::TrySendError::Full(job) | mpsc::error::TrySendError::Closed(job) => job,
            };
            self.reject_job(job, &err).await;
            return Err(err);
        }
        debug!("Queued job for {}", name);
        Ok(())
    }

    /// Queue a deploy and wait for its report
    pub async fn deploy(&self, project: Project, deployment: Deployment) -> Result<DeployReport, HostError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Job::Deploy {
            project,
            deployment,
            reply: Some(reply),
        })
        .await?;
        rx.await
            .map_err(|_| HostError::Internal("deploy worker dropped the job".into()))
    }

    /// Queue a removal and wait for its report
    pub async fn remove(&self, project: Project) -> Result<RemovalReport, HostError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Job::Remove {
            project,
            reply: Some(reply),
        })
        .await?;
        rx.await
            .map_err(|_| HostError::Internal("deploy worker dropped the job".into()))
    }

    /// A deployment record handed to us must still reach a terminal state
    async fn reject_job(&self, job: Job, reason: &HostError) {
        if let Job::Deploy { mut deployment, .. } = job {
            self.orchestrator.reject(&mut deployment, reason).await;
        }
    }
}

fn release(in_flight: &Mutex<HashSet<String>>, name: &str) {
    if let Ok(mut set) = in_flight.lock() {
        set.remove(name);
    }
}

/// Start the deployer worker
pub fn spawn(
    options: Options,
    orchestrator: Arc<DeploymentOrchestrator>,
    lifecycle: Arc<ProjectLifecycleManager>,
    shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) -> (DeployQueue, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
    let in_flight = Arc::new(Mutex::new(HashSet::new()));
    let queue = DeployQueue {
        tx,
        in_flight: in_flight.clone(),
        orchestrator: orchestrator.clone(),
    };
    let handle = tokio::spawn(run(
        options,
        rx,
        in_flight,
        orchestrator,
        lifecycle,
        shutdown_signal,
    ));
    (queue, handle)
}

async fn run(
    options: Options,
    mut rx: mpsc::Receiver<Job>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    orchestrator: Arc<DeploymentOrchestrator>,
    lifecycle: Arc<ProjectLifecycleManager>,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Deployer worker starting...");
    let slots = Arc::new(Semaphore::new(options.max_concurrent.max(1)));
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Deployer worker shutting down...");
                break;
            }
            job = rx.recv() => {
                let Some(job) = job else { break };
                let Ok(permit) = slots.clone().acquire_owned().await else { break };
                let orchestrator = orchestrator.clone();
                let lifecycle = lifecycle.clone();
                let in_flight = in_flight.clone();
                tasks.spawn(async move {
                    let name = job.project_name().to_string();
                    execute(job, &orchestrator, &lifecycle).await;
                    release(&in_flight, &name);
                    drop(permit);
                });
            }
            Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = result {
                    error!("Deployer task panicked: {}", e);
                }
            }
        }
    }

    // Queued jobs will never run; their records still need a terminal state
    rx.close();
    while let Ok(job) = rx.try_recv() {
        let name = job.project_name().to_string();
        if let Job::Deploy { mut deployment, .. } = job {
            let reason = HostError::Internal("deployer is shutting down".into());
            orchestrator.reject(&mut deployment, &reason).await;
        }
        release(&in_flight, &name);
    }

    // Let running jobs reach a terminal state
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!("Deployer task panicked: {}", e);
        }
    }
    info!("Deployer worker stopped");
}

async fn execute(job: Job, orchestrator: &DeploymentOrchestrator, lifecycle: &ProjectLifecycleManager) {
    match job {
        Job::Deploy {
            project,
            mut deployment,
            reply,
        } => {
            info!("Received deployment task: {} ({})", deployment.id, project.name);
            let report = orchestrator.deploy(&project, &mut deployment).await;
            if let Some(reply) = reply {
                let _ = reply.send(report);
            }
        }
        Job::Remove { project, reply } => {
            info!("Received removal task: {}", project.name);
            let report = lifecycle.remove_project(&project).await;
            if let Some(reply) = reply {
                let _ = reply.send(report);
            }
        }
    }
}
