//! Deployer worker tests

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{project, FakeRunner, Harness};
use sitehost::deploy::fsm::DeploymentStatus;
use sitehost::errors::HostError;
use sitehost::models::deployment::Deployment;
use sitehost::storage::deployments::DeploymentStore;
use sitehost::storage::settings::PrivilegeSetting;
use sitehost::workers::deployer::{self, Job, Options};

fn start(h: &Harness, max_concurrent: usize) -> (deployer::DeployQueue, tokio::task::JoinHandle<()>) {
    deployer::spawn(
        Options {
            max_concurrent,
            ..Default::default()
        },
        Arc::new(h.orchestrator(PrivilegeSetting::Direct)),
        Arc::new(h.lifecycle(PrivilegeSetting::Direct)),
        Box::pin(std::future::pending::<()>()),
    )
}

#[tokio::test]
async fn test_deploy_through_queue() {
    let h = Harness::new(FakeRunner::new());
    let (queue, worker) = start(&h, 2);
    let p = project("shop", 8001);

    let report = queue.deploy(p, Deployment::new("shop")).await.unwrap();
    assert_eq!(report.status, DeploymentStatus::Success);

    drop(queue);
    worker.await.unwrap();
}

#[tokio::test]
async fn test_duplicate_submission_is_rejected() {
    let runner = FakeRunner {
        delay: Some(Duration::from_millis(200)),
        ..FakeRunner::new()
    };
    let h = Harness::new(runner);
    let (queue, worker) = start(&h, 2);
    let p = project("shop", 8001);

    let first = Deployment::new("shop");
    let first_id = first.id.clone();
    queue
        .submit(Job::Deploy {
            project: p.clone(),
            deployment: first,
            reply: None,
        })
        .await
        .unwrap();

    let second = Deployment::new("shop");
    let second_id = second.id.clone();
    let result = queue.deploy(p.clone(), second).await;
    assert!(matches!(result, Err(HostError::ProjectBusy(_))));

    // The rejected record still reached a terminal state
    let rejected = h.store.get(&second_id).await.unwrap().unwrap();
    assert_eq!(rejected.status, DeploymentStatus::Failed);
    assert!(rejected.logs[0].starts_with("Deployment rejected:"));

    // A removal for the same project is refused too
    assert!(matches!(
        queue.remove(p.clone()).await,
        Err(HostError::ProjectBusy(_))
    ));

    drop(queue);
    worker.await.unwrap();
    let finished = h.store.get(&first_id).await.unwrap().unwrap();
    assert_eq!(finished.status, DeploymentStatus::Success);
}

#[tokio::test]
async fn test_project_is_free_after_job_completes() {
    let h = Harness::new(FakeRunner::new());
    let (queue, worker) = start(&h, 1);
    let p = project("shop", 8001);

    let first = queue.deploy(p.clone(), Deployment::new("shop")).await.unwrap();
    let second = queue.deploy(p.clone(), Deployment::new("shop")).await.unwrap();
    assert_eq!(first.status, DeploymentStatus::Success);
    assert_eq!(second.status, DeploymentStatus::Success);

    let removal = queue.remove(p).await.unwrap();
    assert!(removal.success, "{}", removal.message);

    drop(queue);
    worker.await.unwrap();
}

#[tokio::test]
async fn test_different_projects_run_concurrently() {
    let runner = FakeRunner {
        delay: Some(Duration::from_millis(50)),
        ..FakeRunner::new()
    };
    let h = Harness::new(runner);
    let (queue, worker) = start(&h, 2);

    let (shop, blog) = tokio::join!(
        queue.deploy(project("shop", 8001), Deployment::new("shop")),
        queue.deploy(project("blog", 8002), Deployment::new("blog")),
    );
    assert_eq!(shop.unwrap().status, DeploymentStatus::Success);
    assert_eq!(blog.unwrap().status, DeploymentStatus::Success);

    drop(queue);
    worker.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_drains_running_jobs() {
    let runner = FakeRunner {
        delay: Some(Duration::from_millis(100)),
        ..FakeRunner::new()
    };
    let h = Harness::new(runner);
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let (queue, worker) = deployer::spawn(
        Options::default(),
        Arc::new(h.orchestrator(PrivilegeSetting::Direct)),
        Arc::new(h.lifecycle(PrivilegeSetting::Direct)),
        Box::pin(async move {
            let _ = stop_rx.await;
        }),
    );

    let deployment = Deployment::new("shop");
    let id = deployment.id.clone();
    queue
        .submit(Job::Deploy {
            project: project("shop", 8001),
            deployment,
            reply: None,
        })
        .await
        .unwrap();

    // Give the worker time to pick the job up before asking it to stop
    tokio::time::sleep(Duration::from_millis(50)).await;
    stop_tx.send(()).unwrap();
    worker.await.unwrap();

    let record = h.store.get(&id).await.unwrap().unwrap();
    assert!(record.is_terminal());
}
