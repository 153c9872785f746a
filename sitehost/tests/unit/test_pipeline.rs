//! Deployment pipeline tests

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{pipeline_options, project, FakeRunner, Harness};
use sitehost::deploy::fsm::DeploymentStatus;
use sitehost::deploy::pipeline::DeploymentOrchestrator;
use sitehost::errors::HostError;
use sitehost::models::deployment::{Deployment, PublishOutcome};
use sitehost::storage::deployments::{DeploymentStore, MemoryDeploymentStore};
use sitehost::storage::settings::PrivilegeSetting;

fn django_runner() -> FakeRunner {
    FakeRunner {
        seed_files: vec![
            ("requirements.txt".into(), "django\ngunicorn\n".into()),
            ("manage.py".into(), "#!/usr/bin/env python\n".into()),
        ],
        ..FakeRunner::new()
    }
}

#[tokio::test]
async fn test_first_deploy_succeeds() {
    let h = Harness::new(django_runner());
    let orchestrator = h.orchestrator(PrivilegeSetting::Direct);
    let p = project("shop", 8001);

    let mut deployment = Deployment::new(&p.name);
    let report = orchestrator.deploy(&p, &mut deployment).await;

    assert_eq!(report.status, DeploymentStatus::Success);
    assert_eq!(deployment.status, DeploymentStatus::Success);
    assert!(deployment.finished_at.is_some());
    assert_eq!(report.proxy_config, PublishOutcome::Applied);
    assert_eq!(report.service_unit, PublishOutcome::Applied);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);

    assert_eq!(
        deployment.logs.first().map(String::as_str),
        Some("Starting deployment for shop...")
    );
    assert_eq!(
        deployment.logs.last().map(String::as_str),
        Some("Deployment Successful!")
    );
    assert!(deployment.logs.iter().any(|l| l.starts_with("Cloning ")));
    assert!(deployment.logs.iter().any(|l| l == "Virtual environment created."));

    // Configuration was published with the rendered contents
    let config = std::fs::read_to_string(h.layout.proxy_config_file(&p).path()).unwrap();
    assert!(config.contains("server_name shop.example.com;"));
    assert!(config.contains("proxy_pass http://127.0.0.1:8001;"));
    let link = h.layout.proxy_enabled_link(&p);
    assert_eq!(std::fs::read_link(&link).unwrap(), h.layout.proxy_config_file(&p).path());
    let unit = std::fs::read_to_string(h.layout.unit_file(&p).path()).unwrap();
    assert!(unit.contains("--bind 127.0.0.1:8001"));

    // Steps ran in pipeline order
    let rendered = h.runner.rendered();
    let position = |needle: &str| {
        rendered
            .iter()
            .position(|c| c.contains(needle))
            .unwrap_or_else(|| panic!("{needle} not run: {rendered:?}"))
    };
    assert!(position("git clone") < position("-m venv"));
    assert!(position("-m venv") < position("install -r requirements.txt"));
    assert!(position("install -r requirements.txt") < position("migrate --noinput"));
    assert!(position("migrate --noinput") < position("collectstatic --noinput"));
    assert!(position("collectstatic --noinput") < position("systemctl daemon-reload"));
    assert!(position("systemctl restart shop_gunicorn.service") < position("systemctl restart nginx"));
}

#[tokio::test]
async fn test_every_step_is_persisted() {
    let h = Harness::new(django_runner());
    let orchestrator = h.orchestrator(PrivilegeSetting::Direct);
    let p = project("shop", 8001);

    let mut deployment = Deployment::new(&p.name);
    orchestrator.deploy(&p, &mut deployment).await;

    let snapshots = h.store.snapshots();
    assert!(snapshots.len() >= deployment.logs.len());
    // Log lengths never shrink between saves
    for pair in snapshots.windows(2) {
        assert!(pair[0].logs.len() <= pair[1].logs.len());
    }
    let stored = h.store.get(&deployment.id).await.unwrap().unwrap();
    assert_eq!(stored.logs, deployment.logs);
    assert_eq!(stored.status, DeploymentStatus::Success);
}

#[tokio::test]
async fn test_invalid_repository_fails_without_configuration() {
    let h = Harness::new(FakeRunner::new());
    let orchestrator = h.orchestrator(PrivilegeSetting::Direct);
    let mut p = project("shop", 8001);
    p.repo_url = "git.example.com:nothing-here".to_string();

    let mut deployment = Deployment::new(&p.name);
    let report = orchestrator.deploy(&p, &mut deployment).await;

    assert_eq!(report.status, DeploymentStatus::Failed);
    let last = deployment.logs.last().unwrap();
    assert!(last.starts_with("Deployment failed: Git failed:"), "{last}");
    assert_eq!(report.proxy_config, PublishOutcome::Skipped);
    assert_eq!(report.service_unit, PublishOutcome::Skipped);
    assert!(!h.layout.proxy_config_file(&p).path().exists());
    assert!(!h.layout.unit_file(&p).path().exists());
    assert_eq!(h.runner.count("-m venv"), 0);
}

#[tokio::test]
async fn test_redeploy_pulls_and_reuses_venv() {
    let h = Harness::new(django_runner());
    let orchestrator = h.orchestrator(PrivilegeSetting::Direct);
    let p = project("shop", 8001);

    let mut first = Deployment::new(&p.name);
    orchestrator.deploy(&p, &mut first).await;
    let mut second = Deployment::new(&p.name);
    let report = orchestrator.deploy(&p, &mut second).await;

    assert_eq!(report.status, DeploymentStatus::Success);
    assert_eq!(h.runner.count("git clone"), 1);
    assert_eq!(h.runner.count("git pull --ff-only origin main"), 1);
    assert_eq!(h.runner.count("-m venv"), 1);
    assert!(second
        .logs
        .iter()
        .any(|l| l == "Reusing existing virtual environment."));

    let history = h.store.list_for_project("shop").await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn test_advisory_failures_do_not_abort() {
    let runner = FakeRunner {
        fail_matching: Some("migrate".into()),
        ..django_runner()
    };
    let h = Harness::new(runner);
    let orchestrator = h.orchestrator(PrivilegeSetting::Direct);
    let p = project("shop", 8001);

    let mut deployment = Deployment::new(&p.name);
    let report = orchestrator.deploy(&p, &mut deployment).await;

    assert_eq!(report.status, DeploymentStatus::Success);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].starts_with("migrations failed"));
    assert!(deployment
        .logs
        .iter()
        .any(|l| l.starts_with("Warning: migrations failed")));
    assert_eq!(h.runner.count("collectstatic"), 1);
}

#[tokio::test]
async fn test_venv_failure_is_fatal() {
    let runner = FakeRunner {
        fail_matching: Some("-m venv".into()),
        ..django_runner()
    };
    let h = Harness::new(runner);
    let orchestrator = h.orchestrator(PrivilegeSetting::Direct);
    let p = project("shop", 8001);

    let mut deployment = Deployment::new(&p.name);
    let report = orchestrator.deploy(&p, &mut deployment).await;

    assert_eq!(report.status, DeploymentStatus::Failed);
    assert!(deployment
        .logs
        .last()
        .unwrap()
        .starts_with("Deployment failed: Venv creation failed"));
    assert_eq!(h.runner.count("pip"), 0);
}

#[tokio::test]
async fn test_missing_optional_files_are_skipped() {
    let h = Harness::new(FakeRunner::new());
    let orchestrator = h.orchestrator(PrivilegeSetting::Direct);
    let p = project("static-site", 8002);

    let mut deployment = Deployment::new(&p.name);
    let report = orchestrator.deploy(&p, &mut deployment).await;

    assert_eq!(report.status, DeploymentStatus::Success);
    assert_eq!(h.runner.count("pip"), 0);
    assert_eq!(h.runner.count("manage.py"), 0);
    assert!(deployment
        .logs
        .iter()
        .any(|l| l == "No requirements.txt found, skipping dependency install."));
}

#[tokio::test]
async fn test_without_privilege_configuration_is_not_applied() {
    let h = Harness::new(django_runner());
    let orchestrator = h.orchestrator(PrivilegeSetting::None);
    let p = project("shop", 8001);

    let mut deployment = Deployment::new(&p.name);
    let report = orchestrator.deploy(&p, &mut deployment).await;

    assert_eq!(report.status, DeploymentStatus::Success);
    assert!(matches!(report.proxy_config, PublishOutcome::NotApplied(_)));
    assert!(matches!(report.service_unit, PublishOutcome::NotApplied(_)));
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(h.runner.count("systemctl"), 0);
    assert!(!h.layout.unit_file(&p).path().exists());
}

#[tokio::test]
async fn test_sudo_mode_prefixes_privileged_commands() {
    let h = Harness::new(django_runner());
    let orchestrator = h.orchestrator(PrivilegeSetting::Sudo);
    let p = project("shop", 8001);

    let mut deployment = Deployment::new(&p.name);
    orchestrator.deploy(&p, &mut deployment).await;

    let rendered = h.runner.rendered();
    let systemctl: Vec<_> = rendered.iter().filter(|c| c.contains("systemctl")).collect();
    assert!(!systemctl.is_empty());
    assert!(systemctl.iter().all(|c| c.starts_with("sudo -n systemctl")));
    assert!(rendered.iter().any(|c| c.starts_with("sudo -n mv -f --")));
    assert!(rendered.iter().any(|c| c.starts_with("sudo -n ln -sfn --")));
    // Non-privileged steps stay unwrapped
    assert!(rendered.iter().any(|c| c.starts_with("git clone")));
}

#[tokio::test]
async fn test_port_conflict_is_reported() {
    let h = Harness::new(FakeRunner::new());
    let orchestrator = h.orchestrator(PrivilegeSetting::Direct);
    std::fs::create_dir_all(&h.layout.unit_dir).unwrap();
    std::fs::write(
        h.layout.unit_dir.join("blog_gunicorn.service"),
        "[Service]\nExecStart=/srv/blog/venv/bin/gunicorn --workers 3 --bind 127.0.0.1:8001 config.wsgi:application\n",
    )
    .unwrap();
    let p = project("shop", 8001);

    let mut deployment = Deployment::new(&p.name);
    let report = orchestrator.deploy(&p, &mut deployment).await;

    match &report.service_unit {
        PublishOutcome::Failed(reason) => assert!(reason.contains("blog_gunicorn.service")),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(report.proxy_config, PublishOutcome::Applied);
    assert!(!h.layout.unit_file(&p).path().exists());
    assert_eq!(h.runner.count("restart shop_gunicorn.service"), 0);
}

#[tokio::test]
async fn test_interrupted_clone_is_resumed() {
    let h = Harness::new(FakeRunner::new());
    let orchestrator = h.orchestrator(PrivilegeSetting::Direct);
    let p = project("shop", 8001);
    std::fs::create_dir_all(h.layout.project_dir(&p).path()).unwrap();

    let mut deployment = Deployment::new(&p.name);
    let report = orchestrator.deploy(&p, &mut deployment).await;

    assert_eq!(report.status, DeploymentStatus::Success);
    assert_eq!(h.runner.count("git clone"), 1);
    assert!(deployment
        .logs
        .iter()
        .any(|l| l.starts_with("Found an empty checkout")));
}

#[tokio::test]
async fn test_non_checkout_directory_is_fatal() {
    let h = Harness::new(FakeRunner::new());
    let orchestrator = h.orchestrator(PrivilegeSetting::Direct);
    let p = project("shop", 8001);
    let dir = h.layout.project_dir(&p);
    std::fs::create_dir_all(dir.path()).unwrap();
    std::fs::write(dir.path().join("stray.txt"), "x").unwrap();

    let mut deployment = Deployment::new(&p.name);
    let report = orchestrator.deploy(&p, &mut deployment).await;

    assert_eq!(report.status, DeploymentStatus::Failed);
    assert_eq!(h.runner.count("git"), 0);
    assert!(dir.path().join("stray.txt").exists());
}

#[tokio::test]
async fn test_busy_project_rejects_deploy() {
    let h = Harness::new(FakeRunner::new());
    let orchestrator = h.orchestrator(PrivilegeSetting::Direct);
    let p = project("shop", 8001);
    let _held = h.locks.exclusive("shop").await.unwrap();

    let mut deployment = Deployment::new(&p.name);
    let report = orchestrator.deploy(&p, &mut deployment).await;

    assert_eq!(report.status, DeploymentStatus::Failed);
    assert!(deployment.logs[0].starts_with("Deployment rejected:"));
    assert!(h.runner.calls().is_empty());
}

#[tokio::test]
async fn test_invalid_project_fails() {
    let h = Harness::new(FakeRunner::new());
    let orchestrator = h.orchestrator(PrivilegeSetting::Direct);
    let mut p = project("shop", 8001);
    p.name = "../escape".to_string();

    let mut deployment = Deployment::new(&p.name);
    let report = orchestrator.deploy(&p, &mut deployment).await;

    assert_eq!(report.status, DeploymentStatus::Failed);
    assert!(h.runner.calls().is_empty());
    assert!(!h.root().join("escape").exists());
}

#[tokio::test]
async fn test_deploy_waits_for_readers() {
    let h = Harness::new(FakeRunner::new());
    let orchestrator = h.orchestrator(PrivilegeSetting::Direct);
    let p = project("shop", 8001);
    let reader = h.locks.try_shared("shop").unwrap();

    let mut deployment = Deployment::new(&p.name);
    let release = async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(reader);
    };
    let (report, ()) = tokio::join!(orchestrator.deploy(&p, &mut deployment), release);

    assert_eq!(report.status, DeploymentStatus::Success);
    assert!(!deployment.logs.iter().any(|l| l.starts_with("Deployment rejected")));
}

#[tokio::test]
async fn test_every_command_is_bounded() {
    for privilege in [PrivilegeSetting::Direct, PrivilegeSetting::Sudo] {
        let h = Harness::new(django_runner());
        let p = project("shop", 8001);

        let mut deployment = Deployment::new(&p.name);
        h.orchestrator(privilege).deploy(&p, &mut deployment).await;

        let calls = h.runner.calls();
        assert!(calls.iter().any(|c| c.display().contains("systemctl restart nginx")));
        for call in calls {
            assert!(call.timeout.is_some(), "unbounded: {}", call.display());
        }
    }
}

/// Memory store whose `fail_on`-th save (1-based) reports a full disk
struct FlakyStore {
    inner: MemoryDeploymentStore,
    fail_on: usize,
    saves: AtomicUsize,
}

#[async_trait]
impl DeploymentStore for FlakyStore {
    async fn save(&self, deployment: &Deployment) -> Result<(), HostError> {
        if self.saves.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
            return Err(HostError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                "No space left on device",
            )));
        }
        self.inner.save(deployment).await
    }

    async fn get(&self, id: &str) -> Result<Option<Deployment>, HostError> {
        self.inner.get(id).await
    }

    async fn list_for_project(&self, project: &str) -> Result<Vec<Deployment>, HostError> {
        self.inner.list_for_project(project).await
    }
}

#[tokio::test]
async fn test_unpersisted_log_stops_the_pipeline() {
    let h = Harness::new(django_runner());
    // Saves: start, "Starting deployment", "Cloning", then "Git operation successful."
    let store = Arc::new(FlakyStore {
        inner: MemoryDeploymentStore::new(),
        fail_on: 4,
        saves: AtomicUsize::new(0),
    });
    let orchestrator = DeploymentOrchestrator::new(
        h.layout.clone(),
        pipeline_options(PrivilegeSetting::Direct),
        h.runner.clone(),
        store.clone(),
        h.locks.clone(),
    );
    let p = project("shop", 8001);

    let mut deployment = Deployment::new(&p.name);
    let report = orchestrator.deploy(&p, &mut deployment).await;

    assert_eq!(report.status, DeploymentStatus::Failed);
    let last = deployment.logs.last().unwrap();
    assert!(last.starts_with("Deployment failed: Could not persist deployment"), "{last}");

    // Nothing ran past the step whose log line was lost
    assert_eq!(h.runner.count("git clone"), 1);
    assert_eq!(h.runner.count("venv"), 0);
    assert_eq!(h.runner.count("systemctl"), 0);
    assert!(!h.layout.unit_file(&p).path().exists());

    // The terminal state still reached the store
    let stored = store.get(&deployment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeploymentStatus::Failed);
    assert_eq!(stored.logs.last(), deployment.logs.last());
}
