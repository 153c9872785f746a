//! Project removal tests

mod common;

use common::{project, FakeRunner, Harness};
use sitehost::models::deployment::Deployment;
use sitehost::storage::settings::PrivilegeSetting;

#[tokio::test]
async fn test_remove_never_deployed_project() {
    let h = Harness::new(FakeRunner::new());
    let lifecycle = h.lifecycle(PrivilegeSetting::Direct);

    let report = lifecycle.remove_project(&project("ghost", 8009)).await;

    assert!(report.success, "{}", report.message);
    assert_eq!(report.message, "Project removed successfully.");
}

#[tokio::test]
async fn test_remove_after_deploy_cleans_everything() {
    let h = Harness::new(FakeRunner::new());
    let p = project("shop", 8001);
    let mut deployment = Deployment::new(&p.name);
    h.orchestrator(PrivilegeSetting::Direct)
        .deploy(&p, &mut deployment)
        .await;
    assert!(h.layout.unit_file(&p).path().exists());

    let report = h
        .lifecycle(PrivilegeSetting::Direct)
        .remove_project(&p)
        .await;

    assert!(report.success, "{}", report.message);
    assert!(!h.layout.project_dir(&p).path().exists());
    assert!(!h.layout.unit_file(&p).path().exists());
    assert!(!h.layout.proxy_config_file(&p).path().exists());
    assert!(std::fs::symlink_metadata(h.layout.proxy_enabled_link(&p)).is_err());

    let rendered = h.runner.rendered();
    assert!(rendered.contains(&"systemctl stop shop_gunicorn.service".to_string()));
    assert!(rendered.contains(&"systemctl disable shop_gunicorn.service".to_string()));
    assert_eq!(rendered.last().map(String::as_str), Some("systemctl restart nginx"));
}

#[tokio::test]
async fn test_service_failures_do_not_block_removal() {
    let runner = FakeRunner {
        fail_matching: Some("systemctl".into()),
        ..FakeRunner::new()
    };
    let h = Harness::new(runner);
    let p = project("shop", 8001);
    std::fs::create_dir_all(h.layout.project_dir(&p).path().join("src")).unwrap();

    let report = h
        .lifecycle(PrivilegeSetting::Direct)
        .remove_project(&p)
        .await;

    assert!(report.success);
    assert!(!h.layout.project_dir(&p).path().exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_read_only_entries_are_removed() {
    use std::os::unix::fs::PermissionsExt;

    let h = Harness::new(FakeRunner::new());
    let p = project("shop", 8001);
    let objects = h.layout.project_dir(&p).path().join(".git").join("objects");
    std::fs::create_dir_all(&objects).unwrap();
    let pack = objects.join("pack-1.pack");
    std::fs::write(&pack, b"data").unwrap();
    std::fs::set_permissions(&pack, std::fs::Permissions::from_mode(0o444)).unwrap();
    std::fs::set_permissions(&objects, std::fs::Permissions::from_mode(0o555)).unwrap();

    let report = h
        .lifecycle(PrivilegeSetting::Direct)
        .remove_project(&p)
        .await;

    assert!(report.success, "{}", report.message);
    assert!(!h.layout.project_dir(&p).path().exists());
}

#[tokio::test]
async fn test_without_privilege_only_files_are_removed() {
    let h = Harness::new(FakeRunner::new());
    let p = project("shop", 8001);
    std::fs::create_dir_all(h.layout.project_dir(&p).path()).unwrap();

    let report = h.lifecycle(PrivilegeSetting::None).remove_project(&p).await;

    assert!(report.success);
    assert!(report.message.contains("insufficient privilege"));
    assert!(!h.layout.project_dir(&p).path().exists());
    assert!(h.runner.calls().is_empty());
}

#[tokio::test]
async fn test_remove_during_deploy_is_rejected() {
    let h = Harness::new(FakeRunner::new());
    let p = project("shop", 8001);
    std::fs::create_dir_all(h.layout.project_dir(&p).path()).unwrap();
    let _deploying = h.locks.exclusive("shop").await.unwrap();

    let report = h
        .lifecycle(PrivilegeSetting::Direct)
        .remove_project(&p)
        .await;

    assert!(!report.success);
    assert_eq!(
        report.message,
        "Another change to 'shop' is already in progress"
    );
    assert!(h.layout.project_dir(&p).path().exists());
}

#[tokio::test]
async fn test_remove_waits_for_readers() {
    let h = Harness::new(FakeRunner::new());
    let p = project("shop", 8001);
    std::fs::create_dir_all(h.layout.project_dir(&p).path()).unwrap();
    let reader = h.locks.try_shared("shop").unwrap();
    let lifecycle = h.lifecycle(PrivilegeSetting::Direct);

    let release = async move {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        drop(reader);
    };
    let (report, ()) = tokio::join!(lifecycle.remove_project(&p), release);

    assert!(report.success, "{}", report.message);
    assert!(!h.layout.project_dir(&p).path().exists());
}

#[tokio::test]
async fn test_service_commands_are_bounded() {
    let h = Harness::new(FakeRunner::new());
    let p = project("shop", 8001);
    std::fs::create_dir_all(h.layout.project_dir(&p).path()).unwrap();

    let report = h.lifecycle(PrivilegeSetting::Sudo).remove_project(&p).await;

    assert!(report.success, "{}", report.message);
    let calls = h.runner.calls();
    assert!(calls.iter().any(|c| c.display() == "sudo -n systemctl stop shop_gunicorn.service"));
    assert!(calls.iter().any(|c| c.display().starts_with("sudo -n rm -f -- ")));
    for call in calls {
        assert!(call.timeout.is_some(), "unbounded: {}", call.display());
    }
}
