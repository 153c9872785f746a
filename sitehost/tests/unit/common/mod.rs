//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use sitehost::deploy::pipeline::{DeploymentOrchestrator, PipelineOptions};
use sitehost::deploy::runner::{CommandOutput, CommandRunner, CommandSpec};
use sitehost::deploy::teardown::ProjectLifecycleManager;
use sitehost::locks::ProjectLocks;
use sitehost::models::project::Project;
use sitehost::storage::deployments::MemoryDeploymentStore;
use sitehost::storage::layout::HostingLayout;
use sitehost::storage::settings::PrivilegeSetting;

/// Runner that simulates git, venv creation and systemctl without touching
/// the host. Every command it receives is recorded.
#[derive(Default)]
pub struct FakeRunner {
    /// Every spec received, in order
    pub calls: Mutex<Vec<CommandSpec>>,

    /// Files written into every fresh clone, as (relative path, contents)
    pub seed_files: Vec<(String, String)>,

    /// Any command whose rendering contains this string fails
    pub fail_matching: Option<String>,

    /// Delay applied to every command
    pub delay: Option<Duration>,

    /// Whether `sudo -n true` succeeds
    pub sudo_ok: bool,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn rendered(&self) -> Vec<String> {
        self.calls().iter().map(CommandSpec::display).collect()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.rendered().iter().filter(|c| c.contains(needle)).count()
    }

    fn simulate(&self, spec: &CommandSpec) -> CommandOutput {
        let rendered = spec.display();
        if let Some(needle) = &self.fail_matching {
            if rendered.contains(needle.as_str()) {
                return failure(1, format!("simulated failure: {rendered}"));
            }
        }

        let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();
        match (spec.program.as_str(), args.as_slice()) {
            ("git", ["clone", .., url, name]) => {
                if !url.starts_with("https://") {
                    return failure(128, format!("fatal: repository '{url}' does not exist"));
                }
                let cwd = spec.cwd.clone().unwrap_or_default();
                let checkout = cwd.join(name);
                std::fs::create_dir_all(checkout.join(".git")).unwrap();
                for (relative, contents) in &self.seed_files {
                    let path = checkout.join(relative);
                    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                    std::fs::write(path, contents).unwrap();
                }
                success("Cloning into ...")
            }
            ("git", ["pull", ..]) => success("Already up to date."),
            (program, ["-m", "venv", name]) if program.starts_with("python") => {
                let cwd = spec.cwd.clone().unwrap_or_default();
                std::fs::create_dir_all(cwd.join(name).join("bin")).unwrap();
                success("")
            }
            ("sudo", ["-n", "true"]) => {
                if self.sudo_ok {
                    success("")
                } else {
                    failure(1, "sudo: a password is required".to_string())
                }
            }
            _ => success(""),
        }
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, spec: &CommandSpec) -> CommandOutput {
        self.calls.lock().unwrap().push(spec.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.simulate(spec)
    }
}

fn success(stdout: &str) -> CommandOutput {
    CommandOutput {
        succeeded: true,
        stdout: stdout.to_string(),
        exit_code: 0,
        ..Default::default()
    }
}

fn failure(code: i32, stderr: String) -> CommandOutput {
    CommandOutput {
        succeeded: false,
        stderr,
        exit_code: code,
        ..Default::default()
    }
}

pub fn project(name: &str, port: u16) -> Project {
    Project::new(
        name,
        format!("{name}.example.com"),
        format!("https://git.example.com/{name}.git"),
        port,
    )
}

pub fn pipeline_options(privilege: PrivilegeSetting) -> PipelineOptions {
    PipelineOptions {
        honor_runtime_version: false,
        privilege,
        ..PipelineOptions::default()
    }
}

/// Everything a test needs, rooted in one temporary directory
pub struct Harness {
    pub temp: tempfile::TempDir,
    pub layout: HostingLayout,
    pub runner: Arc<FakeRunner>,
    pub store: Arc<MemoryDeploymentStore>,
    pub locks: Arc<ProjectLocks>,
}

impl Harness {
    pub fn new(runner: FakeRunner) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let layout = HostingLayout::rooted_at(temp.path());
        Self {
            temp,
            layout,
            runner: Arc::new(runner),
            store: Arc::new(MemoryDeploymentStore::new()),
            locks: Arc::new(ProjectLocks::new()),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn orchestrator(&self, privilege: PrivilegeSetting) -> DeploymentOrchestrator {
        DeploymentOrchestrator::new(
            self.layout.clone(),
            pipeline_options(privilege),
            self.runner.clone(),
            self.store.clone(),
            self.locks.clone(),
        )
    }

    pub fn lifecycle(&self, privilege: PrivilegeSetting) -> ProjectLifecycleManager {
        ProjectLifecycleManager::new(
            self.layout.clone(),
            self.runner.clone(),
            self.locks.clone(),
            privilege,
            "nginx",
            pipeline_options(privilege).step_timeout,
        )
    }
}
