//! Deployment orchestration
//!
//! Turns a project record into a running service: sync source, provision the
//! virtualenv, install dependencies, migrate, collect static files, publish
//! nginx and systemd configuration, restart. Every step appends to the
//! deployment log and persists it before the next step begins.
//!
//! Source sync and venv creation are fatal on failure, and so is a log line
//! that cannot be persisted. Dependency install,
//! migrations, static collection and configuration publishing are
//! best-effort provisioning: failures are recorded as warnings and the
//! pipeline continues.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::deploy::fsm::DeploymentEvent;
use crate::deploy::git::{self, SyncPlan};
use crate::deploy::privilege::{self, PrivilegeMode};
use crate::deploy::publish;
use crate::deploy::render::{render_reverse_proxy_config, render_service_unit, UnitOptions};
use crate::deploy::runner::{CommandRunner, CommandSpec};
use crate::errors::HostError;
use crate::locks::ProjectLocks;
use crate::models::deployment::{DeployReport, Deployment, PublishOutcome};
use crate::models::project::Project;
use crate::storage::deployments::DeploymentStore;
use crate::storage::layout::HostingLayout;
use crate::storage::settings::{PrivilegeSetting, Settings};

/// Pipeline settings
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Host interpreter used to create virtualenvs
    pub interpreter: String,

    /// Prefer `python{tag}` when it is on PATH
    pub honor_runtime_version: bool,

    /// Upper bound for each command the pipeline runs
    pub step_timeout: Duration,

    pub unit: UnitOptions,

    pub privilege: PrivilegeSetting,

    /// systemd name of the proxy daemon
    pub proxy_service: String,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            interpreter: settings.hosting.interpreter.clone(),
            honor_runtime_version: settings.hosting.honor_runtime_version,
            step_timeout: Duration::from_secs(settings.hosting.step_timeout_secs),
            unit: UnitOptions {
                workers: settings.supervisor.workers,
                wsgi_app: settings.supervisor.wsgi_app.clone(),
                user: settings.supervisor.user.clone(),
                group: settings.supervisor.group.clone(),
            },
            privilege: settings.privilege,
            proxy_service: settings.proxy.service.clone(),
        }
    }
}

/// Appends to a deployment's log and persists it after every line.
///
/// A line that cannot be persisted stops the pipeline: the next step must
/// never run ahead of the stored log.
struct Recorder<'a> {
    deployment: &'a mut Deployment,
    store: &'a dyn DeploymentStore,
    warnings: Vec<String>,
}

impl Recorder<'_> {
    async fn log(&mut self, line: impl Into<String>) -> Result<(), HostError> {
        let line = line.into();
        info!(deployment = %self.deployment.id, "{}", line);
        self.deployment.append_log(line);
        self.persist().await
    }

    async fn warn(&mut self, message: impl Into<String>) -> Result<(), HostError> {
        let message = message.into();
        warn!(deployment = %self.deployment.id, "{}", message);
        self.deployment.append_log(format!("Warning: {message}"));
        self.warnings.push(message);
        self.persist().await
    }

    async fn transition(&mut self, event: DeploymentEvent) -> Result<(), HostError> {
        self.deployment.apply(event)?;
        self.persist().await
    }

    /// Record the last line and the terminal state; a failed save can only be logged
    async fn finish(&mut self, line: String, event: DeploymentEvent) {
        info!(deployment = %self.deployment.id, "{}", line);
        self.deployment.append_log(line);
        if let Err(e) = self.deployment.apply(event) {
            error!(deployment = %self.deployment.id, "{}", e);
        }
        if let Err(e) = self.persist().await {
            error!(deployment = %self.deployment.id, "{}", e);
        }
    }

    async fn persist(&self) -> Result<(), HostError> {
        self.store
            .save(&*self.deployment)
            .await
            .map_err(|e| HostError::PersistenceFailure(e.to_string()))
    }
}

/// Runs the deploy pipeline for one project at a time
pub struct DeploymentOrchestrator {
    layout: HostingLayout,
    options: PipelineOptions,
    runner: Arc<dyn CommandRunner>,
    store: Arc<dyn DeploymentStore>,
    locks: Arc<ProjectLocks>,
}

impl DeploymentOrchestrator {
    pub fn new(
        layout: HostingLayout,
        options: PipelineOptions,
        runner: Arc<dyn CommandRunner>,
        store: Arc<dyn DeploymentStore>,
        locks: Arc<ProjectLocks>,
    ) -> Self {
        Self {
            layout,
            options,
            runner,
            store,
            locks,
        }
    }

    pub fn layout(&self) -> &HostingLayout {
        &self.layout
    }

    /// Deploy `project`, driving `deployment` to a terminal state
    pub async fn deploy(&self, project: &Project, deployment: &mut Deployment) -> DeployReport {
        let mut report = DeployReport {
            deployment_id: deployment.id.clone(),
            status: deployment.status,
            proxy_config: PublishOutcome::Skipped,
            service_unit: PublishOutcome::Skipped,
            warnings: Vec::new(),
        };

        if deployment.is_terminal() {
            warn!("Deployment {} is already {}, not running it again", deployment.id, deployment.status);
            return report;
        }

        let _guard = match self.locks.exclusive(&project.name).await {
            Ok(guard) => guard,
            Err(e) => {
                self.reject(deployment, &e).await;
                report.status = deployment.status;
                return report;
            }
        };

        let mut rec = Recorder {
            deployment,
            store: self.store.as_ref(),
            warnings: Vec::new(),
        };

        let result = async {
            rec.transition(DeploymentEvent::Start).await?;
            self.run_pipeline(project, &mut rec, &mut report).await
        }
        .await;

        match result {
            Ok(()) => {
                rec.finish("Deployment Successful!".to_string(), DeploymentEvent::Succeed)
                    .await
            }
            Err(e) => {
                let msg = format!("Deployment failed: {e}");
                rec.finish(msg.clone(), DeploymentEvent::Fail(msg)).await;
            }
        }

        report.warnings = std::mem::take(&mut rec.warnings);
        report.status = rec.deployment.status;
        report
    }

    /// Mark a deployment that will not run as failed
    pub async fn reject(&self, deployment: &mut Deployment, reason: &HostError) {
        if deployment.is_terminal() {
            return;
        }
        let mut rec = Recorder {
            deployment,
            store: self.store.as_ref(),
            warnings: Vec::new(),
        };
        let msg = format!("Deployment rejected: {reason}");
        rec.finish(msg.clone(), DeploymentEvent::Fail(msg)).await;
    }

    async fn run_pipeline(
        &self,
        project: &Project,
        rec: &mut Recorder<'_>,
        report: &mut DeployReport,
    ) -> Result<(), HostError> {
        rec.log(format!("Starting deployment for {}...", project.name)).await?;
        project.validate()?;

        // 1. Base directory
        let base = self.layout.base();
        base.create().await?;

        // 2. Source
        let project_dir = self.layout.project_dir(project);
        let plan = git::plan_sync(&project_dir).await?;
        match plan {
            SyncPlan::Pull => rec.log(format!("Pulling latest changes ({})...", project.branch)).await?,
            SyncPlan::Clone => {
                rec.log(format!("Cloning {} ({})...", project.repo_url, project.branch)).await?
            }
            SyncPlan::Reclone => {
                rec.log(format!(
                    "Found an empty checkout from an interrupted clone, cloning {} again...",
                    project.repo_url
                ))
                .await?
            }
        }
        git::sync_repository(self.runner.as_ref(), plan, &base, project, self.options.step_timeout)
            .await?;
        rec.log("Git operation successful.").await?;

        // 3. Virtualenv
        let venv = self.layout.venv_dir(project);
        if venv.exists().await {
            rec.log("Reusing existing virtual environment.").await?;
        } else {
            let interpreter = self.select_interpreter(project, rec).await?;
            rec.log(format!("Creating virtual environment using {interpreter}...")).await?;
            let spec = CommandSpec::new(interpreter)
                .args(["-m", "venv"])
                .arg(&self.layout.venv_dir_name)
                .current_dir(project_dir.path())
                .timeout(self.options.step_timeout);
            let output = self.runner.run(&spec).await;
            if !output.succeeded {
                return Err(HostError::FatalProvisionFailure(output.stderr.trim().to_string()));
            }
            rec.log("Virtual environment created.").await?;
        }

        // 4. Dependencies
        let venv_bin = self.layout.venv_bin(project);
        if project_dir.file("requirements.txt").exists().await {
            rec.log("Installing requirements...").await?;
            let spec = CommandSpec::new(venv_bin.file("pip").path().to_string_lossy())
                .args(["install", "-r", "requirements.txt"])
                .current_dir(project_dir.path())
                .timeout(self.options.step_timeout);
            if self.run_advisory(rec, &spec, "pip install had issues").await? {
                rec.log("Requirements installed.").await?;
            }
        } else {
            rec.log("No requirements.txt found, skipping dependency install.").await?;
        }

        // 5. Migrations and static files
        if project_dir.file("manage.py").exists().await {
            let python = venv_bin.file("python").path().to_string_lossy().into_owned();
            let manage = |args: &[&str]| {
                CommandSpec::new(python.clone())
                    .arg("manage.py")
                    .args(args.iter().copied())
                    .current_dir(project_dir.path())
                    .envs(project.env_pairs())
                    .timeout(self.options.step_timeout)
            };

            rec.log("Running migrations...").await?;
            self.run_advisory(rec, &manage(&["migrate", "--noinput"]), "migrations failed")
                .await?;

            rec.log("Collecting static files...").await?;
            self.run_advisory(rec, &manage(&["collectstatic", "--noinput"]), "collectstatic failed")
                .await?;
        } else {
            rec.log("No manage.py found, skipping migrations and static files.").await?;
        }

        // 6-8. System configuration
        let mode =
            privilege::detect(self.options.privilege, &self.layout, self.runner.as_ref()).await;
        if !mode.is_available() {
            let reason = "no write access to system configuration and passwordless sudo is unavailable"
                .to_string();
            rec.warn(format!("System configuration not applied: {reason}")).await?;
            report.proxy_config = PublishOutcome::NotApplied(reason.clone());
            report.service_unit = PublishOutcome::NotApplied(reason);
            return Ok(());
        }

        rec.log("Configuring Systemd & Nginx...").await?;
        report.proxy_config = self.publish_proxy_config(project, mode, rec).await?;
        report.service_unit = self.publish_service_unit(project, mode, rec).await?;

        let output = publish::systemctl(
            mode,
            self.runner.as_ref(),
            &["restart", self.options.proxy_service.as_str()],
            self.options.step_timeout,
        )
        .await;
        if output.succeeded {
            rec.log(format!("Restarted {}.", self.options.proxy_service)).await?;
        } else {
            rec.warn(format!(
                "restarting {} failed: {}",
                self.options.proxy_service,
                output.stderr.trim()
            ))
            .await?;
        }

        Ok(())
    }

    /// Run a best-effort step; failures become warnings
    async fn run_advisory(
        &self,
        rec: &mut Recorder<'_>,
        spec: &CommandSpec,
        what: &str,
    ) -> Result<bool, HostError> {
        match self.runner.run(spec).await.into_result(spec) {
            Ok(_) => Ok(true),
            Err(e) => {
                rec.warn(format!("{what}: {e}")).await?;
                Ok(false)
            }
        }
    }

    /// The project's tagged interpreter when available, the host's otherwise
    async fn select_interpreter(
        &self,
        project: &Project,
        rec: &mut Recorder<'_>,
    ) -> Result<String, HostError> {
        let tag = project.python_version.trim();
        let tag_ok = !tag.is_empty() && tag.chars().all(|c| c.is_ascii_digit() || c == '.');
        if self.options.honor_runtime_version && tag_ok {
            let tagged = format!("python{tag}");
            if which::which(&tagged).is_ok() {
                return Ok(tagged);
            }
            rec.log(format!(
                "{tagged} not found on PATH, falling back to {}.",
                self.options.interpreter
            ))
            .await?;
        }
        Ok(self.options.interpreter.clone())
    }

    async fn publish_proxy_config(
        &self,
        project: &Project,
        mode: PrivilegeMode,
        rec: &mut Recorder<'_>,
    ) -> Result<PublishOutcome, HostError> {
        let contents = render_reverse_proxy_config(project, &self.layout.static_root);
        let dest = self.layout.proxy_config_file(project);
        let link = self.layout.proxy_enabled_link(project);

        let result = async {
            let timeout = self.options.step_timeout;
            publish::install_file(mode, self.runner.as_ref(), &contents, &dest, timeout).await?;
            publish::link_file(mode, self.runner.as_ref(), dest.path(), &link, timeout).await
        }
        .await;

        match result {
            Ok(()) => {
                rec.log(format!("Nginx config published to {}.", dest.path().display()))
                    .await?;
                Ok(PublishOutcome::Applied)
            }
            Err(e) => {
                rec.warn(format!("Nginx config not published: {e}")).await?;
                Ok(PublishOutcome::Failed(e.to_string()))
            }
        }
    }

    async fn publish_service_unit(
        &self,
        project: &Project,
        mode: PrivilegeMode,
        rec: &mut Recorder<'_>,
    ) -> Result<PublishOutcome, HostError> {
        match find_port_conflict(&self.layout, project).await {
            Ok(Some(owner)) => {
                let msg = format!("port {} is already bound by {}", project.port, owner);
                rec.warn(format!("Service unit not published: {msg}")).await?;
                return Ok(PublishOutcome::Failed(msg));
            }
            Ok(None) => {}
            Err(e) => warn!("Port collision check skipped: {}", e),
        }

        let project_dir = self.layout.project_dir(project);
        let unit = render_service_unit(
            project,
            self.layout.venv_bin(project).path(),
            project_dir.path(),
            &self.options.unit,
        );
        let unit_file = self.layout.unit_file(project);
        let service = project.service_name();

        let result = async {
            publish::install_file(
                mode,
                self.runner.as_ref(),
                &unit,
                &unit_file,
                self.options.step_timeout,
            )
            .await?;
            for args in [
                vec!["daemon-reload"],
                vec!["enable", service.as_str()],
                vec!["restart", service.as_str()],
            ] {
                let spec = mode.wrap(
                    CommandSpec::new("systemctl")
                        .args(args.iter().copied())
                        .timeout(self.options.step_timeout),
                );
                self.runner.run(&spec).await.into_result(&spec)?;
            }
            Ok::<(), HostError>(())
        }
        .await;

        match result {
            Ok(()) => {
                rec.log(format!("Service {service} enabled and restarted.")).await?;
                Ok(PublishOutcome::Applied)
            }
            Err(e) => {
                rec.warn(format!("Service unit not applied: {e}")).await?;
                Ok(PublishOutcome::Failed(e.to_string()))
            }
        }
    }
}

/// Name of another gunicorn unit already binding the project's port
async fn find_port_conflict(
    layout: &HostingLayout,
    project: &Project,
) -> Result<Option<String>, HostError> {
    let mut entries = match tokio::fs::read_dir(&layout.unit_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let own = project.service_name();
    let needle = format!("127.0.0.1:{}", project.port);
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with("_gunicorn.service") || name == own {
            continue;
        }
        let Ok(text) = tokio::fs::read_to_string(entry.path()).await else {
            continue;
        };
        let binds = text
            .lines()
            .filter(|line| line.starts_with("ExecStart="))
            .any(|line| line.split_whitespace().any(|token| token == needle));
        if binds {
            return Ok(Some(name));
        }
    }
    Ok(None)
}
