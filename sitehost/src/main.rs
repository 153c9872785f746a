//! sitehost - Entry Point
//!
//! Deploys, removes and inspects web projects hosted behind nginx and
//! gunicorn on this machine.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use colored::Colorize;
use tracing::{error, info};

use sitehost::app::state::AppState;
use sitehost::console::ConsoleOutcome;
use sitehost::deploy::fsm::DeploymentStatus;
use sitehost::deploy::runner::SystemCommandRunner;
use sitehost::logs::{init_logging, LogOptions};
use sitehost::models::deployment::{Deployment, PublishOutcome};
use sitehost::models::project::Project;
use sitehost::storage::layout::StorageLayout;
use sitehost::storage::registry::ProjectRegistry;
use sitehost::storage::settings::Settings;
use sitehost::utils::{run_diagnostic, version_info};

const USAGE: &str = "\
Usage: sitehost [--state-dir=DIR] [--config=FILE] <command>

Commands:
  --version                         Print version information
  --diagnostic                      Check host tools and privilege
  --deploy --project=NAME           Deploy a project
  --remove --project=NAME           Remove a project and its configuration
  --ls --project=NAME [--path=SUB]  List files under a project
  --cat --project=NAME --path=FILE  Print a text file from a project
  --edit --project=NAME --path=FILE --from=LOCAL
                                    Replace a project file with a local file
  --exec --project=NAME --cmd=CMD   Run a command in the project's virtualenv
  --history --project=NAME          Show past deployments";

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    match run(&cli_args).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{e:#}");
            eprintln!("{} {:#}", "error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

/// Returns whether the requested operation succeeded
async fn run(cli_args: &HashMap<String, String>) -> anyhow::Result<bool> {
    // Print version and exit
    if cli_args.contains_key("version") {
        println!("{}", serde_json::to_string_pretty(&version_info())?);
        return Ok(true);
    }

    let storage = match cli_args.get("state-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    // Retrieve the settings file
    let settings_file = match cli_args.get("config") {
        Some(path) => sitehost::filesys::file::File::new(PathBuf::from(path)),
        None => storage.settings_file(),
    };
    let settings = if settings_file.exists().await {
        settings_file
            .read_json::<Settings>()
            .await
            .with_context(|| format!("reading {}", settings_file.path().display()))?
    } else {
        Settings::default()
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_to_file.then(|| storage.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    // Run diagnostics
    if cli_args.contains_key("diagnostic") || cli_args.contains_key("diag") {
        return diagnostic(&settings).await;
    }

    let command = ["deploy", "remove", "ls", "cat", "edit", "exec", "history"]
        .into_iter()
        .find(|c| cli_args.contains_key(*c));
    let Some(command) = command else {
        println!("{USAGE}");
        return Ok(false);
    };

    let registry = ProjectRegistry::load(&storage.projects_file())
        .await
        .context("loading project registry")?;
    let name = cli_args
        .get("project")
        .ok_or_else(|| anyhow!("--project=NAME is required"))?;
    let project = registry.find(name)?.clone();

    let state = AppState::init(settings, &storage).await?;
    info!("sitehost {} running {} for {}", version_info().version, command, project.name);

    match command {
        "deploy" => deploy(&state, project).await,
        "remove" => remove(&state, project).await,
        "ls" => {
            let subpath = cli_args.get("path").map(String::as_str).unwrap_or("");
            list(&state, &project, subpath).await
        }
        "cat" => {
            let subpath = required(cli_args, "path", "--path=FILE")?;
            print!("{}", state.browser.read_file(&project, subpath).await?);
            Ok(true)
        }
        "edit" => {
            let subpath = required(cli_args, "path", "--path=FILE")?;
            let source = required(cli_args, "from", "--from=LOCAL")?;
            let contents = tokio::fs::read_to_string(source)
                .await
                .with_context(|| format!("reading {source}"))?;
            state.browser.save_file(&project, subpath, &contents).await?;
            println!("{}", format!("Saved {subpath}").green());
            Ok(true)
        }
        "exec" => {
            let cmd = cli_args
                .get("cmd")
                .ok_or_else(|| anyhow!("--cmd=COMMAND is required"))?;
            exec(&state, &project, cmd).await
        }
        "history" => history(&state, &project).await,
        other => bail!("unknown command {other}"),
    }
}

fn required<'a>(
    cli_args: &'a HashMap<String, String>,
    key: &str,
    usage: &str,
) -> anyhow::Result<&'a str> {
    cli_args
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("{usage} is required"))
}

async fn diagnostic(settings: &Settings) -> anyhow::Result<bool> {
    let diag = run_diagnostic(settings, &SystemCommandRunner::new()).await;
    println!("sitehost {} ({})", diag.version.version, diag.version.git_hash);
    for tool in &diag.tools {
        let status = match (&tool.path, tool.required) {
            (Some(path), _) => format!("{}", path.display()).green(),
            (None, true) => "missing".red().bold(),
            (None, false) => "missing".yellow(),
        };
        println!("  {:<12} {}", tool.name, status);
    }
    println!("  {:<12} {:?}", "privilege", diag.privilege);
    Ok(diag.is_ready())
}

async fn deploy(state: &AppState, project: Project) -> anyhow::Result<bool> {
    let (queue, worker) = state.spawn_deployer(Box::pin(await_shutdown_signal()));
    let deployment = Deployment::new(&project.name);
    let id = deployment.id.clone();
    let result = queue.deploy(project, deployment).await;
    drop(queue);
    worker.await.context("deployer worker")?;

    if let Some(record) = state.store.get(&id).await? {
        for line in &record.logs {
            println!("{line}");
        }
    }
    let report = result?;
    for (what, outcome) in [("nginx", &report.proxy_config), ("systemd", &report.service_unit)] {
        match outcome {
            PublishOutcome::Applied => println!("{} {}", what, "applied".green()),
            PublishOutcome::Skipped => {}
            PublishOutcome::NotApplied(reason) => {
                println!("{} {}: {}", what, "not applied".yellow(), reason)
            }
            PublishOutcome::Failed(reason) => println!("{} {}: {}", what, "failed".red(), reason),
        }
    }
    let ok = report.status == DeploymentStatus::Success;
    let status = report.status.to_string();
    println!(
        "Deployment {} {}",
        report.deployment_id,
        if ok { status.green().bold() } else { status.red().bold() }
    );
    Ok(ok)
}

async fn remove(state: &AppState, project: Project) -> anyhow::Result<bool> {
    let (queue, worker) = state.spawn_deployer(Box::pin(await_shutdown_signal()));
    let result = queue.remove(project).await;
    drop(queue);
    worker.await.context("deployer worker")?;

    let report = result?;
    if report.success {
        println!("{}", report.message.green());
    } else {
        println!("{}", report.message.red());
    }
    Ok(report.success)
}

async fn list(state: &AppState, project: &Project, subpath: &str) -> anyhow::Result<bool> {
    let entries = state.browser.list_files(project, subpath).await?;
    for entry in entries {
        if entry.is_dir {
            println!("{:>10}  {}/", "-", entry.path.blue().bold());
        } else {
            println!("{:>10}  {}", entry.size, entry.path);
        }
    }
    Ok(true)
}

async fn exec(state: &AppState, project: &Project, command: &str) -> anyhow::Result<bool> {
    let outcome = state.console.run(project, command).await;
    match &outcome {
        ConsoleOutcome::Rejected { reason } | ConsoleOutcome::Busy { reason } => {
            eprintln!("{}", reason.yellow());
        }
        ConsoleOutcome::TimedOut { limit_secs, stdout } => {
            print!("{stdout}");
            eprintln!("{}", format!("Command timed out (max {limit_secs}s).").red());
        }
        ConsoleOutcome::Completed(output) => {
            print!("{}", output.stdout);
            eprint!("{}", output.stderr);
        }
    }
    Ok(outcome.succeeded())
}

async fn history(state: &AppState, project: &Project) -> anyhow::Result<bool> {
    let deployments = state.store.list_for_project(&project.name).await?;
    if deployments.is_empty() {
        println!("No deployments recorded for {}", project.name);
    }
    for d in deployments {
        let status = match d.status {
            DeploymentStatus::Success => d.status.to_string().green(),
            DeploymentStatus::Failed => d.status.to_string().red(),
            _ => d.status.to_string().yellow(),
        };
        let finished = d
            .finished_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<11}  {}  {}",
            d.id,
            status,
            d.created_at.format("%Y-%m-%d %H:%M:%S"),
            finished
        );
    }
    Ok(true)
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (Ok(mut sigterm), Ok(mut sigint)) =
            (signal(SignalKind::terminate()), signal(SignalKind::interrupt()))
        else {
            error!("Failed to install signal handlers");
            return std::future::pending().await;
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, shutting down...");
        } else {
            std::future::pending::<()>().await;
        }
    }
}
