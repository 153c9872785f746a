//! External command execution
//!
//! Every command the engine runs goes through [`CommandRunner`], as an argument
//! vector. Only the interactive console asks for a shell, because its input is
//! a shell command line by nature.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::HostError;

/// How long output pipes may stay open after the command exits or is killed
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Pipes close almost at once after the group is killed
const AFTER_KILL_GRACE: Duration = Duration::from_millis(500);

/// A command to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,

    /// Overrides applied on top of the inherited environment
    pub env: Vec<(String, String)>,

    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout: None,
        }
    }

    /// `/bin/sh -c <line>`
    pub fn shell(line: impl Into<String>) -> Self {
        Self::new("/bin/sh").arg("-c").arg(line)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy())
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Wrap in non-interactive `sudo` so a missing password fails fast
    pub fn with_sudo(self) -> Self {
        let mut args = vec!["-n".to_string(), self.program];
        args.extend(self.args);
        Self {
            program: "sudo".to_string(),
            args,
            ..self
        }
    }

    /// Human-readable rendering, for logs only
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub succeeded: bool,
    pub stdout: String,
    pub stderr: String,

    /// -1 when the process never started, timed out, or died from a signal
    pub exit_code: i32,

    pub timed_out: bool,
}

impl CommandOutput {
    pub fn launch_failure(message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            stdout: String::new(),
            stderr: message.into(),
            exit_code: -1,
            timed_out: false,
        }
    }

    pub fn timed_out(limit: Duration, stdout: String) -> Self {
        Self {
            succeeded: false,
            stdout,
            stderr: format!("Command timed out (max {}s).", limit.as_secs()),
            exit_code: -1,
            timed_out: true,
        }
    }

    /// Map onto the error taxonomy
    pub fn into_result(self, spec: &CommandSpec) -> Result<CommandOutput, HostError> {
        if self.succeeded {
            Ok(self)
        } else if self.timed_out {
            Err(HostError::TimeoutFailure {
                command: spec.display(),
                seconds: spec.timeout.map(|t| t.as_secs()).unwrap_or_default(),
            })
        } else {
            Err(HostError::ExecutionFailure {
                command: spec.display(),
                exit_code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs external commands; never returns an error, failures are in the output
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> CommandOutput;
}

/// Production runner backed by `tokio::process`
#[derive(Debug, Default, Clone)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> CommandOutput {
        debug!("Running command: {}", spec.display());

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        // Own process group so a timeout can take down everything the command spawned
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to launch {}: {}", spec.program, e);
                return CommandOutput::launch_failure(format!(
                    "Failed to launch {}: {}",
                    spec.program, e
                ));
            }
        };
        // `Child::id` is gone once the child is reaped; the group outlives it
        let group = child.id();

        let stdout = Capture::start(child.stdout.take());
        let stderr = Capture::start(child.stderr.take());

        let waited = match spec.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
            None => Some(child.wait().await),
        };

        match waited {
            Some(Ok(status)) => {
                let (stdout, stderr) = settle(group, stdout, stderr).await;
                CommandOutput {
                    succeeded: status.success(),
                    stdout,
                    stderr,
                    exit_code: status.code().unwrap_or(-1),
                    timed_out: false,
                }
            }
            Some(Err(e)) => {
                terminate(&mut child, group).await;
                stdout.finish(Duration::ZERO).await;
                stderr.finish(Duration::ZERO).await;
                CommandOutput::launch_failure(format!("Failed to wait for {}: {}", spec.program, e))
            }
            None => {
                let limit = spec.timeout.unwrap_or_default();
                warn!("Command timed out after {:?}: {}", limit, spec.display());
                terminate(&mut child, group).await;
                let stdout = stdout.finish(PIPE_DRAIN_GRACE).await;
                stderr.finish(Duration::ZERO).await;
                CommandOutput::timed_out(limit, stdout)
            }
        }
    }
}

/// One output pipe, read in the background into a buffer that survives the
/// reader task being cancelled
struct Capture {
    buf: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl Capture {
    fn start<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = buf.clone();
        let task = tokio::spawn(async move {
            let Some(mut pipe) = pipe else { return };
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => match sink.lock() {
                        Ok(mut buf) => buf.extend_from_slice(&chunk[..n]),
                        Err(_) => break,
                    },
                }
            }
        });
        Self { buf, task }
    }

    /// Wait up to `grace` for end of stream, then return what was read
    async fn finish(mut self, grace: Duration) -> String {
        if !self.task.is_finished() && tokio::time::timeout(grace, &mut self.task).await.is_err() {
            self.task.abort();
        }
        let bytes = self
            .buf
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Collect output once the command itself has exited.
///
/// Background processes it left behind may still hold the pipes open. They
/// get `PIPE_DRAIN_GRACE` to finish, then the whole group is killed.
async fn settle(group: Option<u32>, mut stdout: Capture, mut stderr: Capture) -> (String, String) {
    let drained = tokio::time::timeout(PIPE_DRAIN_GRACE, async {
        let _ = (&mut stdout.task).await;
        let _ = (&mut stderr.task).await;
    })
    .await
    .is_ok();
    if !drained {
        debug!("Output still open after exit, killing process group {:?}", group);
        kill_group(group);
    }
    (
        stdout.finish(AFTER_KILL_GRACE).await,
        stderr.finish(AFTER_KILL_GRACE).await,
    )
}

fn kill_group(group: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = group {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!("killpg({}) failed: {}", pid, e);
        }
    }
    #[cfg(not(unix))]
    let _ = group;
}

/// Kill the command and its process group, then reap it
async fn terminate(child: &mut Child, group: Option<u32>) {
    kill_group(group);
    if let Err(e) = child.kill().await {
        debug!("kill failed: {}", e);
    }
}
