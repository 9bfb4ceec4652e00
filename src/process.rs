/// Subprocess plumbing: time-bounded ad-hoc command execution (process
/// table queries, directory listings), utility-subprocess launching, and
/// process-group kills. Children are spawned in their own process group
/// (`process_group(0)`) so a kill takes the whole tree down.
use crate::config::ContainerConfig;
use crate::errors::WardenError;
use crate::job::UtilityHandle;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

/// Outcome of a bounded ad-hoc command.
#[derive(Debug)]
pub struct ExecResult {
    /// Exit code; None if the command was killed (signal or timeout).
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Split a shell-ish command string into program + args.
fn split_command(command: &str) -> Result<(String, Vec<String>), WardenError> {
    let mut parts = command.split_whitespace().map(String::from);
    let program = parts.next().ok_or_else(|| WardenError::Spawn {
        command: command.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
    })?;
    Ok((program, parts.collect()))
}

/// Run a command and capture its output, killing it if it exceeds the
/// time limit. Inspection commands must never stall the monitor tick.
pub async fn execute(
    command: &str,
    workdir: Option<&Path>,
    limit: Duration,
) -> Result<ExecResult, WardenError> {
    let (program, args) = split_command(command)?;

    let mut cmd = Command::new(&program);
    cmd.args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .process_group(0);
    if let Some(dir) = workdir {
        cmd.current_dir(dir);
    }

    let child = cmd.spawn().map_err(|e| WardenError::Spawn {
        command: command.to_string(),
        source: e,
    })?;

    match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(ExecResult {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
        Ok(Err(e)) => Err(WardenError::Spawn {
            command: command.to_string(),
            source: e,
        }),
        Err(_) => {
            // kill_on_drop already reaped the child
            tracing::warn!(command, limit_secs = limit.as_secs(), "command timed out");
            Ok(ExecResult {
                exit_code: None,
                stdout: String::new(),
                stderr: format!("command timed out after {} s", limit.as_secs()),
            })
        }
    }
}

/// Kill the process group rooted at `pid`: SIGTERM, a short grace period,
/// then SIGKILL if anything is still alive.
pub async fn kill_processes(pid: u32) {
    let pgid = Pid::from_raw(pid as i32);
    tracing::warn!(pid, "killing payload process group");

    if let Err(e) = killpg(pgid, Signal::SIGTERM) {
        tracing::warn!(pid, error = %e, "SIGTERM failed (process may already be gone)");
        return;
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    // group gone? a second signal to a dead group just errors harmlessly
    if killpg(pgid, Signal::SIGKILL).is_ok() {
        tracing::warn!(pid, "process group survived SIGTERM, sent SIGKILL");
    }
}

/// `UtilityHandle` over a real tokio child process.
pub struct TokioUtilityHandle {
    child: Child,
}

impl UtilityHandle for TokioUtilityHandle {
    fn try_exit_code(&mut self) -> Option<i32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.code().unwrap_or(-1)),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "failed to poll utility subprocess");
                Some(-1)
            }
        }
    }
}

/// Wrap a command in the configured container runtime, when enabled.
pub fn containerize(command: &str, container: &ContainerConfig) -> String {
    if container.enabled && !container.command.is_empty() {
        format!("{} {}", container.command, command)
    } else {
        command.to_string()
    }
}

/// Launch a utility subprocess in the job work dir. The handle is stored
/// in the job's utility record and polled by the supervisor.
pub fn spawn_utility(
    command: &str,
    workdir: &Path,
    container: &ContainerConfig,
) -> Result<Box<dyn UtilityHandle>, WardenError> {
    let full_command = containerize(command, container);
    let (program, args) = split_command(&full_command)?;

    let child = Command::new(&program)
        .args(&args)
        .current_dir(workdir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null())
        .process_group(0)
        .spawn()
        .map_err(|e| WardenError::Spawn {
            command: full_command.clone(),
            source: e,
        })?;

    tracing::info!(command = %full_command, pid = child.id(), "utility subprocess started");
    Ok(Box::new(TokioUtilityHandle { child }))
}
