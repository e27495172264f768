use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use loom_core::ids::ShellId;

use super::buffer::{drain_readers, spawn_reader, OutputBuffer, SharedBuffer};
use super::path::resolve_working_directory;
use super::signal::{self, KillOutcome};
use super::table::{ExitInfo, Lookup, ShellHandle, ShellTable};
use super::ProcessError;

/// Time allowed for pipes to reach EOF once the process is gone.
const READER_GRACE: Duration = Duration::from_millis(250);
/// Time allowed to reap a child after SIGKILL.
const REAP_GRACE: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    pub shell: String,
    pub default_timeout: Duration,
    pub max_timeout: Duration,
    pub max_output_bytes: usize,
    pub output_poll_timeout: Duration,
    pub finished_retention: usize,
    /// Delay between SIGTERM and SIGKILL for `kill`.
    pub kill_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            shell: "bash".into(),
            default_timeout: Duration::from_millis(30_000),
            max_timeout: Duration::from_millis(600_000),
            max_output_bytes: 1024 * 1024,
            output_poll_timeout: Duration::from_millis(30_000),
            finished_retention: 64,
            kill_grace: Duration::from_secs(2),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct BashRequest {
    pub command: String,
    pub working_directory: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
    pub run_in_background: bool,
}

impl BashRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn background(mut self) -> Self {
        self.run_in_background = true;
        self
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForegroundOutput {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundStarted {
    pub shell_id: ShellId,
    pub pid: u32,
    pub command: String,
    pub working_directory: PathBuf,
    pub completed: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum BashOutcome {
    Foreground(ForegroundOutput),
    Background(BackgroundStarted),
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellOutput {
    pub shell_id: ShellId,
    pub completed: bool,
    #[serde(rename = "still_running")]
    pub still_running: bool,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KillReport {
    pub shell_id: ShellId,
    pub killed: bool,
    pub already_exited: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellSummary {
    pub shell_id: ShellId,
    pub pid: u32,
    pub command: String,
    pub working_directory: PathBuf,
    pub started_at: DateTime<Utc>,
}

enum Ending {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Spawns shell commands and owns the table of background shells.
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    table: Arc<ShellTable>,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let table = Arc::new(ShellTable::new(config.finished_retention));
        Self { config, table }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Requested timeout capped at the maximum; `None` or zero means the default.
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .filter(|t| !t.is_zero())
            .unwrap_or(self.config.default_timeout)
            .min(self.config.max_timeout)
    }

    fn poll_timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or(self.config.output_poll_timeout)
            .min(self.config.max_timeout)
    }

    fn command(&self, command: &str, cwd: &Path, env: &BTreeMap<String, String>) -> Command {
        let mut cmd = Command::new(&self.config.shell);
        cmd.arg("-c")
            .arg(command)
            .current_dir(cwd)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    fn spawn(
        &self,
        request: &BashRequest,
        cwd: &Path,
    ) -> Result<(Child, SharedBuffer, SharedBuffer, Vec<JoinHandle<()>>), ProcessError> {
        let mut child = self
            .command(&request.command, cwd, &request.env)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                shell: self.config.shell.clone(),
                source,
            })?;

        let stdout = OutputBuffer::shared(self.config.max_output_bytes);
        let stderr = OutputBuffer::shared(self.config.max_output_bytes);
        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(spawn_reader(out, Arc::clone(&stdout)));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(spawn_reader(err, Arc::clone(&stderr)));
        }
        Ok((child, stdout, stderr, readers))
    }

    /// Run in the mode the request selects.
    pub async fn bash(
        &self,
        project_root: &Path,
        request: BashRequest,
        cancel: &CancellationToken,
    ) -> Result<BashOutcome, ProcessError> {
        if request.run_in_background {
            self.spawn_background(project_root, request)
                .map(BashOutcome::Background)
        } else {
            self.run_foreground(project_root, request, cancel)
                .await
                .map(BashOutcome::Foreground)
        }
    }

    /// Run to completion. Always returns within the timeout plus reap time.
    pub async fn run_foreground(
        &self,
        project_root: &Path,
        request: BashRequest,
        cancel: &CancellationToken,
    ) -> Result<ForegroundOutput, ProcessError> {
        let cwd = resolve_working_directory(project_root, request.working_directory.as_deref())?;
        let timeout = self.effective_timeout(request.timeout);
        let started = Instant::now();

        let (mut child, stdout, stderr, readers) = self.spawn(&request, &cwd)?;
        let pid = child.id().unwrap_or_default();
        debug!(pid, command = %request.command, cwd = %cwd.display(), "foreground process spawned");

        let ending = tokio::select! {
            status = child.wait() => Ending::Exited(status),
            _ = tokio::time::sleep(timeout) => Ending::TimedOut,
            _ = cancel.cancelled() => Ending::Cancelled,
        };

        match ending {
            Ending::Exited(status) => {
                let status = status?;
                drain_readers(readers, READER_GRACE).await;
                let info = ExitInfo::from_status(&status);
                let duration_ms = started.elapsed().as_millis() as u64;
                debug!(pid, exit_code = ?info.exit_code, duration_ms, "foreground process exited");
                Ok(ForegroundOutput {
                    exit_code: info.exit_code,
                    signal: info.signal,
                    stdout: stdout.lock().text(),
                    stderr: stderr.lock().text(),
                    duration_ms,
                })
            }
            Ending::TimedOut => {
                force_kill(&mut child, pid).await;
                drain_readers(readers, READER_GRACE).await;
                warn!(pid, timeout_ms = timeout.as_millis() as u64, command = %request.command, "foreground process timed out, killed");
                let stdout = stdout.lock().text();
                let stderr = stderr.lock().text();
                Err(ProcessError::Timeout {
                    timeout,
                    stdout,
                    stderr,
                })
            }
            Ending::Cancelled => {
                force_kill(&mut child, pid).await;
                drain_readers(readers, READER_GRACE).await;
                debug!(pid, "foreground process cancelled, killed");
                Err(ProcessError::Cancelled)
            }
        }
    }

    /// Spawn detached and return at once. The shell is registered before this returns.
    pub fn spawn_background(
        &self,
        project_root: &Path,
        request: BashRequest,
    ) -> Result<BackgroundStarted, ProcessError> {
        let cwd = resolve_working_directory(project_root, request.working_directory.as_deref())?;
        let (child, stdout, stderr, readers) = self.spawn(&request, &cwd)?;
        let pid = child.id().unwrap_or_default();

        let (exit_tx, exit_rx) = watch::channel(None);
        let kill_switch = CancellationToken::new();
        let handle = Arc::new(ShellHandle {
            shell_id: ShellId::new(),
            pid,
            command: request.command.clone(),
            working_directory: cwd.clone(),
            started_at: Utc::now(),
            stdout,
            stderr,
            exit: exit_rx,
            kill_switch: kill_switch.clone(),
        });
        let shell_id = handle.shell_id.clone();
        self.table.register(handle);

        tokio::spawn(monitor(
            child,
            readers,
            exit_tx,
            kill_switch,
            Arc::clone(&self.table),
            shell_id.clone(),
        ));

        info!(shell_id = %shell_id, pid, command = %request.command, "background shell started");
        Ok(BackgroundStarted {
            shell_id,
            pid,
            command: request.command,
            working_directory: cwd,
            completed: false,
        })
    }

    /// Wait up to `timeout` for the shell to exit. A completed result
    /// deregisters the shell; a timeout leaves it registered for further polls.
    pub async fn output(
        &self,
        shell_id: &ShellId,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ShellOutput, ProcessError> {
        let handle = match self.table.lookup(shell_id) {
            None => return Err(ProcessError::UnknownShell(shell_id.clone())),
            Some(Lookup::Finished(handle)) => {
                self.table.collect(shell_id);
                return Ok(snapshot(&handle, handle.exit_info()));
            }
            Some(Lookup::Running(handle)) => handle,
        };

        let timeout = self.poll_timeout(timeout);
        let exited = tokio::select! {
            res = tokio::time::timeout(timeout, handle.wait_exit()) => res.ok(),
            _ = cancel.cancelled() => return Err(ProcessError::Cancelled),
        };

        if exited.is_some() {
            self.table.collect(shell_id);
            debug!(shell_id = %shell_id, "background shell collected");
        }
        Ok(snapshot(&handle, exited))
    }

    /// SIGTERM the shell's group and deregister it. Escalates to SIGKILL
    /// if the group is still alive after `kill_grace`.
    pub async fn kill(&self, shell_id: &ShellId) -> Result<KillReport, ProcessError> {
        let Some(handle) = self.table.take_running(shell_id) else {
            return match self.table.take_finished(shell_id) {
                Some(_) => Ok(KillReport {
                    shell_id: shell_id.clone(),
                    killed: false,
                    already_exited: true,
                }),
                None => Err(ProcessError::UnknownShell(shell_id.clone())),
            };
        };

        if handle.exit_info().is_some() || handle.terminate() == KillOutcome::NotRunning {
            return Ok(KillReport {
                shell_id: shell_id.clone(),
                killed: false,
                already_exited: true,
            });
        }

        info!(shell_id = %shell_id, pid = handle.pid, "background shell terminated");
        let grace = self.config.kill_grace;
        tokio::spawn(async move {
            if tokio::time::timeout(grace, handle.wait_exit()).await.is_err() {
                warn!(shell_id = %handle.shell_id, pid = handle.pid, "shell ignored SIGTERM, sending SIGKILL");
                handle.force_kill();
            }
        });

        Ok(KillReport {
            shell_id: shell_id.clone(),
            killed: true,
            already_exited: false,
        })
    }

    /// Running background shells, oldest first.
    pub fn list(&self) -> Vec<ShellSummary> {
        self.table
            .running()
            .into_iter()
            .map(|h| ShellSummary {
                shell_id: h.shell_id.clone(),
                pid: h.pid,
                command: h.command.clone(),
                working_directory: h.working_directory.clone(),
                started_at: h.started_at,
            })
            .collect()
    }

    pub fn is_running(&self, shell_id: &ShellId) -> bool {
        self.table.is_running(shell_id)
    }

    /// Shutdown hook: SIGTERM every running shell and empty the table.
    /// Individual signalling failures are logged and skipped.
    pub fn cleanup(&self) -> usize {
        let handles = self.table.drain();
        for handle in &handles {
            if let Err(e) = signal::terminate_group(handle.pid) {
                debug!(shell_id = %handle.shell_id, pid = handle.pid, error = %e, "cleanup signal failed");
                handle.kill_switch.cancel();
            }
        }
        if !handles.is_empty() {
            info!(count = handles.len(), "background shells terminated on cleanup");
        }
        handles.len()
    }
}

fn snapshot(handle: &ShellHandle, exit: Option<ExitInfo>) -> ShellOutput {
    ShellOutput {
        shell_id: handle.shell_id.clone(),
        completed: exit.is_some(),
        still_running: exit.is_none(),
        exit_code: exit.and_then(|e| e.exit_code),
        signal: exit.and_then(|e| e.signal),
        stdout: handle.stdout_text(),
        stderr: handle.stderr_text(),
    }
}

async fn force_kill(child: &mut Child, pid: u32) {
    if let Err(e) = signal::kill_group(pid) {
        debug!(pid, error = %e, "SIGKILL to process group failed, killing child directly");
        let _ = child.start_kill();
    }
    if tokio::time::timeout(REAP_GRACE, child.wait()).await.is_err() {
        warn!(pid, "child not reaped after SIGKILL");
    }
}

/// Owns a background child until it exits, then records the exit.
async fn monitor(
    mut child: Child,
    readers: Vec<JoinHandle<()>>,
    exit_tx: watch::Sender<Option<ExitInfo>>,
    kill_switch: CancellationToken,
    table: Arc<ShellTable>,
    shell_id: ShellId,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_switch.cancelled() => {
            let _ = child.start_kill();
            child.wait().await
        }
    };
    drain_readers(readers, READER_GRACE).await;

    let info = match status {
        Ok(status) => ExitInfo::from_status(&status),
        Err(e) => {
            warn!(shell_id = %shell_id, error = %e, "failed to wait on background shell");
            ExitInfo::default()
        }
    };
    let retained = table.record_exit(&shell_id, &exit_tx, info);
    debug!(shell_id = %shell_id, exit_code = ?info.exit_code, signal = ?info.signal, retained, "background shell exited");
}
