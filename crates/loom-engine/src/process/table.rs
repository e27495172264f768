use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use loom_core::ids::ShellId;

use super::buffer::SharedBuffer;
use super::signal::{self, KillOutcome};

/// How a process ended. Both fields are `None` when the status was unobtainable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitInfo {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn from_status(status: &std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;
        Self {
            exit_code: status.code(),
            signal,
        }
    }
}

/// A background shell. The monitor task owns the child; the handle only observes it.
#[derive(Debug)]
pub struct ShellHandle {
    pub shell_id: ShellId,
    pub pid: u32,
    pub command: String,
    pub working_directory: PathBuf,
    pub started_at: DateTime<Utc>,
    pub(crate) stdout: SharedBuffer,
    pub(crate) stderr: SharedBuffer,
    pub(crate) exit: watch::Receiver<Option<ExitInfo>>,
    /// Asks the monitor to kill the child directly when group signalling fails.
    pub(crate) kill_switch: CancellationToken,
}

impl ShellHandle {
    pub fn exit_info(&self) -> Option<ExitInfo> {
        *self.exit.borrow()
    }

    pub fn stdout_text(&self) -> String {
        self.stdout.lock().text()
    }

    pub fn stderr_text(&self) -> String {
        self.stderr.lock().text()
    }

    /// Resolves once the monitor has recorded an exit.
    pub async fn wait_exit(&self) -> ExitInfo {
        let mut rx = self.exit.clone();
        let result = rx.wait_for(Option::is_some).await.map(|info| *info);
        result.ok().flatten().unwrap_or_default()
    }

    pub fn terminate(&self) -> KillOutcome {
        self.signal_or_fallback(signal::terminate_group(self.pid), "SIGTERM")
    }

    pub fn force_kill(&self) -> KillOutcome {
        self.signal_or_fallback(signal::kill_group(self.pid), "SIGKILL")
    }

    fn signal_or_fallback(&self, result: std::io::Result<KillOutcome>, name: &str) -> KillOutcome {
        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(shell_id = %self.shell_id, pid = self.pid, error = %e, "{name} to process group failed, killing child directly");
                self.kill_switch.cancel();
                KillOutcome::Signalled
            }
        }
    }
}

pub enum Lookup {
    Running(Arc<ShellHandle>),
    Finished(Arc<ShellHandle>),
}

#[derive(Default)]
struct Inner {
    running: HashMap<ShellId, Arc<ShellHandle>>,
    finished: HashMap<ShellId, Arc<ShellHandle>>,
    finished_order: VecDeque<ShellId>,
}

/// Background shells, keyed by id. A shell leaves `running` exactly once:
/// through its exit ([`ShellTable::record_exit`]), a kill, or cleanup.
/// Exited shells nobody collected yet wait in a bounded `finished` set.
pub struct ShellTable {
    inner: Mutex<Inner>,
    retention: usize,
}

impl ShellTable {
    pub fn new(retention: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            retention,
        }
    }

    pub fn register(&self, handle: Arc<ShellHandle>) {
        self.inner.lock().running.insert(handle.shell_id.clone(), handle);
    }

    pub fn lookup(&self, shell_id: &ShellId) -> Option<Lookup> {
        let inner = self.inner.lock();
        if let Some(h) = inner.running.get(shell_id) {
            return Some(Lookup::Running(Arc::clone(h)));
        }
        inner
            .finished
            .get(shell_id)
            .map(|h| Lookup::Finished(Arc::clone(h)))
    }

    pub fn is_running(&self, shell_id: &ShellId) -> bool {
        self.inner.lock().running.contains_key(shell_id)
    }

    pub fn take_running(&self, shell_id: &ShellId) -> Option<Arc<ShellHandle>> {
        self.inner.lock().running.remove(shell_id)
    }

    pub fn take_finished(&self, shell_id: &ShellId) -> Option<Arc<ShellHandle>> {
        let mut inner = self.inner.lock();
        let handle = inner.finished.remove(shell_id)?;
        inner.finished_order.retain(|id| id != shell_id);
        Some(handle)
    }

    /// Drop every trace of a shell whose result has been delivered.
    pub fn collect(&self, shell_id: &ShellId) -> bool {
        let mut inner = self.inner.lock();
        let running = inner.running.remove(shell_id).is_some();
        let finished = inner.finished.remove(shell_id).is_some();
        if finished {
            inner.finished_order.retain(|id| id != shell_id);
        }
        running || finished
    }

    /// Publish the exit and retire the shell in one critical section, so a
    /// poller never sees it gone from `running` without an exit recorded.
    /// Returns whether the shell was still registered.
    pub(crate) fn record_exit(
        &self,
        shell_id: &ShellId,
        exit_tx: &watch::Sender<Option<ExitInfo>>,
        info: ExitInfo,
    ) -> bool {
        let mut inner = self.inner.lock();
        exit_tx.send_replace(Some(info));
        let Some(handle) = inner.running.remove(shell_id) else {
            return false;
        };
        if self.retention == 0 {
            return true;
        }
        inner.finished.insert(shell_id.clone(), handle);
        inner.finished_order.push_back(shell_id.clone());
        while inner.finished.len() > self.retention {
            let Some(oldest) = inner.finished_order.pop_front() else {
                break;
            };
            inner.finished.remove(&oldest);
        }
        true
    }

    /// Running shells, oldest first.
    pub fn running(&self) -> Vec<Arc<ShellHandle>> {
        let mut handles: Vec<_> = self.inner.lock().running.values().cloned().collect();
        handles.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.shell_id.cmp(&b.shell_id))
        });
        handles
    }

    /// Empty the table, returning the shells that were still running.
    pub fn drain(&self) -> Vec<Arc<ShellHandle>> {
        let mut inner = self.inner.lock();
        inner.finished.clear();
        inner.finished_order.clear();
        inner.running.drain().map(|(_, h)| h).collect()
    }
}
