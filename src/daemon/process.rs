use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Lifecycle of one spawned client process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessStatus {
    /// No process has been spawned yet.
    #[default]
    Unknown,
    /// A spawn is in flight.
    Starting,
    /// The process is running.
    Running,
    /// The process terminated, by itself or by a kill.
    Exited,
}

impl ProcessStatus {
    /// Check if the process is in a running state
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessStatus::Starting | ProcessStatus::Running)
    }

    /// Get human-readable state name
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Unknown => "unknown",
            ProcessStatus::Starting => "starting",
            ProcessStatus::Running => "running",
            ProcessStatus::Exited => "exited",
        }
    }
}

/// The OS refused to start the client executable.
#[derive(Debug, Error, Clone)]
#[error("failed to spawn {}: {source}", path.display())]
pub struct SpawnError {
    pub path: PathBuf,
    #[source]
    pub source: Arc<io::Error>,
}

/// Handle for one spawned client process.
///
/// The child itself lives inside the [`ProcessWaiter`], which exactly one
/// watcher takes and awaits. Kill requests travel over a channel, so
/// `kill` never contends with the watcher's `wait`. Dropping the handle
/// also relinquishes the process.
pub struct ClientProcess {
    pid: Option<u32>,
    kill_tx: watch::Sender<bool>,
    waiter: Option<ProcessWaiter>,
    output: Option<OutputLines>,
}

impl std::fmt::Debug for ClientProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientProcess")
            .field("pid", &self.pid)
            .field("has_waiter", &self.waiter.is_some())
            .field("has_output", &self.output.is_some())
            .finish()
    }
}

impl ClientProcess {
    /// Spawn the client with the given arguments and working directory.
    ///
    /// On failure the handle holds no process.
    pub fn spawn(program: &Path, args: &[String], workdir: &Path) -> Result<Self, SpawnError> {
        debug!("Spawning {} {:?} (cwd: {})", program.display(), args, workdir.display());

        let mut child = Command::new(program)
            .args(args)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SpawnError {
                path: program.to_path_buf(),
                source: Arc::new(e),
            })?;

        let output = OutputLines {
            stdout: child.stdout.take().map(|s| BufReader::new(s).lines()),
            stderr: child.stderr.take().map(|s| BufReader::new(s).lines()),
        };
        let (kill_tx, kill_rx) = watch::channel(false);
        let pid = child.id();

        Ok(Self {
            pid,
            kill_tx,
            waiter: Some(ProcessWaiter { child, kill_rx }),
            output: Some(output),
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Request immediate termination. Idempotent; `wait` on the waiter half
    /// resolves once the process is gone.
    pub fn kill(&self) {
        let _ = self.kill_tx.send(true);
    }

    /// Take the exit-waiter half. Yields `Some` exactly once, which is the
    /// "one watcher per process" rule.
    pub fn take_waiter(&mut self) -> Option<ProcessWaiter> {
        self.waiter.take()
    }

    /// Take the combined output stream. Yields `Some` exactly once.
    pub fn take_output(&mut self) -> Option<OutputLines> {
        self.output.take()
    }
}

/// Exit-waiter half of a [`ClientProcess`]; owns the OS child.
pub struct ProcessWaiter {
    child: Child,
    kill_rx: watch::Receiver<bool>,
}

impl ProcessWaiter {
    /// Suspend until the process terminates by any means. Returns the exit
    /// code, or `None` when the process died to a signal.
    pub async fn wait(mut self) -> Option<i32> {
        let status = tokio::select! {
            status = self.child.wait() => status,
            _ = kill_requested(&mut self.kill_rx) => {
                if let Err(e) = self.child.start_kill() {
                    debug!("Kill request for an already-reaped process: {e}");
                }
                self.child.wait().await
            }
        };

        match status {
            Ok(status) => status.code(),
            Err(e) => {
                warn!("Failed to wait for the client process: {e}");
                None
            }
        }
    }
}

async fn kill_requested(rx: &mut watch::Receiver<bool>) {
    // Err means the handle was dropped, which also relinquishes the process.
    let _ = rx.wait_for(|requested| *requested).await;
}

/// Lazy line sequence over a process's combined stdout/stderr.
pub struct OutputLines {
    stdout: Option<Lines<BufReader<ChildStdout>>>,
    stderr: Option<Lines<BufReader<ChildStderr>>>,
}

enum Step {
    Stdout(io::Result<Option<String>>),
    Stderr(io::Result<Option<String>>),
}

impl OutputLines {
    /// Next line from either stream; `None` once both have closed.
    pub async fn next_line(&mut self) -> Option<String> {
        loop {
            let step = match (self.stdout.as_mut(), self.stderr.as_mut()) {
                (Some(out), Some(err)) => tokio::select! {
                    line = out.next_line() => Step::Stdout(line),
                    line = err.next_line() => Step::Stderr(line),
                },
                (Some(out), None) => Step::Stdout(out.next_line().await),
                (None, Some(err)) => Step::Stderr(err.next_line().await),
                (None, None) => return None,
            };

            match step {
                Step::Stdout(Ok(Some(line))) | Step::Stderr(Ok(Some(line))) => {
                    return Some(line);
                }
                Step::Stdout(_) => self.stdout = None,
                Step::Stderr(_) => self.stderr = None,
            }
        }
    }
}
