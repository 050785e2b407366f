use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::events::ClientEvent;
use super::process::{ClientProcess, OutputLines, ProcessStatus, ProcessWaiter, SpawnError};
use super::setup::PostStartSetup;
use crate::paths::{ClientFileKind, FileLocator, LocateError};

const STATE_LOCK: &str = "supervisor state lock poisoned";

/// Errors surfaced by [`ClientSupervisor::start`].
#[derive(Debug, Error, Clone)]
pub enum StartError {
    /// A client process already exists; treat as a benign no-op.
    #[error("a client process is already running")]
    AlreadyRunning,
    /// A client file could not be resolved.
    #[error(transparent)]
    Locate(#[from] LocateError),
    /// The OS refused to spawn the client.
    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

/// Owns the lifecycle of at most one client process.
///
/// `start` spawns the client and three background tasks: the output drain,
/// the post-start setup, and the exit watcher. The watcher belongs to the
/// generation current at spawn time; a watcher whose generation was
/// superseded never touches supervisor state.
#[derive(Clone)]
pub struct ClientSupervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    files: Arc<FileLocator>,
    launch_delay: Duration,
    setup: Arc<PostStartSetup>,
    events: broadcast::Sender<ClientEvent>,
    state: Mutex<SupervisorState>,
}

#[derive(Default)]
struct SupervisorState {
    process: Option<ClientProcess>,
    status: ProcessStatus,
    generation: u64,
    notify_exit: bool,
}

impl ClientSupervisor {
    pub fn new(
        files: Arc<FileLocator>,
        launch_delay: Duration,
        setup: Arc<PostStartSetup>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                files,
                launch_delay,
                setup,
                events,
                state: Mutex::new(SupervisorState::default()),
            }),
        }
    }

    pub fn status(&self) -> ProcessStatus {
        self.inner.lock_state().status
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock_state().status.is_running()
    }

    /// Start the client process.
    ///
    /// Fails with [`StartError::AlreadyRunning`] when a process exists. The
    /// slot is claimed under the state lock before any await, so concurrent
    /// calls cannot both win.
    pub async fn start(&self) -> Result<(), StartError> {
        {
            let mut state = self.inner.lock_state();
            if state.status.is_running() || state.process.is_some() {
                warn!("Ignoring a request to start a client daemon because one is already running.");
                return Err(StartError::AlreadyRunning);
            }
            state.status = ProcessStatus::Starting;
        }

        let (exe, data_dir, workdir) = match self.locate_files() {
            Ok(files) => files,
            Err(e) => {
                self.inner.lock_state().status = ProcessStatus::Unknown;
                return Err(e.into());
            }
        };

        if !self.inner.launch_delay.is_zero() {
            // Simulates a slow client launch.
            debug!("Delaying the client launch by {:?}", self.inner.launch_delay);
            tokio::time::sleep(self.inner.launch_delay).await;
        }

        let args = vec!["--repo".to_string(), data_dir.display().to_string()];
        info!("Starting {} {:?}", exe.display(), args);

        let mut process = match ClientProcess::spawn(&exe, &args, &workdir) {
            Ok(process) => process,
            Err(e) => {
                error!("Failed to start the client: {e}");
                let mut state = self.inner.lock_state();
                state.status = ProcessStatus::Exited;
                state.process = None;
                return Err(e.into());
            }
        };
        info!("Started a client process (PID {:?})", process.id());

        let output = process.take_output();
        let waiter = process.take_waiter();
        let generation = {
            let mut state = self.inner.lock_state();
            state.generation += 1;
            state.status = ProcessStatus::Running;
            state.notify_exit = true;
            state.process = Some(process);
            state.generation
        };

        if let Some(output) = output {
            tokio::spawn(drain_output(output));
        }

        let setup = Arc::clone(&self.inner.setup);
        tokio::spawn(async move {
            setup.run().await;
        });

        if let Some(waiter) = waiter {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                inner.watch(waiter, generation).await;
            });
        }

        Ok(())
    }

    /// Forget the current process: kill it if present, suppress its exit
    /// notification, and transition to Exited. Callable in any state.
    pub fn forget(&self) {
        let mut state = self.inner.lock_state();
        if let Some(process) = state.process.take() {
            debug!("Forgetting the client process (PID {:?})", process.id());
            process.kill();
        }
        state.notify_exit = false;
        state.status = ProcessStatus::Exited;
    }

    fn locate_files(&self) -> Result<(PathBuf, PathBuf, PathBuf), LocateError> {
        let exe = self.inner.files.resolve(ClientFileKind::Client)?;
        let data_dir = self.inner.files.resolve(ClientFileKind::ReposClient)?;
        let workdir = self.inner.files.resolve(ClientFileKind::StartupDir)?;
        Ok((exe, data_dir, workdir))
    }
}

impl SupervisorInner {
    fn lock_state(&self) -> MutexGuard<'_, SupervisorState> {
        self.state.lock().expect(STATE_LOCK)
    }

    /// Exit watcher for one spawned process.
    async fn watch(self: Arc<Self>, waiter: ProcessWaiter, generation: u64) {
        let exit_code = waiter.wait().await;

        let mut state = self.lock_state();
        if state.generation != generation || !state.notify_exit {
            debug!("A superseded client process exited with code {exit_code:?}.");
            return;
        }

        match exit_code {
            Some(0) => info!("The client process exited."),
            Some(code) => warn!("The watched client process exited with code {code}."),
            None => warn!("The watched client process was terminated by a signal."),
        }

        state.process = None;
        state.status = ProcessStatus::Exited;
        state.notify_exit = false;
        drop(state);

        let _ = self.events.send(ClientEvent::Exited { exit_code });
    }
}

async fn drain_output(mut output: OutputLines) {
    while let Some(line) = output.next_line().await {
        debug!(target: "relay_launcher::client", "{line}");
    }
    debug!("The client output stream closed.");
}
