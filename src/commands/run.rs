use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use relay_launcher::appenv::{self, LaunchPolicy};
use relay_launcher::daemon::setup::DEFAULT_UI_EXTENSION;
use relay_launcher::daemon::{
    ClientEvent, Collaborators, ExtensionHost, PostStartSetup, ProviderCoordinator, RestartPrompt,
    TrustStore,
};
use relay_launcher::paths::FileLocator;
use relay_launcher::prefs::LauncherConfig;
use relay_launcher::startup::StartupService;

/// Asks on the controlling terminal whether to restart the exited client.
struct TerminalPrompt;

impl RestartPrompt for TerminalPrompt {
    fn should_restart(&self) -> bool {
        dialoguer::Confirm::new()
            .with_prompt("The relay client exited unexpectedly. Restart it?")
            .default(true)
            .interact()
            .unwrap_or(false)
    }
}

struct AlwaysRestart;

impl RestartPrompt for AlwaysRestart {
    fn should_restart(&self) -> bool {
        true
    }
}

/// Exports the trusted CA under the launcher data directory, standing in for
/// the platform certificate database.
struct FileTrustStore {
    anchor: PathBuf,
}

impl FileTrustStore {
    fn new() -> Self {
        Self {
            anchor: appenv::data_dir().join("trust").join("client-ca.der"),
        }
    }
}

impl TrustStore for FileTrustStore {
    fn is_trusted(&self, der: &[u8]) -> bool {
        std::fs::read(&self.anchor)
            .map(|existing| existing == der)
            .unwrap_or(false)
    }

    fn install(&self, der: &[u8]) -> Result<()> {
        if let Some(parent) = self.anchor.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create trust directory: {}", parent.display())
            })?;
        }
        std::fs::write(&self.anchor, der)
            .with_context(|| format!("Failed to write {}", self.anchor.display()))?;
        Ok(())
    }
}

/// The CLI hosts no extension system.
struct NoExtensions;

impl ExtensionHost for NoExtensions {
    fn has_permissions(&self, _id: &str, _permissions: &[&str]) -> bool {
        true
    }

    fn grant_permissions(&self, _id: &str, _permissions: &[&str]) -> Result<()> {
        Ok(())
    }

    fn is_active(&self, _id: &str) -> bool {
        false
    }

    fn reload(&self, _id: &str) -> Result<()> {
        Ok(())
    }
}

pub async fn cmd_run(auto_restart: bool) -> Result<()> {
    let config = match LauncherConfig::load() {
        Ok(config) => config,
        Err(e) => {
            warn!("Falling back to default preferences: {e:#}");
            LauncherConfig::default()
        }
    };

    let policy = LaunchPolicy::resolve(&config);
    let files = Arc::new(FileLocator::new(&config));
    let prompt: Arc<dyn RestartPrompt> = if auto_restart {
        Arc::new(AlwaysRestart)
    } else {
        Arc::new(TerminalPrompt)
    };
    let setup = Arc::new(PostStartSetup::new(
        Arc::clone(&files),
        Arc::new(FileTrustStore::new()),
        Arc::new(NoExtensions),
        config
            .ui_extension
            .clone()
            .unwrap_or_else(|| DEFAULT_UI_EXTENSION.to_string()),
        policy.post_start_delay,
    ));

    let coordinator = Arc::new(ProviderCoordinator::new(Collaborators {
        policy,
        files,
        setup,
        prompt,
    }));
    let mut events = coordinator.subscribe();

    let startup = StartupService::new(Arc::clone(&coordinator));
    startup.profile_ready();
    coordinator.notify_ui_ready();

    println!("Supervising the relay client (Ctrl+C to stop)");

    loop {
        tokio::select! {
            _ = shutdown_signal() => {
                println!("Shutting down...");
                break;
            }
            event = events.recv() => match event {
                Ok(ClientEvent::Ready) => println!("The relay client is ready."),
                Ok(ClientEvent::Exited { exit_code }) => match exit_code {
                    Some(code) => println!("The relay client exited with code {code}."),
                    None => println!("The relay client was terminated by a signal."),
                },
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    }

    startup.quit_requested().await;
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!("Failed to install the SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
