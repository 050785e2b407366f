use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::events::{self, ClientEvent};
use super::provider::{Provider, ProviderKind};
use super::setup::PostStartSetup;
use super::supervisor::StartError;
use crate::appenv::LaunchPolicy;
use crate::paths::FileLocator;

const SLOT_LOCK: &str = "coordinator slot lock poisoned";

/// The shared outcome of one provider initialization. Every `build` caller
/// gets a clone; once settled it never changes.
pub type SharedProviderFuture = Shared<BoxFuture<'static, Result<Arc<Provider>, StartError>>>;

/// Asks the user whether the client should be restarted after an unexpected
/// exit. Implementations may block; the coordinator calls them on the
/// blocking pool.
pub trait RestartPrompt: Send + Sync {
    fn should_restart(&self) -> bool;
}

/// Everything a provider needs, assembled once at the composition root.
pub struct Collaborators {
    pub policy: LaunchPolicy,
    pub files: Arc<FileLocator>,
    pub setup: Arc<PostStartSetup>,
    pub prompt: Arc<dyn RestartPrompt>,
}

/// Errors returned by [`ProviderCoordinator::build`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// The launcher is configured to never own a client.
    #[error("the launcher is configured to use only the proxy functionality")]
    ClientDisabled,
    /// No initialization happened yet, or the provider was lost.
    #[error("the provider has not been initialized or was already uninitialized")]
    NotInitialized,
}

/// Serializes provider initialization and re-initialization.
///
/// Holds the current initialization attempt as a single shared future, so
/// every caller that needs client readiness awaits the same outcome. An exit
/// observer, registered lazily on the first `init` and kept across
/// re-initializations, drives the restart-prompt loop.
pub struct ProviderCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    collaborators: Collaborators,
    events: broadcast::Sender<ClientEvent>,
    current: Mutex<Option<SharedProviderFuture>>,
    init_gate: tokio::sync::Mutex<()>,
    retry_gate: tokio::sync::Mutex<()>,
    exit_observer: Mutex<Option<JoinHandle<()>>>,
    ui_ready: AtomicBool,
}

impl ProviderCoordinator {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                collaborators,
                events: events::channel(),
                current: Mutex::new(None),
                init_gate: tokio::sync::Mutex::new(()),
                retry_gate: tokio::sync::Mutex::new(()),
                exit_observer: Mutex::new(None),
                ui_ready: AtomicBool::new(false),
            }),
        }
    }

    /// Initialize the provider, replacing any previous one.
    ///
    /// Callers do not have to await this themselves: `build` waits for the
    /// initialization and re-raises its error.
    pub async fn init(&self) -> Result<Arc<Provider>, StartError> {
        CoordinatorInner::ensure_exit_observer(&self.inner);
        Arc::clone(&self.inner).init_provider().await
    }

    /// Return the current initialization future unchanged.
    pub fn build(&self) -> Result<SharedProviderFuture, BuildError> {
        let current = self.inner.lock_current().clone();
        match current {
            Some(future) => Ok(future),
            None if self.inner.collaborators.policy.provider_kind == ProviderKind::None => {
                Err(BuildError::ClientDisabled)
            }
            None => Err(BuildError::NotInitialized),
        }
    }

    /// Uninitialize the current provider and stop observing exits. Safe to
    /// call repeatedly.
    pub async fn uninit(&self) {
        if let Some(observer) = self.inner.exit_observer.lock().expect(SLOT_LOCK).take() {
            observer.abort();
        }
        Arc::clone(&self.inner).drop_provider().await;
    }

    /// Mark the UI as able to surface errors. Until then, client exits are
    /// logged but never prompt.
    pub fn notify_ui_ready(&self) {
        self.inner.ui_ready.store(true, Ordering::SeqCst);
    }

    /// Subscribe to readiness and exit events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }
}

impl CoordinatorInner {
    fn lock_current(&self) -> MutexGuard<'_, Option<SharedProviderFuture>> {
        self.current.lock().expect(SLOT_LOCK)
    }

    async fn init_provider(self: Arc<Self>) -> Result<Arc<Provider>, StartError> {
        let _gate = self.init_gate.lock().await;

        // Retire the previous provider before a new one starts; its failures
        // are not ours to surface.
        let previous = self.lock_current().clone();
        if let Some(future) = previous {
            if let Ok(provider) = future.await {
                provider.uninit();
            }
        }

        let provider = Arc::new(Provider::new(&self.collaborators, self.events.clone()));
        let future: SharedProviderFuture = async move {
            provider.init().await?;
            Ok(provider)
        }
        .boxed()
        .shared();

        *self.lock_current() = Some(future.clone());
        future.await
    }

    async fn drop_provider(self: Arc<Self>) {
        let future = self.lock_current().take();
        if let Some(future) = future {
            if let Ok(provider) = future.await {
                provider.uninit();
            }
        }
    }

    /// Register the exit observer task, once.
    fn ensure_exit_observer(inner: &Arc<Self>) {
        let mut slot = inner.exit_observer.lock().expect(SLOT_LOCK);
        if slot.is_some() {
            return;
        }

        let inner = Arc::clone(inner);
        let mut events = inner.events.subscribe();
        *slot = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ClientEvent::Exited { exit_code }) => {
                        let inner = Arc::clone(&inner);
                        tokio::spawn(async move {
                            inner.client_exited(exit_code).await;
                        });
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("The exit observer lagged behind by {missed} events.");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    /// Restart-prompt loop, at most one instance at a time.
    async fn client_exited(self: Arc<Self>, exit_code: Option<i32>) {
        if !self.ui_ready.load(Ordering::SeqCst) {
            warn!(
                "Seen a client exit (code {exit_code:?}), but not doing anything because the UI is not ready yet."
            );
            return;
        }

        let Ok(_gate) = self.retry_gate.try_lock() else {
            debug!("A restart prompt loop is already in progress.");
            return;
        };

        loop {
            let prompt = Arc::clone(&self.collaborators.prompt);
            let restart = tokio::task::spawn_blocking(move || prompt.should_restart())
                .await
                .unwrap_or(false);

            if !restart {
                info!("Restart declined; dropping the current provider.");
                Arc::clone(&self).drop_provider().await;
                return;
            }

            match Arc::clone(&self).init_provider().await {
                Ok(_) => {
                    info!("The client was restarted.");
                    return;
                }
                Err(e) => warn!("Failed to restart the client: {e}"),
            }
        }
    }
}
