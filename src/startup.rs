use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::daemon::ProviderCoordinator;

/// Binds provider initialization to the host application's lifecycle.
pub struct StartupService {
    coordinator: Arc<ProviderCoordinator>,
    initialized: AtomicBool,
}

impl StartupService {
    pub fn new(coordinator: Arc<ProviderCoordinator>) -> Self {
        Self {
            coordinator,
            initialized: AtomicBool::new(false),
        }
    }

    /// Called once the profile is available.
    ///
    /// The init itself is not awaited: anything that needs the provider
    /// blocks on `build()` instead, which re-raises initialization errors.
    pub fn profile_ready(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Profile is ready; initializing the provider.");

        let coordinator = Arc::clone(&self.coordinator);
        tokio::spawn(async move {
            if let Err(e) = coordinator.init().await {
                warn!("Provider initialization failed: {e}");
            }
        });
    }

    /// Called when the application was granted permission to quit.
    pub async fn quit_requested(&self) {
        debug!("Quit requested; uninitializing the provider.");
        self.coordinator.uninit().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appenv::LaunchPolicy;
    use crate::daemon::testing::null_setup;
    use crate::daemon::{ClientEvent, Collaborators, ProviderKind, RestartPrompt};
    use crate::paths::FileLocator;
    use crate::prefs::LauncherConfig;
    use std::time::Duration;
    use tokio::time::timeout;

    struct NeverRestart;

    impl RestartPrompt for NeverRestart {
        fn should_restart(&self) -> bool {
            false
        }
    }

    fn non_owning_coordinator() -> Arc<ProviderCoordinator> {
        let files = Arc::new(FileLocator::new(&LauncherConfig::default()));
        let setup = null_setup(Arc::clone(&files));
        Arc::new(ProviderCoordinator::new(Collaborators {
            policy: LaunchPolicy {
                provider_kind: ProviderKind::Relay,
                own_client: false,
                launch_delay: Duration::ZERO,
                post_start_delay: Duration::ZERO,
            },
            files,
            setup,
            prompt: Arc::new(NeverRestart),
        }))
    }

    #[tokio::test]
    async fn profile_ready_initializes_exactly_once() {
        let coordinator = non_owning_coordinator();
        let mut events = coordinator.subscribe();
        let startup = StartupService::new(Arc::clone(&coordinator));

        startup.profile_ready();
        startup.profile_ready();

        assert_eq!(
            timeout(Duration::from_secs(2), events.recv()).await.unwrap().unwrap(),
            ClientEvent::Ready
        );
        // The second call must not have started another initialization.
        assert!(timeout(Duration::from_millis(300), events.recv()).await.is_err());
        assert!(coordinator.build().is_ok());
    }

    #[tokio::test]
    async fn quit_uninitializes_the_provider() {
        let coordinator = non_owning_coordinator();
        let startup = StartupService::new(Arc::clone(&coordinator));

        startup.profile_ready();
        // Wait for the fire-and-forget init to land.
        while coordinator.build().is_err() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        startup.quit_requested().await;
        assert!(coordinator.build().is_err());
    }
}
