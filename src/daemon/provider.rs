use tokio::sync::broadcast;
use tracing::{debug, error, info};

use super::coordinator::Collaborators;
use super::events::ClientEvent;
use super::supervisor::{ClientSupervisor, StartError};
use crate::appenv;

/// Which provider implementation backs the application.
///
/// Selected through the $RELAY_PROVIDER environment variable; unknown values
/// fall back to the managed relay client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderKind {
    /// Proxy-only configuration; no client is ever launched.
    None,
    /// The bundled relay client daemon.
    #[default]
    Relay,
}

impl ProviderKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(ProviderKind::None),
            "relay" => Some(ProviderKind::Relay),
            _ => None,
        }
    }

    pub fn from_environment() -> Self {
        appenv::env_opt(appenv::ENV_PROVIDER)
            .and_then(|value| Self::parse(&value))
            .unwrap_or_default()
    }
}

/// Application-facing handle meaning "network functionality is available".
///
/// Backed by a supervised client process when the launch policy says to own
/// one, and by nothing at all otherwise.
pub struct Provider {
    supervisor: Option<ClientSupervisor>,
    events: broadcast::Sender<ClientEvent>,
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("has_supervisor", &self.supervisor.is_some())
            .finish()
    }
}

impl Provider {
    pub(crate) fn new(collab: &Collaborators, events: broadcast::Sender<ClientEvent>) -> Self {
        let supervisor = collab.policy.own_client.then(|| {
            ClientSupervisor::new(
                std::sync::Arc::clone(&collab.files),
                collab.policy.launch_delay,
                std::sync::Arc::clone(&collab.setup),
                events.clone(),
            )
        });
        Self { supervisor, events }
    }

    /// Start the backing client, when there is one, and announce readiness.
    pub(crate) async fn init(&self) -> Result<(), StartError> {
        debug!("Initializing the client provider.");

        if let Some(supervisor) = &self.supervisor {
            supervisor.start().await.map_err(|e| {
                error!("Failed to start the client daemon: {e}");
                e
            })?;
        } else {
            debug!("Not starting a client daemon because we were requested not to.");
        }

        info!("The client provider is ready.");
        let _ = self.events.send(ClientEvent::Ready);
        Ok(())
    }

    /// Relinquish the backing client. Future exits of the old process are
    /// ignored by its supervisor.
    pub(crate) fn uninit(&self) {
        debug!("Uninitializing the client provider.");
        if let Some(supervisor) = &self.supervisor {
            supervisor.forget();
        }
    }

    /// True when this provider launched and owns a client process.
    pub fn owns_client(&self) -> bool {
        self.supervisor.is_some()
    }

    /// True when network functionality is believed available. A provider
    /// without a client to manage always reports true.
    pub fn is_running(&self) -> bool {
        match &self.supervisor {
            Some(supervisor) => supervisor.is_running(),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_kinds() {
        assert_eq!(ProviderKind::parse("none"), Some(ProviderKind::None));
        assert_eq!(ProviderKind::parse("relay"), Some(ProviderKind::Relay));
        assert_eq!(ProviderKind::parse("NONE"), None);
        assert_eq!(ProviderKind::parse("tor"), None);
        assert_eq!(ProviderKind::default(), ProviderKind::Relay);
    }
}
