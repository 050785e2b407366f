//! Supervision of the external relay client daemon.
//!
//! The launcher owns the client process end to end:
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │              ProviderCoordinator                │
//! │  (shared init future, exit-driven retry loop)   │
//! ├─────────────────────────────────────────────────┤
//! │   Provider    │  ClientSupervisor │ PostStart-  │
//! │  (readiness)  │  (state machine)  │ Setup       │
//! ├─────────────────────────────────────────────────┤
//! │         ClientProcess (one OS child)            │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! State transitions are owned by the supervisor; everyone else observes
//! them through the broadcast [`ClientEvent`] channel.

pub mod coordinator;
pub mod events;
pub mod process;
pub mod provider;
pub mod setup;
pub mod supervisor;

pub use coordinator::{
    BuildError, Collaborators, ProviderCoordinator, RestartPrompt, SharedProviderFuture,
};
pub use events::ClientEvent;
pub use process::{ClientProcess, ProcessStatus, SpawnError};
pub use provider::{Provider, ProviderKind};
pub use setup::{ExtensionHost, PostStartSetup, TrustStore};
pub use supervisor::{ClientSupervisor, StartError};

#[cfg(test)]
pub(crate) mod testing {
    use super::setup::{ExtensionHost, PostStartSetup, TrustStore, DEFAULT_UI_EXTENSION};
    use crate::paths::FileLocator;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;

    /// Write an executable shell script standing in for the client binary.
    #[cfg(unix)]
    pub(crate) fn fake_client(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("client");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    struct NullTrustStore;

    impl TrustStore for NullTrustStore {
        fn is_trusted(&self, _der: &[u8]) -> bool {
            true
        }

        fn install(&self, _der: &[u8]) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct NullExtensions;

    impl ExtensionHost for NullExtensions {
        fn has_permissions(&self, _id: &str, _permissions: &[&str]) -> bool {
            true
        }

        fn grant_permissions(&self, _id: &str, _permissions: &[&str]) -> anyhow::Result<()> {
            Ok(())
        }

        fn is_active(&self, _id: &str) -> bool {
            false
        }

        fn reload(&self, _id: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// Post-start setup that never waits and never touches anything.
    pub(crate) fn null_setup(files: Arc<FileLocator>) -> Arc<PostStartSetup> {
        Arc::new(PostStartSetup::new(
            files,
            Arc::new(NullTrustStore),
            Arc::new(NullExtensions),
            DEFAULT_UI_EXTENSION.to_string(),
            Duration::ZERO,
        ))
    }
}
