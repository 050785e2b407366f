use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::appenv;

/// Launcher preferences, stored as TOML.
///
/// Every field is optional; the effective value is env var > preference >
/// built-in default (see `appenv`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LauncherConfig {
    /// Start and own a client process (default true)
    pub start_client: Option<bool>,
    /// Artificial delay in milliseconds before spawning, for slow-launch testing
    pub launch_delay_ms: Option<u64>,
    /// Budget in milliseconds for the post-start certificate wait (default 5000)
    pub post_start_delay_ms: Option<u64>,
    /// Override for the client executable path
    pub client_path: Option<PathBuf>,
    /// Override for the client data directory
    pub repos_path: Option<PathBuf>,
    /// Override for the client CA certificate path
    pub cacert_path: Option<PathBuf>,
    /// Override for the client's working directory
    pub startup_dir: Option<PathBuf>,
    /// Identifier of the UI extension whose permissions are adjusted
    pub ui_extension: Option<String>,
}

impl LauncherConfig {
    /// $RELAY_CONFIG_DIR/launcher.toml or ~/.config/relay/launcher.toml
    pub fn config_path() -> PathBuf {
        appenv::config_dir().join("launcher.toml")
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        tracing::trace!(path = %path.display(), "Loading launcher preferences");

        if !path.exists() {
            tracing::trace!("Preferences file does not exist, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read preferences from {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse preferences from {}", path.display()))?;

        tracing::trace!(
            start_client = ?config.start_client,
            launch_delay_ms = ?config.launch_delay_ms,
            post_start_delay_ms = ?config.post_start_delay_ms,
            "Launcher preferences loaded"
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        tracing::trace!(path = %path.display(), "Saving launcher preferences");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create preferences directory: {}", parent.display())
            })?;
        }

        let content =
            toml::to_string_pretty(self).context("Failed to serialize preferences to TOML")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write preferences to {}", path.display()))?;

        Ok(())
    }
}
