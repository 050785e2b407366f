use std::path::PathBuf;
use std::time::Duration;

use crate::daemon::provider::ProviderKind;
use crate::prefs::LauncherConfig;

pub const ENV_PROVIDER: &str = "RELAY_PROVIDER";
pub const ENV_SKIP_LAUNCH: &str = "RELAY_SKIP_LAUNCH";
pub const ENV_CONFIG_DIR: &str = "RELAY_CONFIG_DIR";
pub const ENV_LAUNCH_DELAY_MS: &str = "RELAY_LAUNCH_DELAY_MS";
pub const ENV_POST_START_DELAY_MS: &str = "RELAY_POST_START_DELAY_MS";

const RELAY_SUBDIR: &str = "relay";
const FALLBACK_CONFIG_DIR: &str = "~/.config";
const DEFAULT_POST_START_DELAY_MS: u64 = 5000;

/// Effective launch policy, resolved once at the composition root and passed
/// by value to the coordinator.
#[derive(Debug, Clone, Copy)]
pub struct LaunchPolicy {
    /// Which provider implementation backs the application.
    pub provider_kind: ProviderKind,
    /// Whether the launcher starts and owns a client process.
    pub own_client: bool,
    /// Artificial delay before spawning the client.
    pub launch_delay: Duration,
    /// Budget for the post-start certificate readiness wait.
    pub post_start_delay: Duration,
}

impl LaunchPolicy {
    /// Resolve from the environment and preferences (env wins).
    pub fn resolve(config: &LauncherConfig) -> Self {
        let policy = Self {
            provider_kind: ProviderKind::from_environment(),
            own_client: should_own_client(config),
            launch_delay: launch_delay(config),
            post_start_delay: post_start_delay(config),
        };
        tracing::trace!(?policy, "Resolved launch policy");
        policy
    }
}

pub(crate) fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// "0", "false", "no" and "off" (any case) are false, everything else true.
pub fn is_truthy(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}

/// Launcher config directory ($RELAY_CONFIG_DIR or ~/.config/relay)
pub fn config_dir() -> PathBuf {
    let dir = env_opt(ENV_CONFIG_DIR).map(PathBuf::from).unwrap_or_else(|| {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(FALLBACK_CONFIG_DIR))
            .join(RELAY_SUBDIR)
    });
    tracing::trace!(dir = %dir.display(), "Resolved config directory");
    dir
}

/// Launcher data directory (~/.local/share/relay)
pub fn data_dir() -> PathBuf {
    let dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join(RELAY_SUBDIR);
    tracing::trace!(dir = %dir.display(), "Resolved data directory");
    dir
}

/// Whether the launcher should start and own a client process.
///
/// $RELAY_SKIP_LAUNCH disables launching when truthy, $RELAY_PROVIDER=none
/// disables it entirely; otherwise the `start_client` preference decides
/// (default true).
pub fn should_own_client(config: &LauncherConfig) -> bool {
    if let Some(value) = env_opt(ENV_SKIP_LAUNCH) {
        let skip = is_truthy(&value);
        tracing::trace!(skip = skip, "RELAY_SKIP_LAUNCH env var");
        return !skip;
    }
    if let Some(value) = env_opt(ENV_PROVIDER) {
        if ProviderKind::parse(&value) == Some(ProviderKind::None) {
            tracing::trace!("RELAY_PROVIDER=none disables the client");
            return false;
        }
    }
    config.start_client.unwrap_or(true)
}

/// Artificial launch delay ($RELAY_LAUNCH_DELAY_MS > pref > 0).
pub fn launch_delay(config: &LauncherConfig) -> Duration {
    let ms = env_opt(ENV_LAUNCH_DELAY_MS)
        .and_then(|v| v.parse().ok())
        .or(config.launch_delay_ms)
        .unwrap_or(0);
    tracing::trace!(ms = ms, "Launch delay");
    Duration::from_millis(ms)
}

/// Certificate wait budget ($RELAY_POST_START_DELAY_MS > pref > 5000 ms).
pub fn post_start_delay(config: &LauncherConfig) -> Duration {
    let ms = env_opt(ENV_POST_START_DELAY_MS)
        .and_then(|v| v.parse().ok())
        .or(config.post_start_delay_ms)
        .unwrap_or(DEFAULT_POST_START_DELAY_MS);
    tracing::trace!(ms = ms, "Post-start delay budget");
    Duration::from_millis(ms)
}
