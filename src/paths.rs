use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::trace;

use crate::appenv;
use crate::prefs::LauncherConfig;

/// File name the client gives the CA certificate it generates.
pub const CERT_FILE_NAME: &str = "ssl-ca-cert.pem";

/// Well-known files belonging to the bundled relay client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientFileKind {
    /// The client executable.
    Client,
    /// The client data directory, passed as `--repo`.
    ReposClient,
    /// The CA certificate the client generates on first start.
    CaCert,
    /// Working directory the client is started from.
    StartupDir,
}

impl ClientFileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientFileKind::Client => "client",
            ClientFileKind::ReposClient => "repos-client",
            ClientFileKind::CaCert => "cacert",
            ClientFileKind::StartupDir => "startup-dir",
        }
    }
}

impl fmt::Display for ClientFileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A client file could not be resolved to an existing path.
#[derive(Debug, Error, Clone)]
#[error("could not locate the {kind} file")]
pub struct LocateError {
    pub kind: ClientFileKind,
}

/// Resolves the client's files from preference overrides or the default
/// bundle layout next to the host executable.
pub struct FileLocator {
    client: Option<PathBuf>,
    repos: Option<PathBuf>,
    cacert: Option<PathBuf>,
    startup_dir: Option<PathBuf>,
    bundle_dir: Option<PathBuf>,
}

impl FileLocator {
    pub fn new(config: &LauncherConfig) -> Self {
        Self {
            client: config.client_path.clone(),
            repos: config.repos_path.clone(),
            cacert: config.cacert_path.clone(),
            startup_dir: config.startup_dir.clone(),
            bundle_dir: default_bundle_dir(),
        }
    }

    /// Resolve a client file.
    ///
    /// An explicitly configured path is always used verbatim, so broken
    /// installations can be repaired through preferences. Default paths are
    /// only returned when they exist.
    pub fn resolve(&self, kind: ClientFileKind) -> Result<PathBuf, LocateError> {
        if let Some(path) = self.override_for(kind) {
            trace!(kind = kind.as_str(), path = %path.display(), "Resolved from preference override");
            return Ok(path.to_path_buf());
        }

        let path = self.default_for(kind).ok_or(LocateError { kind })?;
        if !path.exists() {
            return Err(LocateError { kind });
        }
        trace!(kind = kind.as_str(), path = %path.display(), "Resolved from bundle layout");
        Ok(path)
    }

    /// Ordered fallback directories searched for the CA certificate when the
    /// primary path does not exist.
    pub fn certificate_candidates(&self) -> Vec<PathBuf> {
        let subdir = if cfg!(target_os = "linux") {
            "certificates"
        } else {
            "Certificates"
        };
        vec![
            appenv::data_dir().join(subdir),
            appenv::config_dir().join(subdir),
        ]
    }

    fn override_for(&self, kind: ClientFileKind) -> Option<&Path> {
        match kind {
            ClientFileKind::Client => self.client.as_deref(),
            ClientFileKind::ReposClient => self.repos.as_deref(),
            ClientFileKind::CaCert => self.cacert.as_deref(),
            ClientFileKind::StartupDir => self.startup_dir.as_deref(),
        }
    }

    fn default_for(&self, kind: ClientFileKind) -> Option<PathBuf> {
        let bundle = self.bundle_dir.as_ref()?;
        let path = match kind {
            ClientFileKind::Client => bundle.join(client_binary_name()),
            ClientFileKind::ReposClient => bundle.join("repos").join("client"),
            ClientFileKind::CaCert => bundle.join("repos").join("client").join(CERT_FILE_NAME),
            ClientFileKind::StartupDir => bundle.clone(),
        };
        Some(path)
    }
}

fn client_binary_name() -> &'static str {
    if cfg!(windows) {
        "client.exe"
    } else {
        "client"
    }
}

// The bundle ships the client next to the host executable: inside the app
// bundle on macOS, under client/build elsewhere.
fn default_bundle_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let dir = exe.parent()?.to_path_buf();
    if cfg!(target_os = "macos") {
        Some(dir.join("build"))
    } else {
        Some(dir.join("client").join("build"))
    }
}
