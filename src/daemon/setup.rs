use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::paths::{ClientFileKind, FileLocator, CERT_FILE_NAME};

/// Default identifier of the UI extension shipped with the application.
pub const DEFAULT_UI_EXTENSION: &str = "ui@relay";

/// Permission set granted to the UI extension.
pub const UI_EXTENSION_PERMISSIONS: &[&str] = &["private-browsing"];

const CERT_POLL_INTERVAL: Duration = Duration::from_millis(200);

const PEM_HEADER: &str = "-----BEGIN CERTIFICATE-----";
const PEM_FOOTER: &str = "-----END CERTIFICATE-----";

/// Certificate database of the host platform.
pub trait TrustStore: Send + Sync {
    /// Whether an equivalent certificate is already trusted.
    fn is_trusted(&self, der: &[u8]) -> bool;
    /// Install the certificate as a trusted CA.
    fn install(&self, der: &[u8]) -> Result<()>;
}

/// Extension registry of the host application's UI layer.
pub trait ExtensionHost: Send + Sync {
    fn has_permissions(&self, extension_id: &str, permissions: &[&str]) -> bool;
    fn grant_permissions(&self, extension_id: &str, permissions: &[&str]) -> Result<()>;
    fn is_active(&self, extension_id: &str) -> bool;
    fn reload(&self, extension_id: &str) -> Result<()>;
}

/// One-shot setup tasks run after the client reaches the Running state.
///
/// Neither task may block readiness or fail the launch: every error here is
/// logged and swallowed, and the client counts as started regardless.
pub struct PostStartSetup {
    files: Arc<FileLocator>,
    trust: Arc<dyn TrustStore>,
    extensions: Arc<dyn ExtensionHost>,
    ui_extension: String,
    wait_budget: Duration,
}

impl PostStartSetup {
    pub fn new(
        files: Arc<FileLocator>,
        trust: Arc<dyn TrustStore>,
        extensions: Arc<dyn ExtensionHost>,
        ui_extension: String,
        wait_budget: Duration,
    ) -> Self {
        Self {
            files,
            trust,
            extensions,
            ui_extension,
            wait_budget,
        }
    }

    /// Entry point, spawned by the supervisor after a successful start.
    pub async fn run(&self) {
        self.wait_for_certificate().await;

        if let Err(e) = self.install_root_certificate().await {
            warn!("Unable to install the client CA certificate: {e:#}");
        }
        if let Err(e) = self.adjust_extension_permissions() {
            warn!("Unable to adjust UI extension permissions: {e:#}");
        }
    }

    // The client creates its CA certificate shortly after startup. Poll for
    // the file instead of trusting a fixed delay; the budget bounds how long
    // a client that never writes the file can hold setup back.
    async fn wait_for_certificate(&self) {
        let deadline = tokio::time::Instant::now() + self.wait_budget;
        loop {
            if self.certificate_file().is_some() {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                debug!("Gave up waiting for the client certificate file.");
                return;
            }
            tokio::time::sleep(CERT_POLL_INTERVAL).await;
        }
    }

    fn certificate_file(&self) -> Option<PathBuf> {
        if let Ok(path) = self.files.resolve(ClientFileKind::CaCert) {
            if path.exists() {
                return Some(path);
            }
        }
        for dir in self.files.certificate_candidates() {
            let candidate = dir.join(CERT_FILE_NAME);
            if candidate.exists() {
                return Some(candidate);
            }
        }
        None
    }

    async fn install_root_certificate(&self) -> Result<()> {
        let Some(path) = self.certificate_file() else {
            bail!("certificate file not found");
        };

        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let der = certificate_der(&bytes)
            .with_context(|| format!("failed to decode {}", path.display()))?;

        if self.trust.is_trusted(&der) {
            debug!("The client CA certificate is already trusted.");
            return Ok(());
        }

        self.trust
            .install(&der)
            .with_context(|| format!("trust store rejected {}", path.display()))?;
        info!("Installed the client CA certificate from {}", path.display());
        Ok(())
    }

    fn adjust_extension_permissions(&self) -> Result<()> {
        let id = self.ui_extension.as_str();
        if self.extensions.has_permissions(id, UI_EXTENSION_PERMISSIONS) {
            debug!("UI extension '{id}' already has the required permissions.");
            return Ok(());
        }

        self.extensions.grant_permissions(id, UI_EXTENSION_PERMISSIONS)?;
        if self.extensions.is_active(id) {
            self.extensions.reload(id)?;
        }
        info!("Granted permissions to the UI extension '{id}'.");
        Ok(())
    }
}

/// Normalize certificate bytes to DER, accepting binary DER as-is and
/// decoding base64-armored PEM.
pub fn certificate_der(bytes: &[u8]) -> Result<Vec<u8>> {
    if let Ok(text) = std::str::from_utf8(bytes) {
        if text.contains(PEM_HEADER) {
            return pem_to_der(text);
        }
    }
    Ok(bytes.to_vec())
}

fn pem_to_der(text: &str) -> Result<Vec<u8>> {
    let start = text.find(PEM_HEADER).context("missing PEM header")? + PEM_HEADER.len();
    let end = text.find(PEM_FOOTER).context("missing PEM footer")?;
    if end < start {
        bail!("PEM footer precedes the header");
    }
    let body: String = text[start..end].chars().filter(|c| !c.is_whitespace()).collect();
    BASE64.decode(body.as_bytes()).context("invalid base64 in PEM body")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::LauncherConfig;
    use std::sync::Mutex;

    const FAKE_DER: &[u8] = &[0x30, 0x82, 0x01, 0x0a, 0x02, 0x82];

    struct RecordingTrust {
        trusted: bool,
        installs: Mutex<Vec<Vec<u8>>>,
    }

    impl RecordingTrust {
        fn new(trusted: bool) -> Arc<Self> {
            Arc::new(Self {
                trusted,
                installs: Mutex::new(Vec::new()),
            })
        }
    }

    impl TrustStore for RecordingTrust {
        fn is_trusted(&self, _der: &[u8]) -> bool {
            self.trusted
        }

        fn install(&self, der: &[u8]) -> Result<()> {
            self.installs.lock().unwrap().push(der.to_vec());
            Ok(())
        }
    }

    struct RecordingExtensions {
        granted: bool,
        active: bool,
        grants: Mutex<Vec<String>>,
        reloads: Mutex<Vec<String>>,
    }

    impl RecordingExtensions {
        fn new(granted: bool, active: bool) -> Arc<Self> {
            Arc::new(Self {
                granted,
                active,
                grants: Mutex::new(Vec::new()),
                reloads: Mutex::new(Vec::new()),
            })
        }
    }

    impl ExtensionHost for RecordingExtensions {
        fn has_permissions(&self, _id: &str, _permissions: &[&str]) -> bool {
            self.granted
        }

        fn grant_permissions(&self, id: &str, _permissions: &[&str]) -> Result<()> {
            self.grants.lock().unwrap().push(id.to_string());
            Ok(())
        }

        fn is_active(&self, _id: &str) -> bool {
            self.active
        }

        fn reload(&self, id: &str) -> Result<()> {
            self.reloads.lock().unwrap().push(id.to_string());
            Ok(())
        }
    }

    fn pem_text(der: &[u8]) -> String {
        format!("{PEM_HEADER}\n{}\n{PEM_FOOTER}\n", BASE64.encode(der))
    }

    fn setup_with(
        dir: &std::path::Path,
        trust: Arc<RecordingTrust>,
        extensions: Arc<RecordingExtensions>,
    ) -> PostStartSetup {
        let config = LauncherConfig {
            cacert_path: Some(dir.join(CERT_FILE_NAME)),
            ..Default::default()
        };
        PostStartSetup::new(
            Arc::new(FileLocator::new(&config)),
            trust,
            extensions,
            DEFAULT_UI_EXTENSION.to_string(),
            Duration::ZERO,
        )
    }

    #[test]
    fn der_bytes_pass_through() {
        assert_eq!(certificate_der(FAKE_DER).unwrap(), FAKE_DER);
    }

    #[test]
    fn pem_bytes_are_decoded() {
        let pem = pem_text(FAKE_DER);
        assert_eq!(certificate_der(pem.as_bytes()).unwrap(), FAKE_DER);
    }

    #[test]
    fn truncated_pem_is_rejected() {
        let pem = format!("{PEM_HEADER}\nnot/base64!!\n{PEM_FOOTER}");
        assert!(certificate_der(pem.as_bytes()).is_err());
        assert!(certificate_der(PEM_HEADER.as_bytes()).is_err());
    }

    #[tokio::test]
    async fn certificate_is_installed_once_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CERT_FILE_NAME), pem_text(FAKE_DER)).unwrap();

        let trust = RecordingTrust::new(false);
        let extensions = RecordingExtensions::new(true, false);
        let setup = setup_with(dir.path(), Arc::clone(&trust), extensions);

        setup.run().await;
        assert_eq!(trust.installs.lock().unwrap().as_slice(), &[FAKE_DER.to_vec()]);
    }

    #[tokio::test]
    async fn trusted_certificate_is_not_reinstalled() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CERT_FILE_NAME), pem_text(FAKE_DER)).unwrap();

        let trust = RecordingTrust::new(true);
        let extensions = RecordingExtensions::new(true, false);
        let setup = setup_with(dir.path(), Arc::clone(&trust), extensions);

        setup.run().await;
        assert!(trust.installs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_certificate_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();

        let trust = RecordingTrust::new(false);
        let extensions = RecordingExtensions::new(true, false);
        let setup = setup_with(dir.path(), Arc::clone(&trust), extensions);

        // Logs a warning and keeps going.
        setup.run().await;
        assert!(trust.installs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn permissions_granted_and_active_extension_reloaded() {
        let dir = tempfile::tempdir().unwrap();

        let trust = RecordingTrust::new(true);
        let extensions = RecordingExtensions::new(false, true);
        let setup = setup_with(dir.path(), trust, Arc::clone(&extensions));

        setup.run().await;
        assert_eq!(
            extensions.grants.lock().unwrap().as_slice(),
            &[DEFAULT_UI_EXTENSION.to_string()]
        );
        assert_eq!(
            extensions.reloads.lock().unwrap().as_slice(),
            &[DEFAULT_UI_EXTENSION.to_string()]
        );
    }

    #[tokio::test]
    async fn inactive_extension_is_not_reloaded() {
        let dir = tempfile::tempdir().unwrap();

        let trust = RecordingTrust::new(true);
        let extensions = RecordingExtensions::new(false, false);
        let setup = setup_with(dir.path(), trust, Arc::clone(&extensions));

        setup.run().await;
        assert_eq!(extensions.grants.lock().unwrap().len(), 1);
        assert!(extensions.reloads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn granted_extension_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();

        let trust = RecordingTrust::new(true);
        let extensions = RecordingExtensions::new(true, true);
        let setup = setup_with(dir.path(), trust, Arc::clone(&extensions));

        setup.run().await;
        assert!(extensions.grants.lock().unwrap().is_empty());
        assert!(extensions.reloads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn existing_certificate_skips_the_wait() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CERT_FILE_NAME), FAKE_DER).unwrap();

        let config = LauncherConfig {
            cacert_path: Some(dir.path().join(CERT_FILE_NAME)),
            ..Default::default()
        };
        let setup = PostStartSetup::new(
            Arc::new(FileLocator::new(&config)),
            RecordingTrust::new(true),
            RecordingExtensions::new(true, false),
            DEFAULT_UI_EXTENSION.to_string(),
            Duration::from_secs(30),
        );

        // A generous budget must not delay setup when the file is present.
        tokio::time::timeout(Duration::from_secs(2), setup.run())
            .await
            .unwrap();
    }
}
