use anyhow::Result;
use tracing::warn;

use relay_launcher::appenv::LaunchPolicy;
use relay_launcher::paths::{ClientFileKind, FileLocator};
use relay_launcher::prefs::LauncherConfig;

const KINDS: [ClientFileKind; 4] = [
    ClientFileKind::Client,
    ClientFileKind::ReposClient,
    ClientFileKind::CaCert,
    ClientFileKind::StartupDir,
];

pub fn cmd_paths() -> Result<()> {
    let config = match LauncherConfig::load() {
        Ok(config) => config,
        Err(e) => {
            warn!("Falling back to default preferences: {e:#}");
            LauncherConfig::default()
        }
    };
    let policy = LaunchPolicy::resolve(&config);
    let files = FileLocator::new(&config);

    println!("Launch policy:");
    println!("  provider:         {:?}", policy.provider_kind);
    println!("  own client:       {}", policy.own_client);
    println!("  launch delay:     {:?}", policy.launch_delay);
    println!("  post-start delay: {:?}", policy.post_start_delay);
    println!();

    println!("Client files:");
    for kind in KINDS {
        match files.resolve(kind) {
            Ok(path) => println!("  {:<12} {}", kind.as_str(), path.display()),
            Err(_) => println!("  {:<12} (not found)", kind.as_str()),
        }
    }
    println!();

    println!("Preferences file: {}", LauncherConfig::config_path().display());
    Ok(())
}
