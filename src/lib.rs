pub mod appenv;
pub mod daemon;
pub mod paths;
pub mod prefs;
pub mod startup;

pub use daemon::{BuildError, ClientEvent, ProviderCoordinator, StartError};
pub use startup::StartupService;
