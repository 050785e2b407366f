use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "relay-launcher")]
#[command(version)]
#[command(about = "Launch and supervise the bundled relay network client", long_about = None)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Supervise the relay client in the foreground (Ctrl+C to stop)
    Run {
        /// Restart the client without prompting when it exits
        #[arg(long)]
        auto_restart: bool,
    },

    /// Print the resolved client file locations and the launch policy
    Paths,

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}
