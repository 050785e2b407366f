mod args;
mod commands;

use args::{Cli, Commands};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { auto_restart } => commands::run::cmd_run(auto_restart).await?,
        Commands::Paths => commands::paths::cmd_paths()?,
        Commands::Completions { shell } => commands::completions::cmd_completions(shell),
    }

    Ok(())
}
