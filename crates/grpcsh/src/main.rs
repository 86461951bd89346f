#![doc = include_str!("../README.md")]

mod session;
mod shell;

use clap::Parser;
use session::config::{CliArgs, SessionConfig};
use shell::Shell;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();

    // Logs go to stderr; stdout belongs to the interactive shell.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = SessionConfig::try_from(args)?;
    tracing::info!(target = %config.target, "connecting");
    let channel = session::channel::connect(&config).await?;

    Shell::new(channel, config).run().await
}
