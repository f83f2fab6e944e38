//! certstore binary entry point
//!
//! Runs one storage command against the configured bucket.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use certstore_storage::{CancellationToken, ObjectStorage};

mod cli;
mod commands;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Logs go to stderr so command output stays pipeable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "certstore=info,certstore_storage=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = cli.storage_config()?;

    tracing::debug!(bucket = %config.bucket, region = %config.region, "Connecting to storage");
    let storage = ObjectStorage::connect(&config).await?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, shutting down");
                shutdown.cancel();
            }
        });
    }

    let mut stdout = std::io::stdout();
    commands::execute(&storage, cli.command, &shutdown, &mut stdout).await?;

    Ok(())
}
