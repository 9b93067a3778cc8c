//! WorkMate - autonomous job scout entry point.
//!
//! Loads configuration, then polls until interrupted. Any fatal error exits
//! with status 1.

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workmate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "workmate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Agent...");

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: owner={}, mode={:?}, mail={}",
        config.owner,
        config.search_mode,
        if config.mail.is_enabled() { "sendgrid" } else { "log" }
    );

    let mut poller = workmate::build_polling_loop(&config)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            on_signal.cancel();
        }
    });

    poller.run(cancel).await?;
    Ok(())
}
