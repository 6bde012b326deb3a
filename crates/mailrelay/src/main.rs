//! `mailrelay` - HTTP to SMTP relay service.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mailrelay::{AppConfig, AppState, SmtpMailer, router};

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "mailrelay", version, about = "HTTP to SMTP relay")]
struct Cli {
    /// Configuration file (defaults to ./mailrelay.toml when present).
    #[arg(long, env = "MAILRELAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailrelay=info,mailrelay_smtp=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let mailer = SmtpMailer::new(config.smtp.clone()).context("Failed to set up TLS")?;
    info!(
        host = %config.smtp.host,
        port = config.smtp.effective_port(),
        tls = ?config.smtp.tls,
        "Relaying to SMTP server"
    );

    let state = AppState::new(&config, Arc::new(mailer));
    if state.credentials.is_empty() {
        tracing::warn!("No API credentials configured; every request will be refused");
    }
    let app = router(Arc::new(state), config.http.max_body_bytes);

    let listener = TcpListener::bind(config.http.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.http.listen))?;
    info!(addr = %listener.local_addr()?, "Starting mailrelay");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
