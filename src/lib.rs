pub mod config;
pub mod dns;
pub mod error;
pub mod policy;
pub mod simple;
pub mod smtp;

use acton_reactive::prelude::*;
use anyhow::{Context, Result};
use log::{error, info};
use std::sync::Arc;

pub async fn run() -> Result<()> {
    info!(
        "Starting {} v{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let config = match config::Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    let resolver = dns::DnsResolver::from_system_conf().context("Failed to set up DNS resolver")?;
    let services = smtp::Services::new(
        Arc::new(policy::LoggingPolicy::new(&config)),
        Arc::new(resolver),
    );

    let mut runtime = ActonApp::launch_async().await;

    let _smtp_handle = smtp::SmtpListenerState::create(&mut runtime, &config, services).await?;

    // Wait for shutdown signal (SIGTERM/SIGINT)
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping listener...");

    // Cancels the accept loop through the listener's before_stop hook
    runtime.shutdown_all().await?;
    info!("Shutdown complete");

    Ok(())
}
