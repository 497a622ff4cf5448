//! Vault Unseal Controller
//!
//! Watches Vault server pods and unseals each replica once it is running.
//!
//! Every Vault replica starts sealed after a restart. This controller submits
//! the configured unseal key shares to each new replica, in order, until it
//! reports itself unsealed. Several controller replicas can run side by side;
//! each one owns a deterministic shard of the Vault pods.

mod backoff;
mod config;
mod controller;
mod error;
mod ingest;
mod keys;
mod logging;
mod metrics;
mod pod;
mod prober;
mod readiness;
mod reconciler;
mod scheduler;
mod sequencer;
mod server;
mod shard;
mod task;
mod watcher;

#[cfg(test)]
mod pipeline_test;
#[cfg(test)]
mod test_utils;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    // Logging first, so configuration loading can report fallbacks
    logging::init(config::log_format_from_env()?);
    let config = ControllerConfig::from_env()?;

    // Configure rustls crypto provider before creating the Kubernetes client
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls crypto provider already installed");
    }

    info!("Starting Vault Unseal Controller");
    info!("Configuration:");
    info!("  Vault namespace: {}", config.namespace);
    info!("  Target service: {}", config.target_service);
    info!("  Deployed namespace: {}", config.deployed_namespace);
    info!("  Unseal keys: {}", config.keys.len());
    info!("  Workers: {}", config.workers);
    info!("  Shard: {}/{}", config.shard.index, config.shard.count);
    info!("  Log format: {}", config.log_format);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            cancel.cancel();
        });
    }

    // Initialize and run controller
    let controller = Controller::new(config, cancel).await?;
    controller.run().await?;

    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => info!(signal = "SIGTERM", "Received shutdown signal"),
                _ = sigint.recv() => info!(signal = "SIGINT", "Received shutdown signal"),
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "Failed to install signal handlers, falling back to Ctrl+C");
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!(signal = "SIGINT", "Received shutdown signal"),
        Err(e) => {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}
