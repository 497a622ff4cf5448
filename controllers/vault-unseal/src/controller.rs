//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the pod watcher,
//! the task scheduler and the metrics server together and runs them until
//! shutdown.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::ingest::Ingestor;
use crate::metrics::Metrics;
use crate::readiness::KubePodSource;
use crate::reconciler::Reconciler;
use crate::scheduler::Scheduler;
use crate::server::{ServerState, start_server};
use crate::shard::{HashShard, ShardFilter};
use crate::watcher::PodWatcher;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use vault_client::VaultClient;

/// Main controller for Vault unsealing.
#[derive(Debug)]
pub struct Controller {
    watcher: JoinHandle<Result<(), ControllerError>>,
    scheduler: JoinHandle<()>,
    server: JoinHandle<()>,
    cancel: CancellationToken,
}

impl Controller {
    /// Creates a new controller instance and starts its background tasks.
    pub async fn new(config: ControllerConfig, cancel: CancellationToken) -> Result<Self, ControllerError> {
        info!("Initializing Vault Unseal Controller");

        // Create Kubernetes client
        let kube_client = Client::try_default().await?;

        let vault_client = VaultClient::new(config.vault_timeout)?;
        let metrics = Arc::new(Metrics::new()?);
        let shard: Arc<dyn ShardFilter> = Arc::new(HashShard::new(config.shard));

        let (scheduler, queue) = Scheduler::new(
            config.max_tracked,
            config.retry,
            cancel.clone(),
            Arc::clone(&metrics),
        );

        let reconciler = Arc::new(Reconciler::new(
            config.namespace.clone(),
            Arc::clone(&shard),
            Arc::new(KubePodSource::new(kube_client.clone())),
            Arc::new(vault_client),
            Arc::clone(&config.keys),
            Arc::clone(&metrics),
        ));

        let ingestor = Ingestor::new(
            config.namespace.clone(),
            shard,
            scheduler.clone(),
            Arc::clone(&metrics),
        );

        let is_ready = Arc::new(AtomicBool::new(false));
        let pod_api: Api<Pod> = Api::namespaced(kube_client, &config.namespace);
        let watcher = PodWatcher::new(
            pod_api,
            &config.target_service,
            ingestor,
            Arc::clone(&is_ready),
            cancel.clone(),
        );

        // Start background tasks
        let scheduler = {
            let workers = config.workers;
            tokio::spawn(async move { scheduler.run(queue, reconciler, workers).await })
        };

        let watcher = tokio::spawn(async move { watcher.run().await });

        let server = {
            let state = Arc::new(ServerState { metrics, is_ready });
            let cancel = cancel.clone();
            let port = config.metrics_port;
            tokio::spawn(async move {
                if let Err(e) = start_server(port, state, cancel).await {
                    error!("HTTP server error: {}", e);
                }
            })
        };

        Ok(Self {
            watcher,
            scheduler,
            server,
            cancel,
        })
    }

    /// Runs until cancelled or until the watcher fails.
    ///
    /// A watcher failure cancels everything else and is returned once the
    /// scheduler and server have stopped.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("Vault Unseal Controller running");

        let watch_result = match self.watcher.await {
            Ok(result) => result,
            Err(e) => Err(ControllerError::Watch(format!("watcher task failed: {e}"))),
        };
        if let Err(e) = &watch_result {
            error!("Pod watcher stopped: {}", e);
        }
        self.cancel.cancel();

        if let Err(e) = self.scheduler.await {
            error!("Scheduler task failed: {}", e);
        }

        if let Err(e) = self.server.await {
            error!("HTTP server task failed: {}", e);
        }

        info!("Vault Unseal Controller stopped");
        watch_result
    }
}
