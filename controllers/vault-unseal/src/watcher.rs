//! Kubernetes pod watcher.
//!
//! Uses the raw watch API rather than a reflector: the unseal flow acts on
//! individual notifications, not on a cached view of the cluster.
//!
//! The watch restarts from the last seen `resourceVersion` whenever the
//! stream ends, and from scratch when the API server reports `410 Gone`.
//! Failing to open the very first watch is fatal; later failures are retried.

use crate::error::{ControllerError, SchedulerError};
use crate::ingest::Ingestor;
use crate::pod::PodEvent;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, WatchEvent, WatchParams};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Resource version that starts a watch with the current state of every pod
const FROM_SCRATCH: &str = "0";

/// HTTP status the API server uses for an expired resource version
const GONE: u16 = 410;

/// Pause before reopening a watch after an error
const WATCH_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Whether the current stream can keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Restart,
}

/// Resource version bookkeeping for one watch.
#[derive(Debug, Clone, PartialEq, Eq)]
struct WatchCursor {
    resource_version: String,
}

impl WatchCursor {
    fn new() -> Self {
        Self {
            resource_version: FROM_SCRATCH.to_string(),
        }
    }

    /// Advance past `event`.
    fn observe(&mut self, event: &WatchEvent<Pod>) -> Flow {
        match event {
            WatchEvent::Added(pod) | WatchEvent::Modified(pod) | WatchEvent::Deleted(pod) => {
                if let Some(rv) = &pod.metadata.resource_version {
                    self.resource_version.clone_from(rv);
                }
                Flow::Continue
            }
            WatchEvent::Bookmark(bookmark) => {
                debug!(resource_version = %bookmark.metadata.resource_version, "Watch bookmark");
                self.resource_version.clone_from(&bookmark.metadata.resource_version);
                Flow::Continue
            }
            WatchEvent::Error(e) if e.code == GONE => {
                info!("Resource version {} expired, restarting watch", self.resource_version);
                self.resource_version = FROM_SCRATCH.to_string();
                Flow::Restart
            }
            WatchEvent::Error(e) => {
                warn!(code = e.code, "Watch error event: {}", e.message);
                Flow::Continue
            }
        }
    }
}

/// Watches target pods and feeds decoded events to the ingestor.
#[derive(Clone)]
pub struct PodWatcher {
    api: Api<Pod>,
    params: WatchParams,
    ingestor: Ingestor,
    ready: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for PodWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PodWatcher")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Label selector for the pods of `target_service`
pub fn label_selector(target_service: &str) -> String {
    format!("app.kubernetes.io/name={target_service}")
}

impl PodWatcher {
    /// Creates a watcher over `api`, filtered to `target_service` pods.
    ///
    /// `ready` is set once the first watch is open.
    pub fn new(
        api: Api<Pod>,
        target_service: &str,
        ingestor: Ingestor,
        ready: Arc<AtomicBool>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            params: WatchParams::default().labels(&label_selector(target_service)),
            ingestor,
            ready,
            cancel,
        }
    }

    /// Watch until cancelled.
    ///
    /// Returns an error if the first watch cannot be opened or if the
    /// scheduler rejects an event.
    pub async fn run(&self) -> Result<(), ControllerError> {
        let mut cursor = WatchCursor::new();
        let mut established = false;

        loop {
            let opened = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(()),
                opened = self.api.watch(&self.params, &cursor.resource_version) => opened,
            };

            let stream = match opened {
                Ok(stream) => stream,
                Err(e) if !established => {
                    return Err(ControllerError::Watch(format!("failed to open pod watch: {e}")));
                }
                Err(e) => {
                    warn!(error = %e, "Failed to reopen pod watch");
                    if self.pause().await {
                        return Ok(());
                    }
                    continue;
                }
            };

            if !established {
                established = true;
                self.ready.store(true, Ordering::Relaxed);
                info!("Pod watch established");
            }

            let mut stream = stream.boxed();
            loop {
                let next = tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return Ok(()),
                    next = stream.next() => next,
                };

                match next {
                    None => {
                        debug!("Watch stream ended, reopening");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Watch stream error, reopening");
                        if self.pause().await {
                            return Ok(());
                        }
                        break;
                    }
                    Some(Ok(event)) => {
                        if cursor.observe(&event) == Flow::Restart {
                            break;
                        }
                        match PodEvent::from_watch_event(&event) {
                            Some(event) => deliver(&self.ingestor, &self.cancel, event)?,
                            None => debug!("Ignoring watch notification without a pod"),
                        }
                    }
                }
            }
        }
    }

    /// Wait before retrying. Returns true if cancelled meanwhile.
    async fn pause(&self) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => true,
            () = tokio::time::sleep(WATCH_RETRY_DELAY) => false,
        }
    }
}

/// Hand `event` to the ingestor.
///
/// A scheduler closed by shutdown is not an error.
fn deliver(ingestor: &Ingestor, cancel: &CancellationToken, event: PodEvent) -> Result<(), ControllerError> {
    match ingestor.ingest(event) {
        Ok(_) => Ok(()),
        Err(SchedulerError::Closed) if cancel.is_cancelled() => {
            debug!("Scheduler closed, dropping event");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
