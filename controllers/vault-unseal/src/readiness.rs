//! Readiness tracking.
//!
//! Classifies a pod snapshot and decides whether a task can act now, should be
//! retried later, or should be dropped because the pod is gone.

use crate::error::ControllerError;
use crate::pod::{PodIdentity, PodSnapshot};
use crate::task::ReconcileTask;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use std::sync::Arc;
use tracing::debug;

/// Coarse lifecycle state of a pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Scheduled or starting, or Running without an IP yet
    Pending,
    /// Running with an IP
    Running,
    /// Being deleted, or finished
    Terminated,
}

impl Readiness {
    /// Classify a snapshot.
    pub fn of(snapshot: &PodSnapshot) -> Self {
        if snapshot.deletion_requested {
            return Self::Terminated;
        }
        match snapshot.phase.as_deref() {
            Some("Succeeded" | "Failed") => Self::Terminated,
            Some("Running") if snapshot.ip.is_some() => Self::Running,
            _ => Self::Pending,
        }
    }
}

/// Source of fresh pod state.
#[async_trait::async_trait]
pub trait PodSource: Send + Sync {
    /// Current snapshot of a pod; `Ok(None)` if it no longer exists.
    async fn fetch(&self, identity: &PodIdentity) -> Result<Option<PodSnapshot>, ControllerError>;
}

/// `PodSource` backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubePodSource {
    client: Client,
}

impl KubePodSource {
    /// Creates a pod source using the given client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl std::fmt::Debug for KubePodSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubePodSource").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl PodSource for KubePodSource {
    async fn fetch(&self, identity: &PodIdentity) -> Result<Option<PodSnapshot>, ControllerError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &identity.namespace);
        let pod = api.get_opt(&identity.name).await?;
        Ok(pod.as_ref().and_then(PodSnapshot::from_pod))
    }
}

/// Decision for a task after looking at pod state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessCheck {
    /// Pod is running and addressable
    Ready(PodSnapshot),
    /// Not yet; carries the fresh snapshot if one was fetched
    Defer(Option<PodSnapshot>),
    /// Pod is gone or terminating
    Abandon,
}

/// Applies the readiness policy, re-fetching pending pods and retried tasks.
#[derive(Clone)]
pub struct ReadinessTracker {
    source: Arc<dyn PodSource>,
}

impl std::fmt::Debug for ReadinessTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessTracker").finish_non_exhaustive()
    }
}

impl ReadinessTracker {
    /// Creates a tracker reading fresh state from `source`.
    pub fn new(source: Arc<dyn PodSource>) -> Self {
        Self { source }
    }

    /// Decide what to do with `task`.
    ///
    /// A terminated snapshot is abandoned without any I/O. A pending one is
    /// re-fetched because the event that created the task may be stale. A
    /// retried task is always re-fetched, so a pod deleted between attempts is
    /// dropped even when no DELETED event reaches the watcher.
    pub async fn check(&self, task: &ReconcileTask) -> ReadinessCheck {
        match Readiness::of(&task.snapshot) {
            Readiness::Terminated => return ReadinessCheck::Abandon,
            Readiness::Running if task.retry.attempt == 0 => {
                return ReadinessCheck::Ready(task.snapshot.clone());
            }
            Readiness::Running | Readiness::Pending => {}
        }

        let fresh = match self.source.fetch(&task.identity).await {
            Ok(Some(fresh)) => fresh,
            Ok(None) => {
                debug!(pod = %task.identity, "Pod no longer exists");
                return ReadinessCheck::Abandon;
            }
            Err(e) => {
                debug!(pod = %task.identity, error = %e, "Failed to re-fetch pod, deferring");
                return ReadinessCheck::Defer(None);
            }
        };

        match Readiness::of(&fresh) {
            Readiness::Terminated => ReadinessCheck::Abandon,
            Readiness::Running => ReadinessCheck::Ready(fresh),
            Readiness::Pending => {
                debug!(pod = %task.identity, phase = fresh.phase_display(), "Pod not running yet");
                ReadinessCheck::Defer(Some(fresh))
            }
        }
    }
}
