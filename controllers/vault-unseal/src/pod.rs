//! Pod identity, snapshots and watch events.
//!
//! `PodSnapshot` is the only view of a pod the reconciliation core sees. It is
//! built fresh from a `k8s_openapi` `Pod` on every event or re-fetch and never
//! updated in place.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::core::WatchEvent;
use std::fmt;

/// Scheme whose named container port addresses the Vault API
const TARGET_SCHEME: &str = "http";

/// Vault API port used when no container port is named for the scheme
const DEFAULT_VAULT_PORT: i32 = 8200;

/// Stable key of a pod: namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PodIdentity {
    /// Pod namespace
    pub namespace: String,
    /// Pod name
    pub name: String,
}

impl PodIdentity {
    /// Creates a new pod identity.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Identity of a Kubernetes pod. `None` if the object has no name or namespace.
    pub fn from_pod(pod: &Pod) -> Option<Self> {
        let name = pod.metadata.name.clone()?;
        let namespace = pod.metadata.namespace.clone()?;
        Some(Self { namespace, name })
    }
}

impl fmt::Display for PodIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A declared container port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerPortRef {
    /// Port name (`http`, `https-internal`, ...)
    pub name: Option<String>,
    /// Port number inside the container
    pub container_port: i32,
}

/// Immutable view of a pod at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSnapshot {
    /// Pod identity
    pub identity: PodIdentity,
    /// Pod IP, if assigned
    pub ip: Option<String>,
    /// Ports declared by the first container
    pub ports: Vec<ContainerPortRef>,
    /// `status.phase`
    pub phase: Option<String>,
    /// `metadata.deletionTimestamp` is set
    pub deletion_requested: bool,
    /// When this snapshot was taken
    pub observed_at: DateTime<Utc>,
}

impl PodSnapshot {
    /// Snapshot a Kubernetes pod. `None` if the pod has no identity.
    pub fn from_pod(pod: &Pod) -> Option<Self> {
        let identity = PodIdentity::from_pod(pod)?;

        let ports = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.containers.first())
            .and_then(|container| container.ports.as_ref())
            .map(|ports| {
                ports
                    .iter()
                    .map(|port| ContainerPortRef {
                        name: port.name.clone(),
                        container_port: port.container_port,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let status = pod.status.as_ref();

        Some(Self {
            identity,
            ip: status
                .and_then(|s| s.pod_ip.clone())
                .filter(|ip| !ip.is_empty()),
            ports,
            phase: status.and_then(|s| s.phase.clone()),
            deletion_requested: pod.metadata.deletion_timestamp.is_some(),
            observed_at: Utc::now(),
        })
    }

    /// Phase for logging, `Unknown` when absent
    pub fn phase_display(&self) -> &str {
        self.phase.as_deref().unwrap_or("Unknown")
    }
}

/// Derive the Vault API address of a pod.
///
/// Uses the first container port named `http`; falls back to `http://{ip}:8200`.
pub fn vault_address(ports: &[ContainerPortRef], ip: &str) -> String {
    let port = ports
        .iter()
        .find(|port| port.name.as_deref() == Some(TARGET_SCHEME))
        .map_or(DEFAULT_VAULT_PORT, |port| port.container_port);

    format!("{TARGET_SCHEME}://{ip}:{port}")
}

/// Kind of watch notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Object added (also delivered for every existing object on a fresh watch)
    Added,
    /// Object modified
    Modified,
    /// Object deleted
    Deleted,
    /// Error notification
    Error,
    /// Resource version checkpoint
    Bookmark,
}

impl EventKind {
    /// Wire name, as used by the Kubernetes watch API
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "ADDED",
            Self::Modified => "MODIFIED",
            Self::Deleted => "DELETED",
            Self::Error => "ERROR",
            Self::Bookmark => "BOOKMARK",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pod lifecycle notification that made it past decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodEvent {
    /// Notification kind
    pub kind: EventKind,
    /// Pod state carried by the notification
    pub snapshot: PodSnapshot,
}

impl PodEvent {
    /// Creates a new event.
    pub fn new(kind: EventKind, snapshot: PodSnapshot) -> Self {
        Self { kind, snapshot }
    }

    /// Identity of the pod this event is about
    pub fn identity(&self) -> &PodIdentity {
        &self.snapshot.identity
    }

    /// Decode a watch notification.
    ///
    /// Only notifications carrying a pod produce an event. Bookmarks and
    /// errors carry no pod, and a pod without a name or namespace is not
    /// addressable; all of these yield `None`.
    pub fn from_watch_event(event: &WatchEvent<Pod>) -> Option<Self> {
        let (kind, pod) = match event {
            WatchEvent::Added(pod) => (EventKind::Added, pod),
            WatchEvent::Modified(pod) => (EventKind::Modified, pod),
            WatchEvent::Deleted(pod) => (EventKind::Deleted, pod),
            WatchEvent::Bookmark(_) | WatchEvent::Error(_) => return None,
        };
        PodSnapshot::from_pod(pod).map(|snapshot| Self::new(kind, snapshot))
    }
}
