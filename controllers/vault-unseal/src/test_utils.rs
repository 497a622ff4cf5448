//! Test utilities for unit testing the unseal pipeline
//!
//! This module provides pod builders, snapshot builders and an in-memory `PodSource`.

use crate::error::ControllerError;
use crate::keys::UnsealKeySet;
use crate::pod::{PodIdentity, PodSnapshot};
use crate::readiness::PodSource;
use crate::shard::{HashShard, ShardFilter};
use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Helper to create a test pod in `namespace` with one container.
///
/// Built from JSON so the result matches what the API server sends.
pub fn test_pod(namespace: &str, name: &str, phase: &str, ip: Option<&str>, ports: &[(&str, i32)]) -> Pod {
    let ports: Vec<serde_json::Value> = ports
        .iter()
        .map(|(port_name, number)| serde_json::json!({ "name": port_name, "containerPort": number }))
        .collect();

    let mut status = serde_json::json!({ "phase": phase });
    if let Some(ip) = ip {
        status["podIP"] = serde_json::json!(ip);
    }

    serde_json::from_value(serde_json::json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": { "app.kubernetes.io/name": "vault" }
        },
        "spec": {
            "containers": [{ "name": "vault", "image": "hashicorp/vault", "ports": ports }]
        },
        "status": status
    }))
    .unwrap()
}

/// Helper to mark a pod as being deleted
pub fn deleting(pod: Pod) -> Pod {
    let mut value = serde_json::to_value(pod).unwrap();
    value["metadata"]["deletionTimestamp"] = serde_json::json!("2026-01-01T00:00:00Z");
    serde_json::from_value(value).unwrap()
}

/// Helper to create a snapshot of pod `name` in namespace `vault`
pub fn snapshot(name: &str, phase: &str, ip: Option<&str>) -> PodSnapshot {
    PodSnapshot {
        identity: PodIdentity::new("vault", name),
        ip: ip.map(str::to_string),
        ports: Vec::new(),
        phase: Some(phase.to_string()),
        deletion_requested: false,
        observed_at: Utc::now(),
    }
}

/// Three keys: `k1`, `k2`, `k3`
pub fn test_keys() -> UnsealKeySet {
    UnsealKeySet::new(vec!["k1".into(), "k2".into(), "k3".into()]).unwrap()
}

/// First `vault-N` pod name in namespace `vault` that `shard` does not own
pub fn unowned_name(shard: &HashShard) -> String {
    (0..1000)
        .map(|i| format!("vault-{i}"))
        .find(|name| !shard.owns(&PodIdentity::new("vault", name.as_str())))
        .unwrap()
}

/// In-memory `PodSource` returning a fixed snapshot.
#[derive(Debug, Default)]
pub struct MockPodSource {
    pod: Mutex<Option<PodSnapshot>>,
    failing: AtomicBool,
    fetches: AtomicUsize,
}

impl MockPodSource {
    /// Empty source: every fetch reports the pod as gone
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot returned by every fetch
    pub fn set(&self, snapshot: PodSnapshot) {
        *self.pod.lock().unwrap() = Some(snapshot);
    }

    /// Make every fetch fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of fetches so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PodSource for MockPodSource {
    async fn fetch(&self, identity: &PodIdentity) -> Result<Option<PodSnapshot>, ControllerError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ControllerError::Watch("mock pod source unavailable".to_string()));
        }
        Ok(self
            .pod
            .lock()
            .unwrap()
            .clone()
            .filter(|snapshot| &snapshot.identity == identity))
    }
}
