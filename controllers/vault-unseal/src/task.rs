//! Reconcile tasks and their outcomes.

use crate::pod::{EventKind, PodEvent, PodIdentity, PodSnapshot};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Retry bookkeeping carried by a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryState {
    /// Number of retries already scheduled for this task (0 for a fresh event)
    pub attempt: u32,
    /// Earliest time the next run may start, while a backoff is pending
    pub next_eligible_at: Option<DateTime<Utc>>,
}

/// One unit of retryable work for a single pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileTask {
    /// Correlation id for logs
    pub id: Uuid,
    /// Pod this task is about
    pub identity: PodIdentity,
    /// Latest known pod state
    pub snapshot: PodSnapshot,
    /// Event that created the task
    pub kind: EventKind,
    /// Retry state
    pub retry: RetryState,
}

impl ReconcileTask {
    /// Fresh task for a watch event.
    pub fn from_event(event: PodEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity: event.snapshot.identity.clone(),
            snapshot: event.snapshot,
            kind: event.kind,
            retry: RetryState::default(),
        }
    }

    /// Same task with a newer snapshot, if one was fetched.
    #[must_use]
    pub fn with_snapshot(mut self, snapshot: Option<PodSnapshot>) -> Self {
        if let Some(snapshot) = snapshot {
            self.snapshot = snapshot;
        }
        self
    }

    /// Fold a newer task for the same pod into this one.
    ///
    /// The newer id and snapshot win. Retry state is kept so repeated events
    /// cannot reset the backoff. An `Added` kind is sticky: a later `Modified`
    /// must not turn a pending unseal into a no-op.
    pub fn absorb(&mut self, newer: ReconcileTask) {
        self.id = newer.id;
        self.snapshot = newer.snapshot;
        if self.kind != EventKind::Added {
            self.kind = newer.kind;
        }
    }
}

/// Why a task finished without a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneReason {
    /// Key submission unsealed the server
    Unsealed,
    /// Probe found the server already unsealed
    AlreadyUnsealed,
    /// Every key was submitted and the server is still sealed
    KeysExhausted,
    /// Pod is being deleted or has terminated
    PodTerminated,
    /// Pod belongs to another replica's shard
    NotOwned,
    /// Pod is outside the target namespace
    ForeignNamespace,
    /// Event kind needs no action
    NoAction,
}

impl DoneReason {
    /// Label value for metrics
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unsealed => "unsealed",
            Self::AlreadyUnsealed => "already_unsealed",
            Self::KeysExhausted => "keys_exhausted",
            Self::PodTerminated => "pod_terminated",
            Self::NotOwned => "not_owned",
            Self::ForeignNamespace => "foreign_namespace",
            Self::NoAction => "no_action",
        }
    }
}

/// Result of executing one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Terminal: drop the task
    Done(DoneReason),
    /// Not actionable yet: run again after a backoff
    Requeue(ReconcileTask),
}

/// Runs one task. Implemented by the reconciler; the scheduler only sees this trait.
#[async_trait::async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Execute `task` once. Must not sleep waiting for the pod; return `Requeue` instead.
    async fn execute(&self, task: ReconcileTask) -> TaskOutcome;
}
