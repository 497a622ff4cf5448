//! Reconciliation logic for Vault pods.
//!
//! A task moves through: namespace check, shard ownership, event kind,
//! readiness, address derivation, seal probe and key submission. Any step that
//! has to wait hands the task back to the scheduler as `Requeue`.

use crate::keys::UnsealKeySet;
use crate::metrics::Metrics;
use crate::pod::{EventKind, vault_address};
use crate::prober::SealProber;
use crate::readiness::{PodSource, ReadinessCheck, ReadinessTracker};
use crate::sequencer::{UnsealOutcome, UnsealSequencer};
use crate::shard::ShardFilter;
use crate::task::{DoneReason, ReconcileTask, TaskExecutor, TaskOutcome};
use std::sync::Arc;
use tracing::{debug, info, warn};
use vault_client::VaultClientTrait;

/// Executes reconcile tasks for Vault pods.
pub struct Reconciler {
    namespace: String,
    shard: Arc<dyn ShardFilter>,
    readiness: ReadinessTracker,
    prober: SealProber,
    sequencer: UnsealSequencer,
    keys: Arc<UnsealKeySet>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("namespace", &self.namespace)
            .field("shard", &self.shard)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler.
    pub fn new(
        namespace: String,
        shard: Arc<dyn ShardFilter>,
        pods: Arc<dyn PodSource>,
        vault: Arc<dyn VaultClientTrait>,
        keys: Arc<UnsealKeySet>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            namespace,
            shard,
            readiness: ReadinessTracker::new(pods),
            prober: SealProber::new(Arc::clone(&vault)),
            sequencer: UnsealSequencer::new(vault, metrics),
            keys,
        }
    }

    /// Run one task through the unseal pipeline.
    #[tracing::instrument(
        skip_all,
        fields(
            pod = %task.identity,
            task_id = %task.id,
            event_type = %task.kind,
            attempt = task.retry.attempt,
        )
    )]
    pub async fn reconcile(&self, task: ReconcileTask) -> TaskOutcome {
        if task.identity.namespace != self.namespace {
            debug!("Pod outside target namespace {}", self.namespace);
            return TaskOutcome::Done(DoneReason::ForeignNamespace);
        }

        if !self.shard.owns(&task.identity) {
            debug!("Pod not owned by this shard");
            return TaskOutcome::Done(DoneReason::NotOwned);
        }

        match task.kind {
            EventKind::Added => {}
            EventKind::Modified | EventKind::Deleted | EventKind::Bookmark | EventKind::Error => {
                debug!(phase = task.snapshot.phase_display(), "No action for event");
                return TaskOutcome::Done(DoneReason::NoAction);
            }
        }

        let snapshot = match self.readiness.check(&task).await {
            ReadinessCheck::Ready(snapshot) => snapshot,
            ReadinessCheck::Defer(fresh) => {
                debug!("Pod not ready, retrying later");
                return TaskOutcome::Requeue(task.with_snapshot(fresh));
            }
            ReadinessCheck::Abandon => {
                info!(phase = task.snapshot.phase_display(), "Pod terminated, dropping task");
                return TaskOutcome::Done(DoneReason::PodTerminated);
            }
        };

        let Some(ip) = snapshot.ip.as_deref() else {
            return TaskOutcome::Requeue(task.with_snapshot(Some(snapshot)));
        };
        let address = vault_address(&snapshot.ports, ip);

        let status = match self.prober.probe(&address).await {
            Ok(status) => status,
            Err(e) => {
                warn!(addr = %address, error = %e, "Failed to query seal status");
                return TaskOutcome::Requeue(task.with_snapshot(Some(snapshot)));
            }
        };

        if !status.sealed {
            info!(addr = %address, "Vault already unsealed");
            return TaskOutcome::Done(DoneReason::AlreadyUnsealed);
        }

        info!(addr = %address, progress = %status.progress_display(), "Vault sealed, submitting unseal keys");

        match self.sequencer.unseal(&address, &self.keys).await {
            Ok(UnsealOutcome::Unsealed { submitted }) => {
                info!(addr = %address, submitted, "Vault unsealed");
                TaskOutcome::Done(DoneReason::Unsealed)
            }
            Ok(UnsealOutcome::StillSealed {
                submitted,
                progress,
                threshold,
            }) => {
                warn!(
                    addr = %address,
                    submitted,
                    progress = %format!("{progress}/{threshold}"),
                    "Vault still sealed after submitting every key"
                );
                TaskOutcome::Done(DoneReason::KeysExhausted)
            }
            Err(e) => {
                warn!(addr = %address, error = %e, "Unseal sequence failed, retrying later");
                TaskOutcome::Requeue(task.with_snapshot(Some(snapshot)))
            }
        }
    }
}

#[async_trait::async_trait]
impl TaskExecutor for Reconciler {
    async fn execute(&self, task: ReconcileTask) -> TaskOutcome {
        self.reconcile(task).await
    }
}
