//! Event ingestion: filter decoded pod events and hand them to the scheduler.
//!
//! Runs on the watcher task, so it never performs I/O.

use crate::error::SchedulerError;
use crate::metrics::Metrics;
use crate::pod::PodEvent;
use crate::scheduler::Scheduler;
use crate::shard::ShardFilter;
use crate::task::ReconcileTask;
use std::sync::Arc;
use tracing::debug;

/// What happened to an ingested event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestDecision {
    /// Handed to the scheduler
    Submitted,
    /// Pod lives outside the target namespace
    ForeignNamespace,
    /// Pod belongs to another shard
    NotOwned,
}

impl IngestDecision {
    fn skip_reason(self) -> Option<&'static str> {
        match self {
            Self::Submitted => None,
            Self::ForeignNamespace => Some("foreign_namespace"),
            Self::NotOwned => Some("not_owned"),
        }
    }
}

/// Filters events by namespace and shard, then submits them.
#[derive(Debug, Clone)]
pub struct Ingestor {
    namespace: String,
    shard: Arc<dyn ShardFilter>,
    scheduler: Scheduler,
    metrics: Arc<Metrics>,
}

impl Ingestor {
    /// Creates an ingestor for pods in `namespace` owned by `shard`.
    pub fn new(
        namespace: String,
        shard: Arc<dyn ShardFilter>,
        scheduler: Scheduler,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            namespace,
            shard,
            scheduler,
            metrics,
        }
    }

    /// Filter one event and submit it if it is ours.
    ///
    /// Only a scheduler rejection is an error; skips are normal decisions.
    pub fn ingest(&self, event: PodEvent) -> Result<IngestDecision, SchedulerError> {
        self.metrics.increment_events(event.kind.as_str());

        let decision = if event.identity().namespace != self.namespace {
            IngestDecision::ForeignNamespace
        } else if !self.shard.owns(event.identity()) {
            IngestDecision::NotOwned
        } else {
            IngestDecision::Submitted
        };

        if let Some(reason) = decision.skip_reason() {
            debug!(pod = %event.identity(), event_type = %event.kind, reason, "Skipping event");
            self.metrics.increment_skipped(reason);
            return Ok(decision);
        }

        debug!(pod = %event.identity(), event_type = %event.kind, "Submitting event");
        self.scheduler.submit(ReconcileTask::from_event(event))?;
        Ok(decision)
    }
}
