//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `vault_unseal_events_total{event_type}` - Watch events received
//! - `vault_unseal_events_skipped_total{reason}` - Events dropped before scheduling
//! - `vault_unseal_tasks_total{outcome}` - Finished tasks by outcome
//! - `vault_unseal_task_retries_total` - Retries scheduled after a deferred task
//! - `vault_unseal_key_submissions_total` - Key shares submitted to Vault
//! - `vault_unseal_tracked_pods` - Pods currently held by the scheduler

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Controller metrics, registered on a private registry.
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    events_total: IntCounterVec,
    events_skipped_total: IntCounterVec,
    tasks_total: IntCounterVec,
    task_retries_total: IntCounter,
    key_submissions_total: IntCounter,
    tracked_pods: IntGauge,
}

impl Metrics {
    /// Creates and registers every metric.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let events_total = IntCounterVec::new(
            Opts::new("vault_unseal_events_total", "Total number of pod watch events received"),
            &["event_type"],
        )?;
        let events_skipped_total = IntCounterVec::new(
            Opts::new(
                "vault_unseal_events_skipped_total",
                "Total number of pod events dropped before scheduling",
            ),
            &["reason"],
        )?;
        let tasks_total = IntCounterVec::new(
            Opts::new("vault_unseal_tasks_total", "Total number of finished reconcile tasks"),
            &["outcome"],
        )?;
        let task_retries_total = IntCounter::new(
            "vault_unseal_task_retries_total",
            "Total number of task retries scheduled",
        )?;
        let key_submissions_total = IntCounter::new(
            "vault_unseal_key_submissions_total",
            "Total number of unseal key shares submitted",
        )?;
        let tracked_pods = IntGauge::new(
            "vault_unseal_tracked_pods",
            "Number of pods currently tracked by the task scheduler",
        )?;

        registry.register(Box::new(events_total.clone()))?;
        registry.register(Box::new(events_skipped_total.clone()))?;
        registry.register(Box::new(tasks_total.clone()))?;
        registry.register(Box::new(task_retries_total.clone()))?;
        registry.register(Box::new(key_submissions_total.clone()))?;
        registry.register(Box::new(tracked_pods.clone()))?;

        Ok(Self {
            registry,
            events_total,
            events_skipped_total,
            tasks_total,
            task_retries_total,
            key_submissions_total,
            tracked_pods,
        })
    }

    /// Registry to expose on `/metrics`
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Count a received watch event by type
    pub fn increment_events(&self, event_type: &str) {
        self.events_total.with_label_values(&[event_type]).inc();
    }

    /// Count an event dropped at ingestion
    pub fn increment_skipped(&self, reason: &str) {
        self.events_skipped_total.with_label_values(&[reason]).inc();
    }

    /// Count a finished task by outcome
    pub fn increment_tasks(&self, outcome: &str) {
        self.tasks_total.with_label_values(&[outcome]).inc();
    }

    /// Count a scheduled retry
    pub fn increment_retries(&self) {
        self.task_retries_total.inc();
    }

    /// Count one key share sent to Vault
    pub fn increment_key_submissions(&self) {
        self.key_submissions_total.inc();
    }

    /// Pods currently held by the scheduler
    pub fn set_tracked_pods(&self, count: usize) {
        self.tracked_pods.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    #[cfg(test)]
    pub fn events(&self, event_type: &str) -> u64 {
        self.events_total.with_label_values(&[event_type]).get()
    }

    #[cfg(test)]
    pub fn skipped(&self, reason: &str) -> u64 {
        self.events_skipped_total.with_label_values(&[reason]).get()
    }

    #[cfg(test)]
    pub fn tasks(&self, outcome: &str) -> u64 {
        self.tasks_total.with_label_values(&[outcome]).get()
    }

    #[cfg(test)]
    pub fn retries(&self) -> u64 {
        self.task_retries_total.get()
    }

    #[cfg(test)]
    pub fn key_submissions(&self) -> u64 {
        self.key_submissions_total.get()
    }

    #[cfg(test)]
    pub fn tracked_pods(&self) -> i64 {
        self.tracked_pods.get()
    }
}
