//! # Retry Scheduler
//!
//! Single-flight task table, work queue and worker pool.
//!
//! Each pod identity has at most one entry:
//!
//! - `Queued`: its identity is on the work queue, waiting for a worker
//! - `Running`: a worker is executing it; a newer task may be parked alongside
//! - `Delayed`: a backoff timer will put it back on the queue
//!
//! Duplicate events for the same pod coalesce into the existing entry instead of
//! creating more work, so the queue never holds an identity twice.

use crate::backoff::RetryPolicy;
use crate::error::SchedulerError;
use crate::metrics::Metrics;
use crate::pod::PodIdentity;
use crate::task::{ReconcileTask, RetryState, TaskExecutor, TaskOutcome};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Outcome label for tasks dropped after too many retries
const GAVE_UP: &str = "gave_up";

#[derive(Debug)]
enum Entry {
    Queued(ReconcileTask),
    Running(Option<ReconcileTask>),
    Delayed(ReconcileTask),
}

#[derive(Debug)]
struct Shared {
    entries: Mutex<HashMap<PodIdentity, Entry>>,
    queue: UnboundedSender<PodIdentity>,
    max_tracked: usize,
    policy: RetryPolicy,
    cancel: CancellationToken,
    tracker: TaskTracker,
    metrics: Arc<Metrics>,
}

/// Receiving side of the work queue, shared by all workers.
#[derive(Debug)]
pub struct WorkQueue {
    rx: Arc<tokio::sync::Mutex<UnboundedReceiver<PodIdentity>>>,
}

/// Handle to the task table. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Creates a scheduler and its work queue.
    ///
    /// Cancelling `cancel` closes the scheduler: new submissions fail, timers
    /// are dropped, and `run` returns once in-flight tasks finish.
    pub fn new(
        max_tracked: usize,
        policy: RetryPolicy,
        cancel: CancellationToken,
        metrics: Arc<Metrics>,
    ) -> (Self, WorkQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            shared: Arc::new(Shared {
                entries: Mutex::new(HashMap::new()),
                queue: tx,
                max_tracked,
                policy,
                cancel,
                tracker: TaskTracker::new(),
                metrics,
            }),
        };
        let queue = WorkQueue {
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        };
        (scheduler, queue)
    }

    /// Submit a task, coalescing with any existing entry for the same pod.
    pub fn submit(&self, task: ReconcileTask) -> Result<(), SchedulerError> {
        if self.shared.cancel.is_cancelled() {
            return Err(SchedulerError::Closed);
        }

        let mut entries = self.lock();
        let identity = task.identity.clone();

        match entries.get_mut(&identity) {
            None => {
                if entries.len() >= self.shared.max_tracked {
                    warn!(pod = %identity, capacity = self.shared.max_tracked, "Task queue full");
                    return Err(SchedulerError::Full {
                        capacity: self.shared.max_tracked,
                    });
                }
                debug!(pod = %identity, task_id = %task.id, "Queued task");
                entries.insert(identity.clone(), Entry::Queued(task));
                self.enqueue(identity);
            }
            Some(Entry::Queued(current) | Entry::Delayed(current)) => {
                debug!(pod = %identity, task_id = %task.id, "Coalesced with pending task");
                current.absorb(task);
            }
            Some(Entry::Running(next)) => {
                debug!(pod = %identity, task_id = %task.id, "Parked behind running task");
                match next {
                    Some(parked) => parked.absorb(task),
                    None => *next = Some(task),
                }
            }
        }

        self.shared.metrics.set_tracked_pods(entries.len());
        Ok(())
    }

    /// Number of pods currently tracked
    pub fn tracked(&self) -> usize {
        self.lock().len()
    }

    /// Spawn `workers` worker tasks and wait until shutdown completes.
    pub async fn run(&self, queue: WorkQueue, executor: Arc<dyn TaskExecutor>, workers: usize) {
        let workers = workers.max(1);
        info!("Starting {} scheduler workers", workers);

        for worker in 0..workers {
            let scheduler = self.clone();
            let rx = Arc::clone(&queue.rx);
            let executor = Arc::clone(&executor);
            self.shared
                .tracker
                .spawn(async move { scheduler.worker_loop(worker, rx, executor).await });
        }

        self.shared.cancel.cancelled().await;
        self.shared.tracker.close();
        self.shared.tracker.wait().await;
        info!("Scheduler stopped");
    }

    async fn worker_loop(
        &self,
        worker: usize,
        rx: Arc<tokio::sync::Mutex<UnboundedReceiver<PodIdentity>>>,
        executor: Arc<dyn TaskExecutor>,
    ) {
        loop {
            let identity = tokio::select! {
                biased;
                () = self.shared.cancel.cancelled() => break,
                next = async { rx.lock().await.recv().await } => match next {
                    Some(identity) => identity,
                    None => break,
                },
            };

            let Some(task) = self.take(&identity) else {
                continue;
            };

            debug!(worker, pod = %identity, task_id = %task.id, attempt = task.retry.attempt, "Executing task");
            let outcome = executor.execute(task).await;
            self.complete(identity, outcome);
        }
        debug!(worker, "Worker stopped");
    }

    fn take(&self, identity: &PodIdentity) -> Option<ReconcileTask> {
        let mut entries = self.lock();
        match entries.remove(identity) {
            Some(Entry::Queued(task)) => {
                entries.insert(identity.clone(), Entry::Running(None));
                Some(task)
            }
            Some(other) => {
                entries.insert(identity.clone(), other);
                None
            }
            None => None,
        }
    }

    fn complete(&self, identity: PodIdentity, outcome: TaskOutcome) {
        let mut entries = self.lock();
        let next = match entries.remove(&identity) {
            Some(Entry::Running(next)) => next,
            _ => None,
        };

        match outcome {
            TaskOutcome::Done(reason) => {
                self.shared.metrics.increment_tasks(reason.as_str());
                if let Some(next) = next {
                    entries.insert(identity.clone(), Entry::Queued(next));
                    self.enqueue(identity);
                }
            }
            TaskOutcome::Requeue(task) => {
                let attempt = task.retry.attempt.saturating_add(1);
                let parked = next.is_some();
                let mut task = task;
                if let Some(next) = next {
                    task.absorb(next);
                }

                if self.shared.cancel.is_cancelled() {
                    debug!(pod = %identity, task_id = %task.id, "Dropping retry during shutdown");
                } else if !self.shared.policy.allows(attempt) {
                    warn!(
                        pod = %identity,
                        task_id = %task.id,
                        attempt = task.retry.attempt,
                        "Giving up after {} retries",
                        self.shared.policy.max_attempts
                    );
                    self.shared.metrics.increment_tasks(GAVE_UP);
                } else if parked {
                    // A newer event arrived while running: retry now with its data
                    task.retry = RetryState {
                        attempt,
                        next_eligible_at: None,
                    };
                    entries.insert(identity.clone(), Entry::Queued(task));
                    self.enqueue(identity);
                } else {
                    let delay = self.shared.policy.delay_for(attempt);
                    let next_eligible_at = chrono::Duration::from_std(delay)
                        .ok()
                        .map(|delay| Utc::now() + delay);
                    task.retry = RetryState {
                        attempt,
                        next_eligible_at,
                    };

                    debug!(pod = %identity, task_id = %task.id, attempt, ?delay, "Retrying later");
                    entries.insert(identity.clone(), Entry::Delayed(task));
                    self.shared.metrics.increment_retries();
                    self.schedule_wake(identity, delay);
                }
            }
        }

        self.shared.metrics.set_tracked_pods(entries.len());
    }

    fn schedule_wake(&self, identity: PodIdentity, delay: std::time::Duration) {
        let scheduler = self.clone();
        self.shared.tracker.spawn(async move {
            tokio::select! {
                biased;
                () = scheduler.shared.cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => scheduler.wake(identity),
            }
        });
    }

    fn wake(&self, identity: PodIdentity) {
        let mut entries = self.lock();
        match entries.remove(&identity) {
            Some(Entry::Delayed(task)) => {
                entries.insert(identity.clone(), Entry::Queued(task));
                self.enqueue(identity);
            }
            Some(other) => {
                entries.insert(identity, other);
            }
            None => {}
        }
    }

    fn enqueue(&self, identity: PodIdentity) {
        if self.shared.queue.send(identity).is_err() {
            debug!("Work queue closed");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PodIdentity, Entry>> {
        self.shared.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
