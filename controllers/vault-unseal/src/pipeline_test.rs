//! End-to-end tests: watch notification in, Vault calls out.

#[cfg(test)]
mod tests {
    use crate::backoff::RetryPolicy;
    use crate::ingest::{IngestDecision, Ingestor};
    use crate::metrics::Metrics;
    use crate::pod::{PodEvent, PodSnapshot};
    use crate::reconciler::Reconciler;
    use crate::scheduler::Scheduler;
    use crate::shard::{HashShard, ShardConfig};
    use crate::test_utils::*;
    use k8s_openapi::api::core::v1::Pod;
    use kube::api::WatchEvent;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::task::JoinHandle;
    use tokio_util::sync::CancellationToken;
    use vault_client::MockVaultClient;

    const ADDR: &str = "http://10.0.0.5:8200";

    struct Pipeline {
        ingestor: Ingestor,
        scheduler: Scheduler,
        vault: Arc<MockVaultClient>,
        pods: Arc<MockPodSource>,
        metrics: Arc<Metrics>,
        cancel: CancellationToken,
        handle: JoinHandle<()>,
    }

    impl Pipeline {
        fn start(shard: HashShard) -> Self {
            let vault = Arc::new(MockVaultClient::new());
            let pods = Arc::new(MockPodSource::new());
            let metrics = Arc::new(Metrics::new().unwrap());
            let cancel = CancellationToken::new();

            let (scheduler, queue) =
                Scheduler::new(64, RetryPolicy::default(), cancel.clone(), metrics.clone());
            let reconciler = Arc::new(Reconciler::new(
                "vault".to_string(),
                Arc::new(shard),
                pods.clone(),
                vault.clone(),
                Arc::new(test_keys()),
                metrics.clone(),
            ));
            let ingestor = Ingestor::new(
                "vault".to_string(),
                Arc::new(shard),
                scheduler.clone(),
                metrics.clone(),
            );

            let handle = {
                let scheduler = scheduler.clone();
                tokio::spawn(async move { scheduler.run(queue, reconciler, 4).await })
            };

            Self {
                ingestor,
                scheduler,
                vault,
                pods,
                metrics,
                cancel,
                handle,
            }
        }

        fn added(&self, pod: Pod) -> IngestDecision {
            let event = PodEvent::from_watch_event(&WatchEvent::Added(pod)).unwrap();
            self.ingestor.ingest(event).unwrap()
        }

        async fn settle(&self) {
            wait_for(|| self.scheduler.tracked() == 0).await;
        }

        async fn stop(self) {
            self.cancel.cancel();
            self.handle.await.unwrap();
        }
    }

    fn single_shard() -> HashShard {
        HashShard::new(ShardConfig::new(0, 1).unwrap())
    }

    fn running_pod(namespace: &str, name: &str) -> Pod {
        test_pod(namespace, name, "Running", Some("10.0.0.5"), &[])
    }

    async fn wait_for(condition: impl Fn() -> bool) {
        for _ in 0..10_000 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sealed_pod_is_unsealed_with_minimal_keys() {
        let pipeline = Pipeline::start(single_shard());
        pipeline.vault.add_sealed(ADDR, 2);

        assert_eq!(pipeline.added(running_pod("vault", "vault-0")), IngestDecision::Submitted);
        pipeline.settle().await;

        assert_eq!(pipeline.vault.unseal_keys_sent(ADDR), vec!["k1", "k2"]);
        assert_eq!(pipeline.vault.is_sealed(ADDR), Some(false));
        assert_eq!(pipeline.metrics.tasks("unsealed"), 1);
        pipeline.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_namespace_makes_no_calls() {
        let pipeline = Pipeline::start(single_shard());
        pipeline.vault.add_sealed(ADDR, 3);

        assert_eq!(
            pipeline.added(running_pod("default", "vault-0")),
            IngestDecision::ForeignNamespace
        );
        pipeline.settle().await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(pipeline.vault.calls().is_empty());
        pipeline.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unowned_shard_makes_no_calls() {
        let shard = HashShard::new(ShardConfig::new(1, 2).unwrap());
        let name = unowned_name(&shard);
        let pipeline = Pipeline::start(shard);
        pipeline.vault.add_sealed(ADDR, 3);

        assert_eq!(pipeline.added(running_pod("vault", &name)), IngestDecision::NotOwned);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(pipeline.vault.calls().is_empty());
        assert_eq!(pipeline.metrics.skipped("not_owned"), 1);
        pipeline.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleting_pod_terminates_without_calls() {
        let pipeline = Pipeline::start(single_shard());
        pipeline.vault.add_sealed(ADDR, 3);

        pipeline.added(deleting(running_pod("vault", "vault-0")));
        pipeline.settle().await;

        assert!(pipeline.vault.calls().is_empty());
        assert_eq!(pipeline.pods.fetch_count(), 0);
        assert_eq!(pipeline.metrics.tasks("pod_terminated"), 1);
        pipeline.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_added_for_unsealed_pod_only_probes() {
        let pipeline = Pipeline::start(single_shard());
        pipeline.vault.add_unsealed(ADDR);

        pipeline.added(running_pod("vault", "vault-0"));
        pipeline.added(running_pod("vault", "vault-0"));
        pipeline.settle().await;

        assert!(pipeline.vault.seal_status_count(ADDR) >= 1);
        assert_eq!(pipeline.vault.total_unseal_calls(), 0);
        pipeline.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_pod_is_unsealed_once_running() {
        let pipeline = Pipeline::start(single_shard());
        pipeline.vault.add_sealed(ADDR, 3);
        let pending: PodSnapshot = snapshot("vault-0", "Pending", None);
        pipeline.pods.set(pending);

        pipeline.added(test_pod("vault", "vault-0", "Pending", None, &[]));
        wait_for(|| pipeline.pods.fetch_count() >= 2).await;
        assert!(pipeline.vault.calls().is_empty());

        pipeline.pods.set(snapshot("vault-0", "Running", Some("10.0.0.5")));
        pipeline.settle().await;

        assert_eq!(pipeline.vault.is_sealed(ADDR), Some(false));
        assert_eq!(pipeline.vault.total_unseal_calls(), 3);
        assert!(pipeline.metrics.retries() >= 2);
        pipeline.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_vault_is_retried() {
        let pipeline = Pipeline::start(single_shard());
        pipeline.vault.add_sealed(ADDR, 3);
        pipeline.vault.set_seal_status_failure(ADDR, true);
        pipeline.pods.set(snapshot("vault-0", "Running", Some("10.0.0.5")));

        pipeline.added(running_pod("vault", "vault-0"));
        wait_for(|| pipeline.vault.seal_status_count(ADDR) >= 2).await;
        assert_eq!(pipeline.vault.total_unseal_calls(), 0);

        pipeline.vault.set_seal_status_failure(ADDR, false);
        pipeline.settle().await;

        assert_eq!(pipeline.vault.is_sealed(ADDR), Some(false));
        pipeline.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_once_pod_is_gone() {
        let pipeline = Pipeline::start(single_shard());
        pipeline.vault.add_sealed(ADDR, 3);
        pipeline.vault.set_seal_status_failure(ADDR, true);

        pipeline.added(running_pod("vault", "vault-0"));
        wait_for(|| pipeline.vault.seal_status_count(ADDR) >= 1).await;

        // The pod source no longer knows the pod and no DELETED event arrives
        pipeline.settle().await;
        tokio::time::sleep(Duration::from_secs(3600)).await;

        assert_eq!(pipeline.vault.seal_status_count(ADDR), 1);
        assert_eq!(pipeline.pods.fetch_count(), 1);
        assert_eq!(pipeline.metrics.tasks("pod_terminated"), 1);
        assert_eq!(pipeline.metrics.tasks("gave_up"), 0);
        pipeline.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarted_pod_is_unsealed_again() {
        let pipeline = Pipeline::start(single_shard());
        pipeline.vault.add_sealed(ADDR, 2);

        pipeline.added(running_pod("vault", "vault-0"));
        pipeline.settle().await;
        assert_eq!(pipeline.vault.is_sealed(ADDR), Some(false));

        pipeline.vault.reseal(ADDR);
        pipeline.added(running_pod("vault", "vault-0"));
        pipeline.settle().await;

        assert_eq!(pipeline.vault.is_sealed(ADDR), Some(false));
        assert_eq!(pipeline.vault.unseal_keys_sent(ADDR), vec!["k1", "k2", "k1", "k2"]);
        assert_eq!(pipeline.metrics.tasks("unsealed"), 2);
        pipeline.stop().await;
    }
}
