//! Ordered key submission.
//!
//! Key shares are sent one at a time, in configured order, until Vault reports
//! itself unsealed. Shares after that point are never sent. A failed submission
//! aborts the sequence; the next attempt starts again from the first share,
//! which Vault tolerates because progress only counts distinct shares.

use crate::keys::UnsealKeySet;
use crate::metrics::Metrics;
use std::sync::Arc;
use tracing::{info, warn};
use vault_client::{VaultClientTrait, VaultError};

/// Result of running the full key sequence against one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsealOutcome {
    /// Server reported `sealed: false` after `submitted` shares
    Unsealed {
        /// Shares sent
        submitted: usize,
    },
    /// Every share was sent and the server is still sealed
    StillSealed {
        /// Shares sent
        submitted: usize,
        /// Last reported progress
        progress: u32,
        /// Last reported threshold
        threshold: u32,
    },
}

/// Submits unseal key shares in order.
#[derive(Clone)]
pub struct UnsealSequencer {
    client: Arc<dyn VaultClientTrait>,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for UnsealSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnsealSequencer").finish_non_exhaustive()
    }
}

impl UnsealSequencer {
    /// Creates a sequencer that counts submissions in `metrics`.
    pub fn new(client: Arc<dyn VaultClientTrait>, metrics: Arc<Metrics>) -> Self {
        Self { client, metrics }
    }

    /// Submit `keys` to the server at `address`, stopping as soon as it unseals.
    pub async fn unseal(&self, address: &str, keys: &UnsealKeySet) -> Result<UnsealOutcome, VaultError> {
        let mut submitted = 0;
        let mut progress = 0;
        let mut threshold = 0;

        for key in keys.iter() {
            let status = self.client.unseal(address, key).await.map_err(|e| {
                warn!(addr = address, submitted, error = %e, "Key submission failed");
                e
            })?;
            submitted += 1;
            self.metrics.increment_key_submissions();

            info!(
                addr = address,
                sealed = status.sealed,
                progress = %status.progress_display(),
                "Submitted unseal key {}/{}",
                submitted,
                keys.len()
            );

            if !status.sealed {
                return Ok(UnsealOutcome::Unsealed { submitted });
            }
            progress = status.progress;
            threshold = status.threshold();
        }

        Ok(UnsealOutcome::StillSealed {
            submitted,
            progress,
            threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_client::MockVaultClient;

    const ADDR: &str = "http://10.0.0.5:8200";

    fn keys() -> UnsealKeySet {
        UnsealKeySet::new(vec!["k1".into(), "k2".into(), "k3".into()]).unwrap()
    }

    fn sequencer(mock: &Arc<MockVaultClient>) -> (UnsealSequencer, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new().unwrap());
        (UnsealSequencer::new(mock.clone(), metrics.clone()), metrics)
    }

    #[tokio::test]
    async fn test_stops_once_unsealed() {
        let mock = Arc::new(MockVaultClient::new());
        mock.add_sealed(ADDR, 2);
        let (sequencer, metrics) = sequencer(&mock);

        let outcome = sequencer.unseal(ADDR, &keys()).await.unwrap();

        assert_eq!(outcome, UnsealOutcome::Unsealed { submitted: 2 });
        assert_eq!(mock.unseal_keys_sent(ADDR), vec!["k1", "k2"]);
        assert_eq!(metrics.key_submissions(), 2);
    }

    #[tokio::test]
    async fn test_error_aborts_sequence() {
        let mock = Arc::new(MockVaultClient::new());
        mock.add_sealed(ADDR, 3);
        mock.fail_unseal_at(ADDR, 2);
        let (sequencer, metrics) = sequencer(&mock);

        let err = sequencer.unseal(ADDR, &keys()).await.unwrap_err();

        assert!(matches!(err, VaultError::Api { status: 503, .. }));
        assert_eq!(mock.unseal_keys_sent(ADDR), vec!["k1", "k2"]);
        assert_eq!(metrics.key_submissions(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_keys_still_sealed() {
        let mock = Arc::new(MockVaultClient::new());
        mock.add_sealed(ADDR, 5);
        let (sequencer, _) = sequencer(&mock);

        let outcome = sequencer.unseal(ADDR, &keys()).await.unwrap();

        assert_eq!(
            outcome,
            UnsealOutcome::StillSealed {
                submitted: 3,
                progress: 3,
                threshold: 5
            }
        );
        assert_eq!(mock.is_sealed(ADDR), Some(true));
    }

    #[tokio::test]
    async fn test_keys_sent_in_configured_order() {
        let mock = Arc::new(MockVaultClient::new());
        mock.add_sealed(ADDR, 3);
        let (sequencer, _) = sequencer(&mock);
        let keys = UnsealKeySet::new(vec!["c".into(), "a".into(), "b".into()]).unwrap();

        sequencer.unseal(ADDR, &keys).await.unwrap();

        assert_eq!(mock.unseal_keys_sent(ADDR), vec!["c", "a", "b"]);
        assert_eq!(mock.is_sealed(ADDR), Some(false));
    }
}
