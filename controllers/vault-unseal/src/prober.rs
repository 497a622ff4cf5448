//! Seal state probe.

use std::sync::Arc;
use tracing::debug;
use vault_client::{SealStatus, VaultClientTrait, VaultError};

/// Queries whether a Vault replica is sealed.
#[derive(Clone)]
pub struct SealProber {
    client: Arc<dyn VaultClientTrait>,
}

impl std::fmt::Debug for SealProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealProber").finish_non_exhaustive()
    }
}

impl SealProber {
    /// Creates a prober using `client`.
    pub fn new(client: Arc<dyn VaultClientTrait>) -> Self {
        Self { client }
    }

    /// `GET {address}/v1/sys/seal-status`
    pub async fn probe(&self, address: &str) -> Result<SealStatus, VaultError> {
        let status = self.client.seal_status(address).await?;
        debug!(
            addr = address,
            sealed = status.sealed,
            progress = %status.progress_display(),
            "Seal status"
        );
        Ok(status)
    }
}
