//! Mock VaultClient for unit testing
//!
//! Simulates one or more Vault servers in memory. Each simulated server tracks
//! its own quorum progress the same way Vault does: every accepted key share
//! increments `progress`, and reaching the threshold unseals the server.
//! Every call is recorded so tests can assert exactly which requests were made.

use crate::error::VaultError;
use crate::models::SealStatus;
use crate::vault_trait::VaultClientTrait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A request observed by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `GET /v1/sys/seal-status`
    SealStatus {
        /// Target address
        address: String,
    },
    /// `PUT /v1/sys/unseal`
    Unseal {
        /// Target address
        address: String,
        /// Submitted key share
        key: String,
    },
}

#[derive(Debug, Clone)]
struct MockVault {
    sealed: bool,
    threshold: u32,
    shares: u32,
    progress: u32,
    fail_seal_status: bool,
    fail_unseal_at: Option<usize>,
    unseal_calls: usize,
}

impl MockVault {
    fn status(&self) -> SealStatus {
        SealStatus {
            sealed: self.sealed,
            t: self.threshold,
            n: self.shares,
            progress: self.progress,
            seal_type: Some("shamir".to_string()),
            initialized: Some(true),
            version: None,
        }
    }
}

/// Mock VaultClient for testing
///
/// Unknown addresses answer with a 503 `VaultError::Api`, which the controller
/// treats like any other transient failure.
#[derive(Clone, Default)]
pub struct MockVaultClient {
    vaults: Arc<Mutex<HashMap<String, MockVault>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl std::fmt::Debug for MockVaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockVaultClient").finish_non_exhaustive()
    }
}

impl MockVaultClient {
    /// Create a new mock client with no servers
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sealed server at `address` that unseals after `threshold` key shares
    pub fn add_sealed(&self, address: impl Into<String>, threshold: u32) {
        self.insert(address.into(), true, threshold);
    }

    /// Add an already unsealed server at `address`
    pub fn add_unsealed(&self, address: impl Into<String>) {
        self.insert(address.into(), false, 3);
    }

    /// Make `sys/seal-status` fail for `address` until cleared
    pub fn set_seal_status_failure(&self, address: &str, fail: bool) {
        if let Some(vault) = self.vaults.lock().unwrap().get_mut(address) {
            vault.fail_seal_status = fail;
        }
    }

    /// Make the `n`-th (1-based) `sys/unseal` call against `address` fail
    pub fn fail_unseal_at(&self, address: &str, n: usize) {
        if let Some(vault) = self.vaults.lock().unwrap().get_mut(address) {
            vault.fail_unseal_at = Some(n);
        }
    }

    /// Seal a server again, as happens after a Vault restart
    pub fn reseal(&self, address: &str) {
        if let Some(vault) = self.vaults.lock().unwrap().get_mut(address) {
            vault.sealed = true;
            vault.progress = 0;
        }
    }

    /// Whether the server at `address` is currently sealed
    pub fn is_sealed(&self, address: &str) -> Option<bool> {
        self.vaults.lock().unwrap().get(address).map(|v| v.sealed)
    }

    /// All recorded calls, in order
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Keys submitted to `address`, in order
    pub fn unseal_keys_sent(&self, address: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MockCall::Unseal { address: a, key } if a == address => Some(key),
                _ => None,
            })
            .collect()
    }

    /// Number of seal status queries against `address`
    pub fn seal_status_count(&self, address: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, MockCall::SealStatus { address: a } if a == address))
            .count()
    }

    /// Number of unseal submissions across all addresses
    pub fn total_unseal_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, MockCall::Unseal { .. }))
            .count()
    }

    fn insert(&self, address: String, sealed: bool, threshold: u32) {
        self.vaults.lock().unwrap().insert(
            address,
            MockVault {
                sealed,
                threshold,
                shares: threshold.max(5),
                progress: 0,
                fail_seal_status: false,
                fail_unseal_at: None,
                unseal_calls: 0,
            },
        );
    }

    fn unavailable(address: &str) -> VaultError {
        VaultError::Api {
            status: 503,
            body: format!("no mock vault at {address}"),
        }
    }
}

#[async_trait::async_trait]
impl VaultClientTrait for MockVaultClient {
    async fn seal_status(&self, address: &str) -> Result<SealStatus, VaultError> {
        self.calls.lock().unwrap().push(MockCall::SealStatus {
            address: address.to_string(),
        });

        let vaults = self.vaults.lock().unwrap();
        match vaults.get(address) {
            Some(vault) if !vault.fail_seal_status => Ok(vault.status()),
            _ => Err(Self::unavailable(address)),
        }
    }

    async fn unseal(&self, address: &str, key: &str) -> Result<SealStatus, VaultError> {
        self.calls.lock().unwrap().push(MockCall::Unseal {
            address: address.to_string(),
            key: key.to_string(),
        });

        let mut vaults = self.vaults.lock().unwrap();
        let Some(vault) = vaults.get_mut(address) else {
            return Err(Self::unavailable(address));
        };

        vault.unseal_calls += 1;
        if vault.fail_unseal_at == Some(vault.unseal_calls) {
            return Err(Self::unavailable(address));
        }

        if vault.sealed {
            vault.progress += 1;
            if vault.progress >= vault.threshold {
                vault.sealed = false;
                vault.progress = 0;
            }
        }

        Ok(vault.status())
    }
}
