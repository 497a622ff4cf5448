//! VaultClient trait for mocking
//!
//! The controller only depends on this trait, so unit tests can swap in
//! `MockVaultClient` (feature `test-util`) instead of a live Vault.

use crate::error::VaultError;
use crate::models::SealStatus;

/// Trait for the Vault system operations used during unsealing.
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait VaultClientTrait: Send + Sync {
    /// Query the seal state of the server at `address`
    async fn seal_status(&self, address: &str) -> Result<SealStatus, VaultError>;

    /// Submit one unseal key share to the server at `address`
    async fn unseal(&self, address: &str, key: &str) -> Result<SealStatus, VaultError>;
}
