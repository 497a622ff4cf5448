//! Vault API client
//!
//! Implements the `sys/seal-status` and `sys/unseal` calls against an arbitrary
//! Vault address. One `reqwest::Client` (and its connection pool) is shared
//! across all target replicas.

use crate::error::VaultError;
use crate::models::{SealStatus, UnsealRequest};
use crate::vault_trait::VaultClientTrait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

const SEAL_STATUS_PATH: &str = "/v1/sys/seal-status";
const UNSEAL_PATH: &str = "/v1/sys/unseal";

/// Maximum number of body characters kept in `VaultError::Api`
const ERROR_BODY_LIMIT: usize = 500;

/// Vault API client
#[derive(Debug, Clone)]
pub struct VaultClient {
    client: Client,
}

impl VaultClient {
    /// Create a new Vault client
    ///
    /// # Arguments
    /// * `timeout` - Per-request timeout applied to every call
    pub fn new(timeout: Duration) -> Result<Self, VaultError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self { client })
    }

    /// Build the full URL for `path` on the server at `address`.
    ///
    /// Rejects anything that is not an `http://` or `https://` URL so that a
    /// malformed pod address surfaces as a clear error rather than a connect failure.
    pub fn endpoint(address: &str, path: &str) -> Result<String, VaultError> {
        let address = address.trim();
        if !(address.starts_with("http://") || address.starts_with("https://")) {
            return Err(VaultError::InvalidAddress(address.to_string()));
        }
        Ok(format!("{}{}", address.trim_end_matches('/'), path))
    }

    /// Decode a seal status response, mapping non-success codes to `VaultError::Api`
    async fn decode_status(response: reqwest::Response) -> Result<SealStatus, VaultError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(VaultError::Api {
                status: status.as_u16(),
                body: body.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait::async_trait]
impl VaultClientTrait for VaultClient {
    async fn seal_status(&self, address: &str) -> Result<SealStatus, VaultError> {
        let url = Self::endpoint(address, SEAL_STATUS_PATH)?;
        debug!(url = %url, "Querying seal status");

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?;

        Self::decode_status(response).await
    }

    async fn unseal(&self, address: &str, key: &str) -> Result<SealStatus, VaultError> {
        let url = Self::endpoint(address, UNSEAL_PATH)?;
        debug!(url = %url, "Submitting unseal key");

        let response = self
            .client
            .put(&url)
            .header("Accept", "application/json")
            .json(&UnsealRequest { key })
            .send()
            .await?;

        Self::decode_status(response).await
    }
}
