//! Vault client errors

use thiserror::Error;

/// Errors that can occur when talking to a Vault server
#[derive(Debug, Error)]
pub enum VaultError {
    /// HTTP request/response error (connection refused, timeout, ...)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Vault answered with a non-success status code
    #[error("Vault API error: {status} - {body}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body, truncated
        body: String,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The target address is not an http(s) URL
    #[error("Invalid Vault address: {0}")]
    InvalidAddress(String),
}
