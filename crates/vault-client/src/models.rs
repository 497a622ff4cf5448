//! Vault API models

use serde::{Deserialize, Serialize};

/// Seal state of a Vault server.
///
/// Returned by both `sys/seal-status` and `sys/unseal`. Only `sealed`, `t` and
/// `progress` drive the unseal flow; the remaining fields are kept for logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SealStatus {
    /// Whether the server is currently sealed
    pub sealed: bool,

    /// Threshold: number of key shares required to unseal
    #[serde(default)]
    pub t: u32,

    /// Total number of key shares
    #[serde(default)]
    pub n: u32,

    /// Number of key shares accepted so far in the current attempt
    #[serde(default)]
    pub progress: u32,

    /// Seal type (`shamir`, `awskms`, ...)
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub seal_type: Option<String>,

    /// Whether the server has been initialized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialized: Option<bool>,

    /// Vault version string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl SealStatus {
    /// Threshold alias for `t`
    #[must_use]
    pub fn threshold(&self) -> u32 {
        self.t
    }

    /// Progress formatted as `progress/threshold`
    #[must_use]
    pub fn progress_display(&self) -> String {
        format!("{}/{}", self.progress, self.t)
    }
}

/// Body of a `PUT /v1/sys/unseal` request
#[derive(Debug, Clone, Serialize)]
pub struct UnsealRequest<'a> {
    /// A single unseal key share
    pub key: &'a str,
}
