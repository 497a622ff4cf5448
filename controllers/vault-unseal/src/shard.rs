//! Shard ownership.
//!
//! Every reconciler replica sees every pod event. Each one acts only on the pods
//! its shard owns, so no two replicas unseal the same pod.

use crate::error::ConfigError;
use crate::pod::PodIdentity;
use sha2::{Digest, Sha256};
use std::fmt;

/// Decides whether this replica owns a pod.
pub trait ShardFilter: Send + Sync + fmt::Debug {
    /// Pure and deterministic for a given identity.
    fn owns(&self, identity: &PodIdentity) -> bool;
}

/// Resolved shard position of this replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardConfig {
    /// This replica's index, `< count`
    pub index: u64,
    /// Total number of replicas
    pub count: u64,
}

impl ShardConfig {
    /// Validated shard position.
    pub fn new(index: u64, count: u64) -> Result<Self, ConfigError> {
        if count == 0 {
            return Err(ConfigError::Shard("SHARD_COUNT must be at least 1".to_string()));
        }
        if index >= count {
            return Err(ConfigError::Shard(format!(
                "shard index {index} out of range for {count} shards"
            )));
        }
        Ok(Self { index, count })
    }

    /// Resolve from `SHARD_COUNT`, `SHARD_INDEX`, `POD_NAME` and `HOSTNAME`.
    ///
    /// With a single shard the index is always 0. Otherwise an explicit
    /// `SHARD_INDEX` wins, then the StatefulSet ordinal of the pod name.
    pub fn resolve<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let count = match lookup("SHARD_COUNT") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                key: "SHARD_COUNT".to_string(),
                reason: e.to_string(),
            })?,
            None => 1,
        };

        if count == 1 {
            return Self::new(0, 1);
        }

        let index = if let Some(raw) = lookup("SHARD_INDEX") {
            raw.trim().parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                key: "SHARD_INDEX".to_string(),
                reason: e.to_string(),
            })?
        } else {
            let hostname = lookup("POD_NAME")
                .or_else(|| lookup("HOSTNAME"))
                .ok_or_else(|| {
                    ConfigError::Shard(
                        "SHARD_COUNT > 1 requires SHARD_INDEX, POD_NAME or HOSTNAME".to_string(),
                    )
                })?;
            ordinal_from_hostname(&hostname).ok_or_else(|| {
                ConfigError::Shard(format!("cannot derive shard index from hostname {hostname}"))
            })?
        };

        Self::new(index, count)
    }
}

/// StatefulSet ordinal of a pod name: `vault-unseal-2` gives 2.
pub fn ordinal_from_hostname(hostname: &str) -> Option<u64> {
    let (_, suffix) = hostname.trim().rsplit_once('-')?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Hash-based shard: SHA-256 of `namespace/name`, first 8 bytes big-endian, modulo count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashShard {
    config: ShardConfig,
}

impl HashShard {
    /// Shard filter for a resolved position.
    pub fn new(config: ShardConfig) -> Self {
        Self { config }
    }

    /// Shard slot of an identity, stable across processes
    pub fn slot(identity: &PodIdentity, count: u64) -> u64 {
        let digest = Sha256::digest(identity.to_string().as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(prefix) % count.max(1)
    }
}

impl ShardFilter for HashShard {
    fn owns(&self, identity: &PodIdentity) -> bool {
        if self.config.count == 1 {
            return true;
        }
        Self::slot(identity, self.config.count) == self.config.index
    }
}
