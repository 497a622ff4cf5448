//! Controller-specific error types.
//!
//! Startup problems (`Config`, `Kube`, the first `Watch`) end the process with a
//! non-zero exit. Per-pod failures never surface here: they are turned into
//! retries or terminal task outcomes by the reconciler.

use thiserror::Error;
use kube::Error as KubeError;
use vault_client::VaultError;

/// Errors that can occur in the Vault unseal controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Vault API error
    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Task queue rejected work
    #[error("Task scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Metrics registration failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No unseal keys were configured at all
    #[error("no keys provided")]
    NoKeys,

    /// Fewer keys than the minimum quorum size
    #[error("not enough keys: got {got}, need at least {min}")]
    NotEnoughKeys {
        /// Number of keys configured
        got: usize,
        /// Minimum accepted
        min: usize,
    },

    /// More keys than the maximum quorum size
    #[error("too many keys: got {got}, at most {max} allowed")]
    TooManyKeys {
        /// Number of keys configured
        got: usize,
        /// Maximum accepted
        max: usize,
    },

    /// A variable or file field had an unusable value
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable or field name
        key: String,
        /// What was wrong with it
        reason: String,
    },

    /// Config file could not be read
    #[error("failed to read config file {path}: {source}")]
    File {
        /// Path that was read
        path: String,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Config file could not be parsed
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path that was parsed
        path: String,
        /// Underlying parse error
        source: serde_yaml::Error,
    },

    /// Shard ownership could not be resolved
    #[error("shard configuration error: {0}")]
    Shard(String),
}

/// Errors returned when submitting work to the scheduler.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// Too many pods are already tracked
    #[error("task queue full ({capacity} pods tracked)")]
    Full {
        /// Configured capacity
        capacity: usize,
    },

    /// Scheduler has shut down
    #[error("task queue closed")]
    Closed,
}
