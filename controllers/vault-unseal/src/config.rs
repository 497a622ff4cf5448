//! Controller configuration.
//!
//! Assembled once at startup from environment variables and an optional
//! YAML/JSON file, then shared read-only. Environment variables take precedence
//! over the file; the file takes precedence over built-in defaults. Unseal keys
//! come from the file's `unsealKeys`, or from `UNSEAL_KEYS` when the file has none.

use crate::backoff::{ExponentialBackoff, RetryPolicy};
use crate::error::ConfigError;
use crate::keys::UnsealKeySet;
use crate::logging::LogFormat;
use crate::shard::ShardConfig;
use serde::Deserialize;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Service account namespace file mounted into every pod
pub const NAMESPACE_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

const DEFAULT_CONFIG_PATH: &str = "config.json";
const DEFAULT_TARGET_NAMESPACE: &str = "vault";
const DEFAULT_TARGET_SERVICE: &str = "vault";
const DEFAULT_DEPLOYED_NAMESPACE: &str = "default";

/// Contents of the config file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileConfig {
    #[serde(default)]
    unseal_keys: Vec<String>,
    namespace: Option<String>,
    target_service: Option<String>,
}

/// Immutable controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace the Vault pods run in
    pub namespace: String,
    /// `app.kubernetes.io/name` of the Vault pods
    pub target_service: String,
    /// Namespace this controller is deployed in
    pub deployed_namespace: String,
    /// Unseal key shares
    pub keys: Arc<UnsealKeySet>,
    /// Worker pool size
    pub workers: usize,
    /// Scheduler capacity
    pub max_tracked: usize,
    /// Retry policy for deferred tasks
    pub retry: RetryPolicy,
    /// Shard position of this replica
    pub shard: ShardConfig,
    /// Metrics and probe server port
    pub metrics_port: u16,
    /// Log output format
    pub log_format: LogFormat,
    /// Timeout for Vault HTTP requests
    pub vault_timeout: Duration,
}

impl ControllerConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(
            |key| std::env::var(key).ok(),
            read_deployed_namespace(Path::new(NAMESPACE_FILE)),
        )
    }

    /// Load using `lookup` for variables.
    pub fn load<F>(lookup: F, deployed_namespace: String) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let file = match lookup("CONFIG_PATH") {
            Some(path) => read_file(&path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => read_file(DEFAULT_CONFIG_PATH)?,
            None => FileConfig::default(),
        };

        let keys = if file.unseal_keys.is_empty() {
            lookup("UNSEAL_KEYS")
                .map(|raw| raw.split(',').map(str::to_string).collect())
                .unwrap_or_default()
        } else {
            file.unseal_keys
        };
        let keys = UnsealKeySet::new(keys)?;

        let namespace = lookup("VAULT_NAMESPACE")
            .or(file.namespace)
            .unwrap_or_else(|| DEFAULT_TARGET_NAMESPACE.to_string());
        let target_service = lookup("TARGET_SERVICE")
            .or(file.target_service)
            .unwrap_or_else(|| DEFAULT_TARGET_SERVICE.to_string());

        let workers: usize = parse(&lookup, "WORKER_COUNT", 4)?;
        let max_tracked: usize = parse(&lookup, "MAX_TRACKED_PODS", 1024)?;
        let max_attempts: u32 = parse(&lookup, "RETRY_MAX_ATTEMPTS", 10)?;
        let initial_delay_ms: u64 = parse(&lookup, "RETRY_INITIAL_DELAY_MS", 1000)?;
        let max_delay_secs: u64 = parse(&lookup, "RETRY_MAX_DELAY_SECS", 60)?;
        let metrics_port: u16 = parse(&lookup, "METRICS_PORT", 8080)?;
        let vault_timeout_secs: u64 = parse(&lookup, "VAULT_TIMEOUT_SECS", 10)?;
        let log_format = log_format(&lookup)?;

        require_positive("WORKER_COUNT", workers)?;
        require_positive("MAX_TRACKED_PODS", max_tracked)?;
        require_positive("VAULT_TIMEOUT_SECS", vault_timeout_secs)?;

        let initial = Duration::from_millis(initial_delay_ms);
        let max = Duration::from_secs(max_delay_secs);
        if initial > max {
            return Err(ConfigError::InvalidValue {
                key: "RETRY_INITIAL_DELAY_MS".to_string(),
                reason: format!("initial delay {initial:?} exceeds max delay {max:?}"),
            });
        }

        Ok(Self {
            namespace,
            target_service,
            deployed_namespace,
            keys: Arc::new(keys),
            workers,
            max_tracked,
            retry: RetryPolicy {
                max_attempts,
                backoff: ExponentialBackoff::new(initial, max, 2.0),
            },
            shard: ShardConfig::resolve(lookup)?,
            metrics_port,
            log_format,
            vault_timeout: Duration::from_secs(vault_timeout_secs),
        })
    }
}

/// Log format from `LOG_FORMAT`.
///
/// Read ahead of the full configuration so that logging is installed before
/// anything in [`ControllerConfig::load`] logs.
pub fn log_format<F>(lookup: F) -> Result<LogFormat, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
    parse(&lookup, "LOG_FORMAT", LogFormat::Text)
}

/// [`log_format`] from the process environment.
pub fn log_format_from_env() -> Result<LogFormat, ConfigError> {
    log_format(|key| std::env::var(key).ok())
}

/// Namespace this controller runs in, from the service account mount.
///
/// Falls back to `default` when the file cannot be read.
pub fn read_deployed_namespace(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(contents) if !contents.trim().is_empty() => contents.trim().to_string(),
        Ok(_) => {
            warn!("Namespace file {} is empty, using default", path.display());
            DEFAULT_DEPLOYED_NAMESPACE.to_string()
        }
        Err(e) => {
            warn!(error = %e, "Failed to read namespace file {}, using default", path.display());
            DEFAULT_DEPLOYED_NAMESPACE.to_string()
        }
    }
}

fn read_file(path: &str) -> Result<FileConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::File {
        path: path.to_string(),
        source,
    })?;
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_string(),
        source,
    })
}

fn parse<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn require_positive<T: PartialEq + Default>(key: &str, value: T) -> Result<(), ConfigError> {
    if value == T::default() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn config_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_with_env_keys() {
        let config = ControllerConfig::load(env(&[("UNSEAL_KEYS", "a,b,c")]), "ops".to_string()).unwrap();

        assert_eq!(config.namespace, "vault");
        assert_eq!(config.target_service, "vault");
        assert_eq!(config.deployed_namespace, "ops");
        assert_eq!(config.keys.iter().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(config.workers, 4);
        assert_eq!(config.max_tracked, 1024);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.shard, ShardConfig { index: 0, count: 1 });
        assert_eq!(config.metrics_port, 8080);
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.vault_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_json_file_keys() {
        let file = config_file(r#"{"unsealKeys": ["k1", "k2", "k3", "k4"], "namespace": "secrets"}"#);
        let path = file.path().to_str().unwrap();

        let config = ControllerConfig::load(env(&[("CONFIG_PATH", path)]), "ops".to_string()).unwrap();

        assert_eq!(config.keys.len(), 4);
        assert_eq!(config.namespace, "secrets");
    }

    #[test]
    fn test_yaml_file_and_env_override() {
        let file = config_file("unsealKeys:\n  - k1\n  - k2\n  - k3\ntargetService: vault-ha\nnamespace: secrets\n");
        let path = file.path().to_str().unwrap();

        let config = ControllerConfig::load(
            env(&[("CONFIG_PATH", path), ("VAULT_NAMESPACE", "vault-prod"), ("UNSEAL_KEYS", "x,y,z,w,v")]),
            "ops".to_string(),
        )
        .unwrap();

        assert_eq!(config.namespace, "vault-prod");
        assert_eq!(config.target_service, "vault-ha");
        // File keys win over the env fallback
        assert_eq!(config.keys.iter().collect::<Vec<_>>(), vec!["k1", "k2", "k3"]);
    }

    #[test]
    fn test_key_count_is_validated() {
        let err = ControllerConfig::load(env(&[("UNSEAL_KEYS", "a,b")]), "ops".to_string()).unwrap_err();
        assert!(matches!(err, ConfigError::NotEnoughKeys { got: 2, .. }));

        let err =
            ControllerConfig::load(env(&[("UNSEAL_KEYS", "a,b,c,d,e,f")]), "ops".to_string()).unwrap_err();
        assert!(matches!(err, ConfigError::TooManyKeys { got: 6, .. }));

        let file = config_file(r#"{"namespace": "vault"}"#);
        let path = file.path().to_str().unwrap();
        let err = ControllerConfig::load(env(&[("CONFIG_PATH", path)]), "ops".to_string()).unwrap_err();
        assert!(matches!(err, ConfigError::NoKeys));
    }

    #[test]
    fn test_missing_explicit_file_is_fatal() {
        let err = ControllerConfig::load(
            env(&[("CONFIG_PATH", "/nonexistent/vault-unseal.json"), ("UNSEAL_KEYS", "a,b,c")]),
            "ops".to_string(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::File { .. }));
    }

    #[test]
    fn test_malformed_file_is_fatal() {
        let file = config_file("unsealKeys: [unterminated");
        let path = file.path().to_str().unwrap();
        let err = ControllerConfig::load(env(&[("CONFIG_PATH", path)]), "ops".to_string()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_numeric_overrides() {
        let config = ControllerConfig::load(
            env(&[
                ("UNSEAL_KEYS", "a,b,c"),
                ("WORKER_COUNT", "8"),
                ("MAX_TRACKED_PODS", "32"),
                ("RETRY_MAX_ATTEMPTS", "5"),
                ("RETRY_INITIAL_DELAY_MS", "500"),
                ("RETRY_MAX_DELAY_SECS", "30"),
                ("METRICS_PORT", "9090"),
                ("LOG_FORMAT", "json"),
                ("SHARD_COUNT", "3"),
                ("POD_NAME", "vault-unseal-2"),
            ]),
            "ops".to_string(),
        )
        .unwrap();

        assert_eq!(config.workers, 8);
        assert_eq!(config.max_tracked, 32);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.delay_for(1), Duration::from_millis(500));
        assert_eq!(config.retry.delay_for(10), Duration::from_secs(30));
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.shard, ShardConfig { index: 2, count: 3 });
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let err = ControllerConfig::load(
            env(&[("UNSEAL_KEYS", "a,b,c"), ("WORKER_COUNT", "zero")]),
            "ops".to_string(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "WORKER_COUNT"));

        let err = ControllerConfig::load(
            env(&[("UNSEAL_KEYS", "a,b,c"), ("WORKER_COUNT", "0")]),
            "ops".to_string(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "WORKER_COUNT"));

        let err = ControllerConfig::load(
            env(&[("UNSEAL_KEYS", "a,b,c"), ("LOG_FORMAT", "xml")]),
            "ops".to_string(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "LOG_FORMAT"));
    }

    #[test]
    fn test_log_format_is_read_on_its_own() {
        assert_eq!(log_format(env(&[])).unwrap(), LogFormat::Text);
        assert_eq!(log_format(env(&[("LOG_FORMAT", " ")])).unwrap(), LogFormat::Text);
        assert_eq!(log_format(env(&[("LOG_FORMAT", "json")])).unwrap(), LogFormat::Json);

        let err = log_format(env(&[("LOG_FORMAT", "xml")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "LOG_FORMAT"));
    }

    #[test]
    fn test_deployed_namespace_is_trimmed() {
        let file = config_file("vault-system\n");
        assert_eq!(read_deployed_namespace(file.path()), "vault-system");
    }

    #[test]
    fn test_deployed_namespace_defaults_when_unreadable() {
        assert_eq!(
            read_deployed_namespace(Path::new("/nonexistent/namespace")),
            "default"
        );
    }
}
