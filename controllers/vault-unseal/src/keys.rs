//! Unseal key set.
//!
//! Key shares are loaded once at startup and shared read-only by every worker.

use crate::error::ConfigError;
use std::fmt;

/// Minimum number of key shares accepted at startup
pub const MIN_KEYS: usize = 3;

/// Maximum number of key shares accepted at startup
pub const MAX_KEYS: usize = 5;

/// Ordered, validated set of unseal key shares.
///
/// The length is always within `MIN_KEYS..=MAX_KEYS`. Key material never
/// appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct UnsealKeySet {
    keys: Vec<String>,
}

impl UnsealKeySet {
    /// Validate and wrap a list of key shares, preserving order.
    ///
    /// Surrounding whitespace is trimmed. A blank entry is rejected rather than
    /// silently dropped, because dropping it would change the submission order.
    pub fn new(keys: Vec<String>) -> Result<Self, ConfigError> {
        let keys: Vec<String> = keys.into_iter().map(|k| k.trim().to_string()).collect();

        if keys.is_empty() {
            return Err(ConfigError::NoKeys);
        }
        if keys.len() < MIN_KEYS {
            return Err(ConfigError::NotEnoughKeys {
                got: keys.len(),
                min: MIN_KEYS,
            });
        }
        if keys.len() > MAX_KEYS {
            return Err(ConfigError::TooManyKeys {
                got: keys.len(),
                max: MAX_KEYS,
            });
        }
        if let Some(position) = keys.iter().position(String::is_empty) {
            return Err(ConfigError::InvalidValue {
                key: format!("unsealKeys[{position}]"),
                reason: "key is empty".to_string(),
            });
        }

        Ok(Self { keys })
    }

    /// Keys in submission order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Always false once constructed; present for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl fmt::Debug for UnsealKeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnsealKeySet")
            .field("len", &self.keys.len())
            .finish_non_exhaustive()
    }
}
