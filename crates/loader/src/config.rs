//! Loader configuration and the environment activation gate.

use std::path::PathBuf;

use crate::cache::ComposeCache;
use crate::retry::RetryConfig;
use crate::{Error, Result};

/// Environment variable that enables the OCI remote loader.
pub const OCI_REMOTE_ENV: &str = "CONFLUX_EXPERIMENTAL_OCI_REMOTE";

/// Check whether the OCI remote loader is enabled.
///
/// Unset or empty means disabled. Any value that is not a boolean is an
/// error, reported before any network activity.
pub fn oci_remote_enabled() -> Result<bool> {
    match std::env::var(OCI_REMOTE_ENV) {
        Ok(value) if value.is_empty() => Ok(false),
        Ok(value) => parse_bool(&value).ok_or(Error::InvalidEnv {
            name: OCI_REMOTE_ENV.to_string(),
            value,
        }),
        Err(std::env::VarError::NotPresent) => Ok(false),
        Err(std::env::VarError::NotUnicode(raw)) => Err(Error::InvalidEnv {
            name: OCI_REMOTE_ENV.to_string(),
            value: raw.to_string_lossy().into_owned(),
        }),
    }
}

/// Parse the boolean spellings accepted for feature flags.
#[must_use]
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// Configuration for remote loaders.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Root of the on-disk cache.
    pub cache_root: PathBuf,
    /// Skip remote sources instead of fetching them.
    pub offline: bool,
    /// Retry policy for registry requests.
    pub retry: RetryConfig,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            cache_root: ComposeCache::default_root(),
            offline: false,
            retry: RetryConfig::default(),
        }
    }
}

impl LoaderConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache root.
    #[must_use]
    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = root.into();
        self
    }

    /// Set offline mode.
    #[must_use]
    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// The cache described by this configuration.
    #[must_use]
    pub fn cache(&self) -> ComposeCache {
        ComposeCache::new(self.cache_root.clone())
    }
}
