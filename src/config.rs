//! Configuration management for the caching executor

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Upper bound, in seconds, for the duration settings
pub const MAX_DELTA_SECONDS: u64 = 2_147_483_648;

/// Configuration for the caching executor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Largest response body, in bytes, that will be buffered and stored (default: 8KB)
    ///
    /// Bodies growing past this limit are streamed to the client instead.
    #[serde(default = "default_max_object_size")]
    pub max_object_size: usize,

    /// Whether the cache is shared between users (default: true)
    ///
    /// A shared cache honours `s-maxage` and `proxy-revalidate` and refuses
    /// to store `private` responses.
    #[serde(default = "default_true")]
    pub shared_cache: bool,

    /// Whether heuristic freshness may be assigned to responses without
    /// explicit expiration (default: false)
    #[serde(default)]
    pub heuristic_caching_enabled: bool,

    /// Fraction of the `Last-Modified` age used as heuristic lifetime (default: 0.1)
    #[serde(default = "default_heuristic_coefficient")]
    pub heuristic_coefficient: f32,

    /// Heuristic lifetime in seconds when `Last-Modified` is absent (default: 0)
    #[serde(default)]
    pub heuristic_default_lifetime: u64,

    /// Tolerated clock skew in seconds before a revalidation response is
    /// considered older than the entry it validates (default: 0)
    #[serde(default)]
    pub revalidation_clock_skew: u64,

    /// Capacity, in chunks, of the channel used to replay an oversized body (default: 16)
    #[serde(default = "default_stream_buffer_chunks")]
    pub stream_buffer_chunks: usize,

    /// Timeout in seconds for calls made by the bundled upstream client (default: 30)
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout: u64,
}

// Default value functions for serde
fn default_max_object_size() -> usize {
    8192
}

fn default_true() -> bool {
    true
}

fn default_heuristic_coefficient() -> f32 {
    0.1
}

fn default_stream_buffer_chunks() -> usize {
    16
}

fn default_upstream_timeout() -> u64 {
    30
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_object_size: default_max_object_size(),
            shared_cache: default_true(),
            heuristic_caching_enabled: false,
            heuristic_coefficient: default_heuristic_coefficient(),
            heuristic_default_lifetime: 0,
            revalidation_clock_skew: 0,
            stream_buffer_chunks: default_stream_buffer_chunks(),
            upstream_timeout: default_upstream_timeout(),
        }
    }
}

impl CacheConfig {
    /// Load configuration from a YAML file
    ///
    /// # Arguments
    /// * `path` - Path to the YAML configuration file
    ///
    /// # Returns
    /// * `Ok(CacheConfig)` if loading and validation succeed
    /// * `Err(CacheError)` if file cannot be read or config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            CacheError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: CacheConfig = serde_yaml::from_str(content).map_err(|e| {
            CacheError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - max_object_size must be > 0
    /// - heuristic_coefficient must be between 0.0 and 1.0
    /// - stream_buffer_chunks must be > 0
    /// - upstream_timeout must be > 0
    /// - revalidation_clock_skew and heuristic_default_lifetime must not exceed MAX_DELTA_SECONDS
    pub fn validate(&self) -> Result<()> {
        if self.max_object_size == 0 {
            return Err(CacheError::ConfigError(
                "max_object_size must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.heuristic_coefficient) {
            return Err(CacheError::ConfigError(format!(
                "heuristic_coefficient must be between 0.0 and 1.0, got {}",
                self.heuristic_coefficient
            )));
        }

        if self.stream_buffer_chunks == 0 {
            return Err(CacheError::ConfigError(
                "stream_buffer_chunks must be greater than 0".to_string(),
            ));
        }

        if self.upstream_timeout == 0 {
            return Err(CacheError::ConfigError(
                "upstream_timeout must be greater than 0".to_string(),
            ));
        }

        if self.revalidation_clock_skew > MAX_DELTA_SECONDS {
            return Err(CacheError::ConfigError(format!(
                "revalidation_clock_skew must be at most {}, got {}",
                MAX_DELTA_SECONDS, self.revalidation_clock_skew
            )));
        }

        if self.heuristic_default_lifetime > MAX_DELTA_SECONDS {
            return Err(CacheError::ConfigError(format!(
                "heuristic_default_lifetime must be at most {}, got {}",
                MAX_DELTA_SECONDS, self.heuristic_default_lifetime
            )));
        }

        Ok(())
    }

    /// Create a new CacheConfig with a custom object size limit
    pub fn new(max_object_size: usize) -> Result<Self> {
        let config = CacheConfig {
            max_object_size,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Allowed clock skew for revalidation responses
    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.revalidation_clock_skew)
    }

    /// Heuristic lifetime used when no `Last-Modified` is available
    pub fn heuristic_default_lifetime(&self) -> Duration {
        Duration::from_secs(self.heuristic_default_lifetime)
    }
}
