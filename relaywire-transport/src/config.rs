//! Transport configuration.

use relaywire_codec::{DecodeOptions, EncodeOptions, DEFAULT_MAX_DEPTH};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Transport configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Delay between the first enqueue and the flush of a batch queue.
    pub batch_interval_ms: u64,
    /// Queue size that triggers an immediate flush.
    pub max_batch_size: usize,
    /// Age after which the sweeper force-flushes a queue.
    pub max_batch_wait_ms: u64,
    /// Encoded size (bytes) at which compression is attempted.
    pub compression_threshold: usize,
    /// Always attempt compression for single messages.
    pub force_compress_single: bool,
    /// Always attempt compression for batches.
    pub force_compress_batch: bool,
    /// Codec nesting limit.
    pub max_depth: usize,
    /// Emit a trace record per transmission.
    pub debug: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            batch_interval_ms: 30,
            max_batch_size: 50,
            max_batch_wait_ms: 100,
            compression_threshold: 256,
            force_compress_single: false,
            force_compress_batch: false,
            max_depth: DEFAULT_MAX_DEPTH,
            debug: false,
        }
    }
}

impl TransportConfig {
    /// Applies `RELAYWIRE_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(interval) = std::env::var("RELAYWIRE_BATCH_INTERVAL_MS") {
            if let Ok(ms) = interval.parse() {
                self.batch_interval_ms = ms;
            }
        }

        if let Ok(size) = std::env::var("RELAYWIRE_MAX_BATCH_SIZE") {
            if let Ok(n) = size.parse() {
                self.max_batch_size = n;
            }
        }

        if let Ok(wait) = std::env::var("RELAYWIRE_MAX_BATCH_WAIT_MS") {
            if let Ok(ms) = wait.parse() {
                self.max_batch_wait_ms = ms;
            }
        }

        if let Ok(threshold) = std::env::var("RELAYWIRE_COMPRESSION_THRESHOLD") {
            if let Ok(n) = threshold.parse() {
                self.compression_threshold = n;
            }
        }

        if let Ok(force) = std::env::var("RELAYWIRE_FORCE_COMPRESS_SINGLE") {
            self.force_compress_single = force == "1" || force.to_lowercase() == "true";
        }

        if let Ok(force) = std::env::var("RELAYWIRE_FORCE_COMPRESS_BATCH") {
            self.force_compress_batch = force == "1" || force.to_lowercase() == "true";
        }

        if let Ok(depth) = std::env::var("RELAYWIRE_MAX_DEPTH") {
            if let Ok(n) = depth.parse() {
                self.max_depth = n;
            }
        }

        if let Ok(debug) = std::env::var("RELAYWIRE_DEBUG") {
            self.debug = debug == "1" || debug.to_lowercase() == "true";
        }
    }

    /// Validates transport configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "max_batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_depth == 0 {
            return Err(ConfigError::ValidationError(
                "max_depth must be at least 1".to_string(),
            ));
        }
        if self.max_batch_wait_ms < self.batch_interval_ms {
            return Err(ConfigError::ValidationError(format!(
                "max_batch_wait_ms ({}) is shorter than batch_interval_ms ({})",
                self.max_batch_wait_ms, self.batch_interval_ms
            )));
        }
        Ok(())
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    pub fn max_batch_wait(&self) -> Duration {
        Duration::from_millis(self.max_batch_wait_ms)
    }

    /// Returns whether compression is attempted regardless of size.
    pub fn force_compress(&self, is_batch: bool) -> bool {
        if is_batch {
            self.force_compress_batch
        } else {
            self.force_compress_single
        }
    }

    pub fn encode_options(&self) -> EncodeOptions {
        EncodeOptions::default().with_max_depth(self.max_depth)
    }

    pub fn decode_options(&self) -> DecodeOptions {
        DecodeOptions::default().with_max_depth(self.max_depth)
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.batch_interval(), Duration::from_millis(30));
        assert_eq!(config.max_batch_size, 50);
        assert_eq!(config.max_batch_wait(), Duration::from_millis(100));
        assert_eq!(config.compression_threshold, 256);
        assert!(!config.force_compress(false));
        assert!(!config.force_compress(true));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let config = TransportConfig {
            max_batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let config = TransportConfig {
            batch_interval_ms: 200,
            max_batch_wait_ms: 100,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_batch_wait_ms"));

        let config = TransportConfig {
            max_depth: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_codec_options_follow_depth() {
        let config = TransportConfig {
            max_depth: 7,
            ..Default::default()
        };
        assert_eq!(config.encode_options().max_depth, 7);
        assert_eq!(config.decode_options().max_depth, 7);
    }
}
