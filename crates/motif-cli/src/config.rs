//! Configuration file support for Motif
//!
//! Supports both YAML and TOML configuration files.
//!
//! # Example YAML configuration:
//! ```yaml
//! # Counting and mining
//! counting:
//!   occurrence_counting: false
//!   min_support: 5
//!   max_length: 4
//!
//! # Insight tree budgets
//! itree:
//!   max_depth: 3
//!   max_children: 5
//!
//! # Pattern server
//! server:
//!   address: "10.0.0.7:7000"
//!   chunk_root: /var/lib/motif/models
//!   patterns_per_chunk: 500
//!
//! # Logging settings
//! logging:
//!   level: info
//!   format: json
//! ```

use motif_cluster::{ClientConfig, DEFAULT_SERVICE_PREFIX};
use motif_runtime::{CountingConfig, ITreeConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Counting passes and the level-wise miner
    pub counting: CountingConfig,

    /// Insight tree budgets
    pub itree: ITreeConfig,

    /// Pattern server configuration
    pub server: ServerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Pattern server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address this replica registers under
    pub address: String,

    /// Coordination namespace prefix
    pub service_prefix: String,

    /// Registration lease TTL in seconds
    pub lease_ttl_secs: u64,

    /// Root directory of the chunk store
    pub chunk_root: PathBuf,

    /// Patterns per persisted chunk
    pub patterns_per_chunk: usize,

    /// Deadline of one client request in milliseconds
    pub request_deadline_ms: u64,

    /// Pause between retries of a misrouted read in milliseconds
    pub retry_backoff_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:7000".to_string(),
            service_prefix: DEFAULT_SERVICE_PREFIX.to_string(),
            lease_ttl_secs: 15,
            chunk_root: PathBuf::from("motif-models"),
            patterns_per_chunk: 500,
            request_deadline_ms: 5_000,
            retry_backoff_ms: 20,
        }
    }
}

impl ServerConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            request_deadline_ms: self.request_deadline_ms,
            retry_backoff_ms: self.retry_backoff_ms,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl Config {
    /// Load configuration from a file (YAML or TOML, auto-detected by extension)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e.to_string()))?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match extension.as_str() {
            "yaml" | "yml" => Self::from_yaml(&content),
            "toml" => Self::from_toml(&content),
            _ => {
                // Try YAML first, then TOML
                Self::from_yaml(&content).or_else(|_| Self::from_toml(&content))
            }
        }
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Merge another config into this one (other values take precedence where
    /// they differ from the defaults)
    pub fn merge(&mut self, other: Config) {
        let counting = CountingConfig::default();
        if other.counting.occurrence_counting {
            self.counting.occurrence_counting = true;
        }
        if other.counting.algorithm_version != counting.algorithm_version {
            self.counting.algorithm_version = other.counting.algorithm_version;
        }
        if other.counting.histogram != counting.histogram {
            self.counting.histogram = other.counting.histogram;
        }
        if other.counting.min_support != counting.min_support {
            self.counting.min_support = other.counting.min_support;
        }
        if other.counting.max_patterns_per_level != counting.max_patterns_per_level {
            self.counting.max_patterns_per_level = other.counting.max_patterns_per_level;
        }
        if other.counting.max_length != counting.max_length {
            self.counting.max_length = other.counting.max_length;
        }

        let itree = ITreeConfig::default();
        if other.itree.max_candidates != itree.max_candidates {
            self.itree.max_candidates = other.itree.max_candidates;
        }
        if other.itree.max_depth != itree.max_depth {
            self.itree.max_depth = other.itree.max_depth;
        }
        if other.itree.max_children != itree.max_children {
            self.itree.max_children = other.itree.max_children;
        }

        let server = ServerConfig::default();
        if other.server.address != server.address {
            self.server.address = other.server.address;
        }
        if other.server.service_prefix != server.service_prefix {
            self.server.service_prefix = other.server.service_prefix;
        }
        if other.server.lease_ttl_secs != server.lease_ttl_secs {
            self.server.lease_ttl_secs = other.server.lease_ttl_secs;
        }
        if other.server.chunk_root != server.chunk_root {
            self.server.chunk_root = other.server.chunk_root;
        }
        if other.server.patterns_per_chunk != server.patterns_per_chunk {
            self.server.patterns_per_chunk = other.server.patterns_per_chunk;
        }
        if other.server.request_deadline_ms != server.request_deadline_ms {
            self.server.request_deadline_ms = other.server.request_deadline_ms;
        }
        if other.server.retry_backoff_ms != server.retry_backoff_ms {
            self.server.retry_backoff_ms = other.server.retry_backoff_ms;
        }

        let logging = LoggingConfig::default();
        if other.logging.level != logging.level {
            self.logging.level = other.logging.level;
        }
        if other.logging.format != logging.format {
            self.logging.format = other.logging.format;
        }
    }

    /// Create an example configuration
    pub fn example() -> Self {
        Self {
            counting: CountingConfig {
                occurrence_counting: true,
                min_support: 5,
                max_patterns_per_level: 2_000,
                max_length: 4,
                ..Default::default()
            },
            itree: ITreeConfig {
                max_candidates: 100,
                max_depth: 3,
                max_children: 5,
            },
            server: ServerConfig {
                address: "10.0.0.7:7000".to_string(),
                chunk_root: PathBuf::from("/var/lib/motif/models"),
                ..Default::default()
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
            },
        }
    }

    /// Generate example YAML configuration
    pub fn example_yaml() -> String {
        serde_yaml::to_string(&Self::example()).unwrap_or_default()
    }

    /// Generate example TOML configuration
    pub fn example_toml() -> String {
        toml::to_string_pretty(&Self::example()).unwrap_or_default()
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    IoError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.address, "127.0.0.1:7000");
        assert_eq!(config.server.service_prefix, DEFAULT_SERVICE_PREFIX);
        assert_eq!(config.counting.max_length, 4);
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
counting:
  min_support: 10
  histogram:
    max_numeric_bins: 64
server:
  address: "0.0.0.0:7100"
  patterns_per_chunk: 50
logging:
  format: json
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.counting.min_support, 10);
        assert_eq!(config.counting.histogram.max_numeric_bins, 64);
        assert_eq!(config.counting.histogram.max_categorical_tuples, 1024);
        assert_eq!(config.server.address, "0.0.0.0:7100");
        assert_eq!(config.server.patterns_per_chunk, 50);
        assert!(config.logging.is_json());
    }

    #[test]
    fn test_toml_parsing() {
        let toml = r#"
[itree]
max_depth = 5

[server]
lease_ttl_secs = 30
chunk_root = "/data/models"
"#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.itree.max_depth, 5);
        assert_eq!(config.itree.max_children, 5);
        assert_eq!(config.server.lease_ttl(), Duration::from_secs(30));
        assert_eq!(config.server.chunk_root, PathBuf::from("/data/models"));
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config::default();
        let override_config = Config {
            server: ServerConfig {
                patterns_per_chunk: 42,
                ..Default::default()
            },
            ..Default::default()
        };

        base.merge(override_config);
        assert_eq!(base.server.patterns_per_chunk, 42);
        assert_eq!(base.server.address, "127.0.0.1:7000");
    }
}
