//! Configuration for the gRPC mock engine.
//!
//! Defines where mocks live, how handler identities map onto files, and
//! logging settings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration for the mock engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Root directory of the mock store
    #[serde(default = "default_mocks_dir")]
    pub mocks_dir: PathBuf,

    /// Extension of mock files (without the dot)
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Directory name standing in for any segment in fallback lookups
    #[serde(default = "default_wildcard")]
    pub wildcard: String,

    /// Literal token separating frames of a server-streaming mock
    #[serde(default = "default_stream_separator")]
    pub stream_separator: String,

    /// Whether to climb the wildcard fallback chain when no exact mock exists
    #[serde(default = "default_true")]
    pub fallback: bool,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mocks_dir: default_mocks_dir(),
            extension: default_extension(),
            wildcard: default_wildcard(),
            stream_separator: default_stream_separator(),
            fallback: true,
            settings: GlobalSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.extension.is_empty() {
            anyhow::bail!("extension cannot be empty");
        }
        if self.extension.starts_with('.') {
            anyhow::bail!("extension must not start with a dot: {}", self.extension);
        }
        if self.wildcard.is_empty() {
            anyhow::bail!("wildcard cannot be empty");
        }
        if self.wildcard.contains(['/', '\\']) || self.wildcard == "." || self.wildcard == ".." {
            anyhow::bail!("wildcard must be a single path segment: {}", self.wildcard);
        }
        if self.stream_separator.trim().is_empty() {
            anyhow::bail!("stream_separator cannot be blank");
        }
        Ok(())
    }
}

fn default_mocks_dir() -> PathBuf {
    PathBuf::from("./grpc/mocks")
}

fn default_extension() -> String {
    "mock".to_string()
}

fn default_wildcard() -> String {
    "__".to_string()
}

fn default_stream_separator() -> String {
    "====".to_string()
}

fn default_true() -> bool {
    true
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Log every resolved mock
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log calls with no mock
    #[serde(default = "default_true")]
    pub log_unmatched: bool,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            log_matches: true,
            log_unmatched: true,
        }
    }
}
