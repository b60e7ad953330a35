//! Configuration types for Tapedeck

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::cassette::RecordMode;
use crate::matchers::DEFAULT_MATCH_ON;
use crate::serializer::serializer_for;
use crate::{Result, TapedeckError};

/// What to do when a real call fails or an unmatched request is refused
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Return the error to the caller
    #[default]
    Propagate,
    /// Return a fabricated 599 response carrying the error message
    Synthesize,
}

/// Storage layout for cassettes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersisterKind {
    /// One file per cassette
    #[default]
    File,
    /// One directory per cassette, one file per interaction
    Directory,
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VcrConfig {
    /// Directory holding cassettes
    pub cassette_dir: PathBuf,
    /// Record mode for new cassettes
    #[serde(default)]
    pub record_mode: RecordMode,
    /// Ordered matcher names
    #[serde(default = "default_match_on")]
    pub match_on: Vec<String>,
    /// Serializer name
    #[serde(default = "default_serializer")]
    pub serializer: String,
    /// Storage layout
    #[serde(default)]
    pub persister: PersisterKind,
    /// Let played interactions match again
    #[serde(default)]
    pub allow_playback_repeats: bool,
    /// Handling of real-call failures and refused requests
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Request filters
    #[serde(default)]
    pub filters: FiltersConfig,
}

fn default_match_on() -> Vec<String> {
    DEFAULT_MATCH_ON.iter().map(ToString::to_string).collect()
}

fn default_serializer() -> String {
    "yaml".to_string()
}

/// Request filter configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FiltersConfig {
    /// Hosts whose requests are never recorded
    #[serde(default)]
    pub ignore_hosts: Vec<String>,
    /// Never record requests to the local machine
    #[serde(default)]
    pub ignore_localhost: bool,
    /// Headers stripped before recording
    #[serde(default)]
    pub filter_headers: Vec<String>,
    /// Query parameters stripped before recording
    #[serde(default)]
    pub filter_query_parameters: Vec<String>,
}

impl VcrConfig {
    /// Configuration with defaults for everything but the cassette directory
    #[must_use]
    pub fn new(cassette_dir: impl Into<PathBuf>) -> Self {
        Self {
            cassette_dir: cassette_dir.into(),
            record_mode: RecordMode::default(),
            match_on: default_match_on(),
            serializer: default_serializer(),
            persister: PersisterKind::default(),
            allow_playback_repeats: false,
            failure_policy: FailurePolicy::default(),
            filters: FiltersConfig::default(),
        }
    }

    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TapedeckError::ConfigError(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| TapedeckError::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// Matcher names are resolved later, when a cassette is built, so that
    /// custom matchers can be registered first.
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        if self.cassette_dir.as_os_str().is_empty() {
            return Err(TapedeckError::ConfigError(
                "cassette_dir cannot be empty".to_string(),
            ));
        }

        if self.match_on.is_empty() {
            return Err(TapedeckError::ConfigError(
                "At least one matcher must be configured".to_string(),
            ));
        }

        for (i, name) in self.match_on.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(TapedeckError::ConfigError(format!(
                    "match_on[{i}]: matcher name cannot be empty"
                )));
            }
        }

        serializer_for(&self.serializer)
            .map_err(|e| TapedeckError::ConfigError(e.to_string()))?;

        for (i, host) in self.filters.ignore_hosts.iter().enumerate() {
            if host.trim().is_empty() {
                return Err(TapedeckError::ConfigError(format!(
                    "filters.ignore_hosts[{i}]: host cannot be empty"
                )));
            }
        }

        Ok(())
    }
}
