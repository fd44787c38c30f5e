//! Scheduler configuration.

use crate::host::SegmentId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Bucket required before attempting to load the payload.
pub const DEFAULT_LOAD_THRESHOLD: u32 = 500;

/// Bucket above which a freshly loaded payload also runs in the same tick.
pub const DEFAULT_HIGH_WATER: u32 = 1000;

/// Segment holding the payload's persisted state.
pub const DEFAULT_SEGMENT: SegmentId = 0;

/// Error loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        /// Path that was read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid configuration JSON.
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        /// Path that was parsed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// The values are inconsistent.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables for the tick scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Minimum bucket to start the load sequence.
    pub load_threshold: u32,
    /// Minimum bucket after loading to run the payload in the same tick.
    pub high_water: u32,
    /// Whether to run the payload in the load tick at all.
    pub run_on_load: bool,
    /// Persisted segment owned by the payload.
    pub segment: SegmentId,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            load_threshold: DEFAULT_LOAD_THRESHOLD,
            high_water: DEFAULT_HIGH_WATER,
            run_on_load: true,
            segment: DEFAULT_SEGMENT,
        }
    }
}

impl SchedulerConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or fails
    /// validation.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values for consistency.
    ///
    /// # Errors
    ///
    /// Returns an error if the high-water mark is below the load threshold.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.high_water < self.load_threshold {
            return Err(ConfigError::Invalid(format!(
                "high_water ({}) is below load_threshold ({})",
                self.high_water, self.load_threshold
            )));
        }
        Ok(())
    }
}
