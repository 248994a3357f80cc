//! Configuration management for xcopy
//!
//! Configuration is layered: built-in defaults, then the first configuration file
//! found (YAML, TOML or JSON), then `XCOPY__SECTION__KEY` environment variables.
//!
//! # Examples
//!
//! ```rust
//! use xcopy_config::ConfigBuilder;
//!
//! let config = ConfigBuilder::new()
//!     .add_defaults()
//!     .add_source_file("xcopy.yaml")
//!     .add_env_prefix("XCOPY")
//!     .build()
//!     .expect("Failed to load configuration");
//!
//! println!("In-flight limit: {}", config.scheduler.max_in_flight.get());
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use xcopy_types::{InFlightLimit, Policies, Policy, PolicyPair};

pub mod builder;
pub mod error;
pub mod loader;

pub use builder::ConfigBuilder;
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

/// Main configuration structure for xcopy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Task scheduling
    pub scheduler: SchedulerSettings,
    /// Default conflict policies for new tasks
    pub policies: PolicyDefaults,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Storage roots for the local backend
    pub backend: BackendConfig,
}

/// Task scheduling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Ceiling on outstanding backend operations per task
    pub max_in_flight: InFlightLimit,
    /// Events buffered per task for slow subscribers
    pub event_capacity: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_in_flight: InFlightLimit::default(),
            event_capacity: 1024,
        }
    }
}

/// Task-wide conflict policies applied where a request leaves a side unset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyDefaults {
    /// File clashes with a file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_same: Option<Policy>,
    /// File clashes with a directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_diff: Option<Policy>,
    /// Directory clashes with a directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir_same: Option<Policy>,
    /// Directory clashes with a file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir_diff: Option<Policy>,
}

impl PolicyDefaults {
    /// Defaults as policy pairs
    pub fn to_policies(&self) -> Policies {
        Policies {
            file: PolicyPair::new(self.file_same, self.file_diff),
            dir: PolicyPair::new(self.dir_same, self.dir_diff),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Enable JSON formatting
    pub json_format: bool,
    /// Enable colored output
    pub colored_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            colored_output: true,
        }
    }
}

/// Storage roots, keyed by the identifier used in task locations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Virtual drives
    pub drives: BTreeMap<String, PathBuf>,
    /// External filesystems
    pub natives: BTreeMap<String, PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.scheduler.max_in_flight.get(), 16);
        assert_eq!(config.scheduler.event_capacity, 1024);
        assert!(config.policies.to_policies().file.is_unset());
        assert_eq!(config.logging.level, "info");
        assert!(config.backend.drives.is_empty());
    }

    #[test]
    fn test_policy_defaults_to_pairs() {
        let defaults = PolicyDefaults {
            dir_same: Some(Policy::Keep),
            file_diff: Some(Policy::Rename),
            ..PolicyDefaults::default()
        };
        let policies = defaults.to_policies();
        assert_eq!(policies.dir, PolicyPair::new(Some(Policy::Keep), None));
        assert_eq!(policies.file, PolicyPair::new(None, Some(Policy::Rename)));
    }
}
