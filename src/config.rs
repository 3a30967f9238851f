//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - config.toml (default configuration)
//! - config.local.toml (git-ignored local overrides)
//! - Environment variables (CIRCUITNET_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # config.toml
//! [limits]
//! max_variables = 1000
//!
//! [network]
//! channel_capacity = 0
//! worker_stack_size = 0
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! CIRCUITNET_LIMITS__MAX_VARIABLES=5000
//! CIRCUITNET_NETWORK__CHANNEL_CAPACITY=64
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Input-size guards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Largest accepted variable space (the `V` header field)
    #[serde(default = "default_max_variables")]
    pub max_variables: usize,
}

/// Worker-network tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Per-channel capacity; 0 = unbounded. In-flight traffic on any channel
    /// is bounded by a few messages per active query, so a capacity at or
    /// above the query count never blocks a sender.
    #[serde(default)]
    pub channel_capacity: usize,

    /// Worker thread stack size in bytes; 0 = platform default. Deep parse
    /// trees only need this when the platform default is unusually small.
    #[serde(default)]
    pub worker_stack_size: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_max_variables() -> usize {
    1000
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. config.toml (base configuration)
    /// 2. config.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (CIRCUITNET_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("config.toml"))
            .merge(Toml::file("config.local.toml"))
            .merge(Env::prefixed("CIRCUITNET_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("CIRCUITNET_").split("__"))
            .extract()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            limits: LimitsConfig::default(),
            network: NetworkConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            max_variables: default_max_variables(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            channel_capacity: 0,
            worker_stack_size: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}
