//! Application configuration.
//!
//! Loaded from a YAML file and environment variables; every knob carries
//! the reference demo's default (12 events, 4 lanes, 50% fault rate, a
//! 30-minute wait window, unbounded retry).

use std::time::Duration;

use serde::Deserialize;

use crate::fault::FaultConfig;
use crate::utils::retry::{RetryConfig, RetryPolicy};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "strider.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "STRIDER_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "STRIDER";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "STRIDER_LOG";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Run shape: log size, lane count, wait window.
    pub run: RunConfig,
    /// Simulated failure injection.
    pub faults: FaultSettings,
    /// Retry behavior for aborted steps.
    pub retry: RetrySettings,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `strider.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `STRIDER_CONFIG` environment variable (if set)
    /// 4. Environment variables with `STRIDER` prefix
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}

/// Run shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Number of events seeded into the log before processing starts.
    pub total_events: u64,
    /// Number of concurrent worker lanes.
    pub total_lanes: u32,
    /// Overall wait window for all lanes combined, in seconds.
    pub wait_timeout_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            total_events: 12,
            total_lanes: 4,
            wait_timeout_secs: 30 * 60,
        }
    }
}

impl RunConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }
}

/// Fault injection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FaultSettings {
    /// Probability of failing a step attempt (0.0 to 1.0).
    pub rate: f64,
}

impl Default for FaultSettings {
    fn default() -> Self {
        Self { rate: 0.5 }
    }
}

impl FaultSettings {
    pub fn fault_config(&self) -> FaultConfig {
        FaultConfig::with_rate(self.rate)
    }
}

/// Retry mode discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryMode {
    /// Retry aborted steps forever, immediately (reference behavior).
    #[default]
    Unbounded,
    /// Bounded attempts per step with exponential backoff.
    Capped,
}

/// Retry settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub mode: RetryMode,
    /// Base delay for the first capped retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Delay cap for capped retries, in milliseconds.
    pub max_delay_ms: u64,
    /// Maximum capped attempts per step.
    pub max_retries: u32,
    /// Jitter factor for capped delays.
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let reference = RetryConfig::default();
        Self {
            mode: RetryMode::Unbounded,
            base_delay_ms: reference.base_delay.as_millis() as u64,
            max_delay_ms: reference.max_delay.as_millis() as u64,
            max_retries: reference.max_retries,
            jitter: reference.jitter,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        match self.mode {
            RetryMode::Unbounded => RetryPolicy::Unbounded,
            RetryMode::Capped => RetryPolicy::Capped(RetryConfig {
                base_delay: Duration::from_millis(self.base_delay_ms),
                max_delay: Duration::from_millis(self.max_delay_ms),
                max_retries: self.max_retries,
                jitter: self.jitter,
            }),
        }
    }
}
