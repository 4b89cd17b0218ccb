//! # Node Configuration
//!
//! Everything a broker node needs, read from `MAL_*` environment variables.

use mal_interaction::adapters::in_process::SCHEME;
use mal_interaction::EngineConfig;
use mal_telemetry::TelemetryConfig;
use mal_types::Uri;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error(transparent)]
    Engine(#[from] mal_interaction::ConfigError),

    #[error("Broker URI {uri} is not an inproc:// URI")]
    UnsupportedUri { uri: Uri },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Complete node configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// URI the broker endpoint binds to.
    pub broker_uri: Uri,
    /// Engine settings shared by every endpoint of the node.
    pub engine: EngineConfig,
    /// Logging and tracing.
    pub telemetry: TelemetryConfig,
    /// How often engine statistics are copied into the Prometheus registry.
    pub stats_interval: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            broker_uri: Uri::new(format!("{SCHEME}broker")),
            engine: EngineConfig::default(),
            telemetry: TelemetryConfig::default(),
            stats_interval: Duration::from_secs(15),
        }
    }
}

impl NodeConfig {
    /// Read configuration from the environment.
    ///
    /// # Environment Variables
    ///
    /// - `MAL_BROKER_URI`: broker endpoint URI (default: inproc://broker)
    /// - `MAL_STATS_INTERVAL_MS`: metrics export period (default: 15000)
    /// - everything [`EngineConfig::from_env`] and
    ///   [`TelemetryConfig::from_env`] read
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self {
            engine: EngineConfig::from_env()?,
            telemetry: TelemetryConfig::from_env(),
            ..Self::default()
        };

        if let Ok(value) = env::var("MAL_BROKER_URI") {
            config.broker_uri = Uri::new(value.trim());
        }
        if let Ok(value) = env::var("MAL_STATS_INTERVAL_MS") {
            let millis: u64 = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "MAL_STATS_INTERVAL_MS",
                value: value.clone(),
            })?;
            config.stats_interval = Duration::from_millis(millis);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the node cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        if !self.broker_uri.as_str().starts_with(SCHEME) {
            return Err(ConfigError::UnsupportedUri {
                uri: self.broker_uri.clone(),
            });
        }
        if self.stats_interval.is_zero() {
            return Err(ConfigError::Zero("stats_interval"));
        }
        Ok(())
    }
}
