//! Engine configuration from environment variables.

use mal_broker::{BrokerConfig, DomainMatching};
use mal_types::CodecKind;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default bound on a synchronous call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Invalid configuration value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Settings shared by every endpoint of a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Bound on synchronous calls when the caller gives none.
    pub default_timeout: Duration,
    /// Wire encoding for every endpoint.
    pub codec: CodecKind,
    /// Settings for brokers hosted by endpoints.
    pub broker: BrokerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            codec: CodecKind::default(),
            broker: BrokerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Read configuration from the environment.
    ///
    /// # Environment Variables
    ///
    /// - `MAL_TIMEOUT_MS`: synchronous call timeout (default: 10000)
    /// - `MAL_CODEC`: `bincode` or `json` (default: bincode)
    /// - `MAL_DOMAIN_MATCHING`: `exact` or `trailing-wildcard` (default)
    /// - `MAL_BROKER_PARALLEL_THRESHOLD`: subscriptions before parallel
    ///   filtering (default: 32)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(value) = env::var("MAL_TIMEOUT_MS") {
            let millis: u64 = parse("MAL_TIMEOUT_MS", &value)?;
            config.default_timeout = Duration::from_millis(millis);
        }
        if let Ok(value) = env::var("MAL_CODEC") {
            config.codec = parse("MAL_CODEC", &value)?;
        }
        if let Ok(value) = env::var("MAL_DOMAIN_MATCHING") {
            config.broker.domain_matching = parse::<DomainMatching>("MAL_DOMAIN_MATCHING", &value)?;
        }
        if let Ok(value) = env::var("MAL_BROKER_PARALLEL_THRESHOLD") {
            config.broker.parallel_threshold = parse("MAL_BROKER_PARALLEL_THRESHOLD", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout.is_zero() {
            return Err(ConfigError::Zero("default_timeout"));
        }
        if self.broker.parallel_threshold == 0 {
            return Err(ConfigError::Zero("broker.parallel_threshold"));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }

    #[must_use]
    pub fn with_domain_matching(mut self, mode: DomainMatching) -> Self {
        self.broker.domain_matching = mode;
        self
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
