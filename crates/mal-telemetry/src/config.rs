//! Telemetry configuration from environment variables.

use std::env;

/// Logging and tracing settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name attached to logs and spans
    pub service_name: String,

    /// `EnvFilter` directive, e.g. `info` or `mal_interaction=debug,info`
    pub log_level: String,

    /// Write log lines to stdout
    pub console_output: bool,

    /// One JSON object per line instead of the human-readable format
    pub json_logs: bool,

    /// OTLP collector endpoint, used with the `otel` feature
    pub otlp_endpoint: String,

    /// Deployment label (ground-segment, test-bench, ...)
    pub environment: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "mal-node".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
            otlp_endpoint: "http://localhost:4317".to_string(),
            environment: "development".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `MAL_SERVICE_NAME` or `OTEL_SERVICE_NAME`: service name (default: mal-node)
    /// - `MAL_LOG_LEVEL` or `RUST_LOG`: log filter (default: info)
    /// - `MAL_CONSOLE_OUTPUT`: write to stdout (default: true)
    /// - `MAL_JSON_LOGS`: JSON log lines (default: false, true in containers)
    /// - `OTEL_EXPORTER_OTLP_ENDPOINT`: collector (default: http://localhost:4317)
    /// - `MAL_ENVIRONMENT`: deployment label (default: development)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();
        let defaults = Self::default();

        Self {
            service_name: env::var("MAL_SERVICE_NAME")
                .or_else(|_| env::var("OTEL_SERVICE_NAME"))
                .unwrap_or(defaults.service_name),

            log_level: env::var("MAL_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or(defaults.log_level),

            console_output: env::var("MAL_CONSOLE_OUTPUT")
                .map(|v| parse_flag(&v))
                .unwrap_or(true),

            json_logs: env::var("MAL_JSON_LOGS")
                .map(|v| parse_flag(&v))
                .unwrap_or(is_container),

            otlp_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or(defaults.otlp_endpoint),

            environment: env::var("MAL_ENVIRONMENT").unwrap_or(defaults.environment),
        }
    }

    /// Same settings under another service name.
    #[must_use]
    pub fn for_service(mut self, service_name: &str) -> Self {
        self.service_name = service_name.to_string();
        self
    }
}

fn parse_flag(value: &str) -> bool {
    let value = value.trim().to_lowercase();
    value == "true" || value == "1" || value == "yes"
}
