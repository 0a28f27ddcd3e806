//! Configuration types for the HTTP service

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Service configuration
///
/// Every section carries serde defaults so a partially specified file, or no
/// file at all, still deserializes. Call [`ServiceConfig::validate`] before use.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Webhook intake settings
    pub webhooks: WebhookConfig,

    /// Downstream user-record synchronizer
    pub synchronizer: SynchronizerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Validate configuration
    ///
    /// Checks that:
    /// - The listen port is non-zero
    /// - The webhook endpoint path is absolute
    /// - Timestamp tolerance, dedup TTL and reap interval are non-zero
    /// - The synchronizer endpoint is present and is an http(s) URL
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid {
                message: "server.port must be non-zero".to_string(),
            });
        }

        if self.server.max_body_size == 0 {
            return Err(ConfigError::Invalid {
                message: "server.max_body_size must be non-zero".to_string(),
            });
        }

        self.webhooks.validate()?;
        self.synchronizer.endpoint_url()?;

        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,

    /// Maximum request size in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_seconds: 30,
            max_body_size: 1024 * 1024, // 1MB
        }
    }
}

impl ServerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

/// Webhook intake configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Webhook endpoint path
    pub endpoint_path: String,

    /// Accepted clock skew for `svix-timestamp`, in either direction
    pub timestamp_tolerance_seconds: u64,

    /// How long a subject id suppresses further deliveries
    pub dedup_ttl_seconds: u64,

    /// How often expired dedup entries are purged
    pub dedup_reap_interval_millis: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            endpoint_path: "/api/webhook/clerk".to_string(),
            timestamp_tolerance_seconds: 300,
            dedup_ttl_seconds: 30,
            dedup_reap_interval_millis: 1000,
        }
    }
}

impl WebhookConfig {
    pub fn timestamp_tolerance(&self) -> Duration {
        Duration::from_secs(self.timestamp_tolerance_seconds)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_seconds)
    }

    pub fn dedup_reap_interval(&self) -> Duration {
        Duration::from_millis(self.dedup_reap_interval_millis)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.endpoint_path.starts_with('/') {
            return Err(ConfigError::Invalid {
                message: format!(
                    "webhooks.endpoint_path must start with '/', got '{}'",
                    self.endpoint_path
                ),
            });
        }

        let zero_fields = [
            (
                "webhooks.timestamp_tolerance_seconds",
                self.timestamp_tolerance_seconds,
            ),
            ("webhooks.dedup_ttl_seconds", self.dedup_ttl_seconds),
            (
                "webhooks.dedup_reap_interval_millis",
                self.dedup_reap_interval_millis,
            ),
        ];

        for (name, value) in zero_fields {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    message: format!("{} must be non-zero", name),
                });
            }
        }

        Ok(())
    }
}

/// Downstream synchronizer configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SynchronizerConfig {
    /// URL receiving user upserts
    pub endpoint: Option<String>,

    /// Per-call timeout; unset leaves the call bounded only by the transport
    pub timeout_seconds: Option<u64>,
}

impl SynchronizerConfig {
    /// Parse the configured endpoint.
    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        let raw = self
            .endpoint
            .as_deref()
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ConfigError::Missing {
                key: "synchronizer.endpoint".to_string(),
            })?;

        let url = Url::parse(raw).map_err(|e| ConfigError::Invalid {
            message: format!("synchronizer.endpoint '{}' is not a valid URL: {}", raw, e),
        })?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigError::Invalid {
                message: format!(
                    "synchronizer.endpoint must use http or https, got '{}'",
                    other
                ),
            }),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
