//! # Configuration Settings
//!
//! Defines the configuration structure for the adapter. Every struct carries the gateway defaults
//! so a missing file or section falls back to a usable configuration.

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

use super::tls::{KeystoreSettings, UpstreamTlsSettings};

/// Main adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct AdapterConfig {
    /// Deployment and discovery settings
    #[validate(nested)]
    pub adapter: AdapterSettings,

    /// Gateway (Envoy) facing settings
    #[validate(nested)]
    pub envoy: EnvoySettings,

    /// Log output
    #[validate(nested)]
    pub logging: LoggingSettings,
}

impl AdapterConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)?;

        self.validate_custom()?;

        Ok(())
    }

    /// Cross-field checks the validator derive cannot express
    fn validate_custom(&self) -> Result<()> {
        let timeouts = &self.envoy.upstream.timeouts;
        if timeouts.route_timeout_seconds > timeouts.max_route_timeout_seconds {
            return Err(Error::config(format!(
                "Route timeout {}s exceeds the maximum route timeout {}s",
                timeouts.route_timeout_seconds, timeouts.max_route_timeout_seconds
            )));
        }

        if let Some(code) = self
            .envoy
            .upstream
            .retry
            .status_codes
            .iter()
            .find(|code| !(401..=598).contains(*code))
        {
            return Err(Error::config(format!(
                "Retry status code {} must be between 401 and 598",
                code
            )));
        }

        let mut environments = std::collections::HashSet::new();
        for mapping in &self.adapter.vhost_mappings {
            if !environments.insert(mapping.environment.as_str()) {
                return Err(Error::config(format!(
                    "Environment '{}' is mapped to more than one default vhost",
                    mapping.environment
                )));
            }
        }

        self.envoy.upstream.tls.check_protocol_range()?;

        Ok(())
    }
}

/// Deployment settings of the adapter itself
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AdapterSettings {
    /// Default vhost of each gateway environment
    #[validate(nested)]
    pub vhost_mappings: Vec<VhostMapping>,

    /// Organization used when a project does not name one
    #[validate(length(min = 1, message = "Default organization cannot be empty"))]
    pub default_organization: String,

    /// Service discovery endpoint syntax
    #[validate(nested)]
    pub consul: ConsulSettings,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            vhost_mappings: vec![VhostMapping {
                environment: "Default".to_string(),
                vhost: "localhost".to_string(),
            }],
            default_organization: "carbon.super".to_string(),
            consul: ConsulSettings::default(),
        }
    }
}

/// Default vhost of a gateway environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct VhostMapping {
    #[validate(length(min = 1, message = "Environment name cannot be empty"))]
    pub environment: String,

    #[validate(length(min = 1, message = "Vhost cannot be empty"))]
    pub vhost: String,
}

/// Consul service discovery. When disabled, `consul(...)` endpoint URLs are parsed as plain URLs
/// and rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ConsulSettings {
    pub enabled: bool,
}

/// Gateway facing settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EnvoySettings {
    /// Listener bind address
    #[validate(length(min = 1, message = "Listener host cannot be empty"))]
    pub listener_host: String,

    /// Plain listener port
    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub listener_port: u16,

    /// TLS listener port
    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub secured_listener_port: u16,

    /// Upstream connect timeout in seconds
    #[validate(range(
        min = 1,
        max = 3600,
        message = "Cluster timeout must be between 1 and 3600 seconds"
    ))]
    pub cluster_timeout_seconds: u64,

    /// Host of the gateway's own system endpoints
    pub system_host: String,

    /// Client certificate for upstream TLS
    #[validate(nested)]
    pub keystore: KeystoreSettings,

    /// CORS applied to APIs without an `x-wso2-cors` extension
    #[validate(nested)]
    pub cors: GlobalCorsSettings,

    #[validate(nested)]
    pub upstream: UpstreamSettings,

    #[validate(nested)]
    pub payload_passing: PayloadPassingSettings,
}

impl Default for EnvoySettings {
    fn default() -> Self {
        Self {
            listener_host: "0.0.0.0".to_string(),
            listener_port: 9090,
            secured_listener_port: 9095,
            cluster_timeout_seconds: 20,
            system_host: "localhost".to_string(),
            keystore: KeystoreSettings::default(),
            cors: GlobalCorsSettings::default(),
            upstream: UpstreamSettings::default(),
            payload_passing: PayloadPassingSettings::default(),
        }
    }
}

impl EnvoySettings {
    /// Get the plain listener bind address
    pub fn listener_address(&self) -> String {
        format!("{}:{}", self.listener_host, self.listener_port)
    }

    /// Get the upstream connect timeout as Duration
    pub fn cluster_timeout(&self) -> Duration {
        Duration::from_secs(self.cluster_timeout_seconds)
    }
}

/// Gateway-wide CORS defaults
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GlobalCorsSettings {
    pub enabled: bool,
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub allow_credentials: bool,
    pub expose_headers: Vec<String>,
}

impl Default for GlobalCorsSettings {
    fn default() -> Self {
        let strings = |values: &[&str]| values.iter().map(|value| value.to_string()).collect();
        Self {
            enabled: true,
            allow_origins: strings(&["*"]),
            allow_methods: strings(&["GET", "PUT", "POST", "DELETE", "PATCH", "OPTIONS"]),
            allow_headers: strings(&[
                "authorization",
                "Access-Control-Allow-Origin",
                "Content-Type",
                "SOAPAction",
                "apikey",
                "testKey",
                "Internal-Key",
            ]),
            allow_credentials: false,
            expose_headers: Vec::new(),
        }
    }
}

/// Upstream cluster settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct UpstreamSettings {
    #[validate(nested)]
    pub tls: UpstreamTlsSettings,

    #[validate(nested)]
    pub timeouts: UpstreamTimeoutSettings,

    #[validate(nested)]
    pub health: HealthCheckSettings,

    #[validate(nested)]
    pub retry: RetrySettings,

    #[validate(nested)]
    pub dns: DnsSettings,

    #[validate(nested)]
    pub http2: Http2Settings,
}

/// Route timeouts
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct UpstreamTimeoutSettings {
    /// Upper bound for endpoint-level `timeoutInMillis`
    #[validate(range(min = 1, message = "Maximum route timeout must be positive"))]
    pub max_route_timeout_seconds: u64,

    #[validate(range(min = 1, message = "Route timeout must be positive"))]
    pub route_timeout_seconds: u64,

    pub route_idle_timeout_seconds: u64,
}

impl Default for UpstreamTimeoutSettings {
    fn default() -> Self {
        Self { max_route_timeout_seconds: 60, route_timeout_seconds: 60, route_idle_timeout_seconds: 300 }
    }
}

/// TCP health check used by clusters with more than one endpoint
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HealthCheckSettings {
    #[validate(range(min = 1, message = "Health check timeout must be positive"))]
    pub timeout_seconds: u64,

    #[validate(range(min = 1, message = "Health check interval must be positive"))]
    pub interval_seconds: u64,

    pub unhealthy_threshold: u32,
    pub healthy_threshold: u32,
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self { timeout_seconds: 1, interval_seconds: 10, unhealthy_threshold: 2, healthy_threshold: 2 }
    }
}

/// Retry limits for endpoint-level retry configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RetrySettings {
    /// Retry counts above this are clamped
    #[validate(range(max = 20, message = "Max retry count must be at most 20"))]
    pub max_retry_count: u32,

    pub base_interval_millis: u32,

    /// Used when an endpoint declares no valid status codes
    #[validate(length(min = 1, message = "At least one retriable status code is required"))]
    pub status_codes: Vec<u32>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { max_retry_count: 5, base_interval_millis: 25, status_codes: vec![504] }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DnsSettings {
    #[validate(range(min = 1, message = "DNS refresh rate must be positive"))]
    pub refresh_rate_millis: u64,

    pub respect_dns_ttl: bool,
}

impl Default for DnsSettings {
    fn default() -> Self {
        Self { refresh_rate_millis: 5000, respect_dns_ttl: false }
    }
}

/// HTTP/2 upstream protocol options
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Http2Settings {
    pub hpack_table_size: u32,

    #[validate(range(min = 1, max = 2147483647, message = "Max concurrent streams out of range"))]
    pub max_concurrent_streams: u32,
}

impl Default for Http2Settings {
    fn default() -> Self {
        Self { hpack_table_size: 4096, max_concurrent_streams: 2147483647 }
    }
}

/// Request payload forwarding to the enforcer
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PayloadPassingSettings {
    pub pass_request_payload: bool,

    #[validate(range(min = 1024, message = "Max request bytes must be at least 1KB"))]
    pub max_request_bytes: u32,
}

impl Default for PayloadPassingSettings {
    fn default() -> Self {
        Self { pass_request_payload: false, max_request_bytes: 102400 }
    }
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter used when `RUST_LOG` is unset
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub level: String,

    /// Enable JSON structured logging
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validation() {
        let config = AdapterConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_envoy_settings_helpers() {
        let settings = EnvoySettings::default();
        assert_eq!(settings.listener_address(), "0.0.0.0:9090");
        assert_eq!(settings.cluster_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn test_route_timeout_above_maximum_is_rejected() {
        let mut config = AdapterConfig::default();
        config.envoy.upstream.timeouts.route_timeout_seconds = 120;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_status_codes_range() {
        let mut config = AdapterConfig::default();
        config.envoy.upstream.retry.status_codes = vec![504, 200];
        assert!(config.validate().is_err());

        config.envoy.upstream.retry.status_codes = vec![];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_environment_mapping() {
        let mut config = AdapterConfig::default();
        config.adapter.vhost_mappings.push(VhostMapping {
            environment: "Default".to_string(),
            vhost: "gw.example.com".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_ranges() {
        let mut config = AdapterConfig::default();
        config.envoy.listener_port = 0;
        assert!(config.validate().is_err());

        config = AdapterConfig::default();
        config.envoy.cluster_timeout_seconds = 0;
        assert!(config.validate().is_err());

        config = AdapterConfig::default();
        config.adapter.vhost_mappings[0].vhost = String::new();
        assert!(config.validate().is_err());
    }
}
