//! # Configuration Management
//!
//! Layered configuration for the adapter: built-in defaults, then an optional TOML file, then
//! `ADAPTER__`-prefixed environment variables (`ADAPTER__ENVOY__CLUSTER_TIMEOUT_SECONDS=30`).

pub mod settings;
pub mod tls;

pub use settings::{
    AdapterConfig, AdapterSettings, ConsulSettings, DnsSettings, EnvoySettings, GlobalCorsSettings,
    HealthCheckSettings, Http2Settings, LoggingSettings, PayloadPassingSettings, RetrySettings,
    UpstreamSettings, UpstreamTimeoutSettings, VhostMapping,
};
pub use tls::{protocol_rank, KeystoreSettings, UpstreamTlsSettings};

use std::path::Path;

use crate::Result;

/// Environment whose default vhost is `localhost` even when no mapping names it
pub const DEFAULT_ENVIRONMENT: &str = "Default";
const DEFAULT_VHOST: &str = "localhost";
const ENV_PREFIX: &str = "ADAPTER";

impl AdapterConfig {
    /// Load configuration from defaults, an optional file and the environment, then validate it.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&AdapterConfig::default())?;

        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let loaded: AdapterConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Default vhost of a gateway environment, if the environment is known.
    pub fn default_vhost(&self, environment: &str) -> Option<String> {
        self.adapter
            .vhost_mappings
            .iter()
            .find(|mapping| mapping.environment == environment)
            .map(|mapping| mapping.vhost.clone())
            .or_else(|| (environment == DEFAULT_ENVIRONMENT).then(|| DEFAULT_VHOST.to_string()))
    }
}
