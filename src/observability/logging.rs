//! # Structured Logging
//!
//! Span macros and startup logging built on the tracing ecosystem. Error logs raised while
//! compiling an API carry an `error_code` field (see [`crate::errors::codes`]).

/// Create a tracing span for one deployment request.
///
/// ```rust,ignore
/// let span = deploy_span!("deploy", "PetStore", "1.0.0");
/// let span = deploy_span!("deploy", "PetStore", "1.0.0", vhost = "localhost");
/// ```
#[macro_export]
macro_rules! deploy_span {
    ($operation:expr, $api:expr, $version:expr) => {
        tracing::info_span!(
            "deployment",
            operation = %$operation,
            api = %$api,
            version = %$version,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $api:expr, $version:expr, $($field:tt)*) => {
        tracing::info_span!(
            "deployment",
            operation = %$operation,
            api = %$api,
            version = %$version,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create a tracing span for resource generation of one API on one vhost
#[macro_export]
macro_rules! generator_span {
    ($api:expr, $vhost:expr) => {
        tracing::debug_span!(
            "generate_resources",
            api = %$api,
            vhost = %$vhost,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($api:expr, $vhost:expr, $($field:tt)*) => {
        tracing::debug_span!(
            "generate_resources",
            api = %$api,
            vhost = %$vhost,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Log configuration at startup
pub fn log_config_info(config: &crate::config::AdapterConfig) {
    let environments: Vec<String> = config
        .adapter
        .vhost_mappings
        .iter()
        .map(|mapping| format!("{}={}", mapping.environment, mapping.vhost))
        .collect();

    tracing::info!(
        listener_address = %config.envoy.listener_address(),
        cluster_timeout_seconds = config.envoy.cluster_timeout_seconds,
        vhost_mappings = %environments.join(","),
        consul_enabled = config.adapter.consul.enabled,
        tls_verification = !config.envoy.upstream.tls.disable_ssl_verification,
        global_cors = config.envoy.cors.enabled,
        "Adapter configuration"
    );
}
