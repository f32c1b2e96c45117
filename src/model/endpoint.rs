//! Upstream endpoints and endpoint clusters.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use url::Url;

use crate::config::UpstreamSettings;
use crate::errors::{Error, Result};
use crate::model::api::ApiKind;

static HOST_NAME_VALIDATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9\-.]*[0-9a-zA-Z]$").expect("valid host name regex")
});

const CONSUL_PREFIX: &str = "consul(";

/// Scheme of an endpoint URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlType {
    Http,
    Https,
    Ws,
    Wss,
}

impl UrlType {
    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            "ws" => Some(Self::Ws),
            "wss" => Some(Self::Wss),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Ws => "ws",
            Self::Wss => "wss",
        }
    }

    /// Whether connections to the endpoint use TLS
    pub fn is_secure(&self) -> bool {
        matches!(self, Self::Https | Self::Wss)
    }

    fn default_port(&self) -> u32 {
        if self.is_secure() {
            443
        } else {
            80
        }
    }
}

impl fmt::Display for UrlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single upstream endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub basepath: String,
    pub port: u32,
    pub url_type: UrlType,
    /// The URL as configured, with the implied scheme added
    pub raw_url: String,
    /// Consul query resolving this endpoint, when it came from `consul(...)` syntax
    pub service_discovery_query: Option<String>,
}

impl Endpoint {
    /// Parse an endpoint URL. A URL without a scheme is treated as `ws://` for WebSocket APIs and
    /// `http://` otherwise. Relative URLs are rejected.
    pub fn parse(raw: &str, kind: ApiKind) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.starts_with('/') {
            error!(endpoint = %trimmed, "Relative endpoint URL provided");
            return Err(Error::malformed_endpoint(
                trimmed,
                "relative paths are not supported as endpoint URLs",
            ));
        }
        let raw_url = if trimmed.contains("://") {
            trimmed.to_string()
        } else if kind == ApiKind::Ws {
            format!("ws://{}", trimmed)
        } else {
            format!("http://{}", trimmed)
        };

        let parsed = Url::parse(&raw_url).map_err(|err| {
            error!(endpoint = %raw_url, error = %err, "Failed to parse the malformed endpoint");
            Error::malformed_endpoint(&raw_url, err.to_string())
        })?;

        let url_type = UrlType::from_scheme(parsed.scheme()).ok_or_else(|| {
            Error::malformed_endpoint(&raw_url, format!("Unsupported scheme {}", parsed.scheme()))
        })?;

        let host = parsed.host_str().unwrap_or_default().to_string();
        if !HOST_NAME_VALIDATOR.is_match(&host) {
            error!(endpoint = %raw_url, "Malformed endpoint detected (Invalid host name)");
            return Err(Error::malformed_endpoint(&raw_url, "Invalid host name"));
        }

        let basepath = match (url_type, parsed.path()) {
            (UrlType::Http | UrlType::Https, "/") => String::new(),
            (_, path) => path.to_string(),
        };

        Ok(Self {
            host,
            basepath,
            port: parsed.port().map(u32::from).unwrap_or_else(|| url_type.default_port()),
            url_type,
            raw_url,
            service_discovery_query: None,
        })
    }

    pub fn is_service_discovery(&self) -> bool {
        self.service_discovery_query.is_some()
    }

    /// Host / port sanity checks. Service discovery endpoints are resolved later and exempt.
    pub fn validate(&self) -> Result<()> {
        if self.is_service_discovery() {
            return Ok(());
        }
        if self.port == 0 || self.port > 65535 {
            return Err(Error::malformed_endpoint(
                &self.raw_url,
                "endpoint port value should be between 1 and 65535",
            ));
        }
        if self.host.is_empty() {
            return Err(Error::malformed_endpoint(&self.raw_url, "empty Hostname is provided"));
        }
        Ok(())
    }
}

/// Whether a URL uses the `consul(<query>,<default url>)` syntax
pub fn is_service_discovery_url(raw: &str) -> bool {
    raw.trim().starts_with(CONSUL_PREFIX)
}

/// Split `consul(<query>,<default url>)` into the query and the default URL. The query itself may
/// contain commas, so the split happens at the last one.
pub fn parse_consul_syntax(raw: &str) -> Option<(String, String)> {
    let inner = raw.trim().strip_prefix(CONSUL_PREFIX)?.strip_suffix(')')?;
    let (query, default_url) = inner.rsplit_once(',')?;
    let (query, default_url) = (query.trim(), default_url.trim());
    if query.is_empty() || default_url.is_empty() {
        return None;
    }
    Some((query.to_string(), default_url.to_string()))
}

/// How traffic is spread over the endpoints of a cluster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStrategy {
    #[default]
    #[serde(alias = "load_balance")]
    LoadBalance,
    Failover,
}

impl EndpointStrategy {
    /// Map the `type` of an endpoint definition; anything but `failover` load balances.
    pub fn from_type_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("failover") {
            Self::Failover
        } else {
            Self::LoadBalance
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default)]
    pub count: i32,
    #[serde(default)]
    pub status_codes: Vec<u32>,
}

/// Circuit breaker limits; zero or negative values are left unset on the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CircuitBreakers {
    pub max_connections: i64,
    pub max_requests: i64,
    pub max_pending_requests: i64,
    pub max_retries: i64,
    pub max_connection_pools: i64,
}

/// `advanceEndpointConfig` of an endpoint definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(rename = "retryConfig", default)]
    pub retry: Option<RetryConfig>,
    #[serde(rename = "timeoutInMillis", default)]
    pub timeout_millis: Option<u64>,
    #[serde(rename = "circuitBreakers", default)]
    pub circuit_breakers: Option<CircuitBreakers>,
}

/// Basic authentication towards an upstream
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSecurity {
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "type", default)]
    pub security_type: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for EndpointSecurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointSecurity")
            .field("enabled", &self.enabled)
            .field("security_type", &self.security_type)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// A named group of endpoints that becomes one upstream cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointCluster {
    pub prefix: String,
    pub endpoints: Vec<Endpoint>,
    pub strategy: EndpointStrategy,
    pub config: Option<EndpointConfig>,
    pub security: Option<EndpointSecurity>,
}

impl EndpointCluster {
    /// Basepath of the first endpoint with the trailing `/` removed
    pub fn basepath(&self) -> String {
        self.endpoints
            .first()
            .map(|endpoint| endpoint.basepath.trim_end_matches('/').to_string())
            .unwrap_or_default()
    }

    pub fn first(&self) -> Option<&Endpoint> {
        self.endpoints.first()
    }

    pub fn timeout_millis(&self) -> Option<u64> {
        self.config.as_ref().and_then(|config| config.timeout_millis).filter(|millis| *millis > 0)
    }

    pub fn retry(&self) -> Option<&RetryConfig> {
        self.config.as_ref().and_then(|config| config.retry.as_ref())
    }

    /// Validate every endpoint, then clamp the retry and timeout configuration to the gateway
    /// limits.
    pub fn validate(&mut self, label: &str, upstream: &UpstreamSettings) -> Result<()> {
        for endpoint in &self.endpoints {
            endpoint.validate().inspect_err(|err| {
                error!(endpoints = label, error = %err, "Error while validating endpoints");
            })?;
        }

        let Some(config) = self.config.as_mut() else {
            return Ok(());
        };

        if let Some(retry) = config.retry.as_mut() {
            let max = upstream.retry.max_retry_count as i32;
            if retry.count > max || retry.count < 0 {
                warn!(
                    endpoints = label,
                    count = retry.count,
                    max_retry_count = max,
                    "Retry count out of range, reconfiguring to the maximum"
                );
                retry.count = max;
            }

            let before = retry.status_codes.len();
            retry.status_codes.retain(|code| (401..=598).contains(code));
            if retry.status_codes.len() != before {
                warn!(endpoints = label, "Dropped retry status codes outside 401 - 598");
            }
            if retry.status_codes.is_empty() {
                retry.status_codes = upstream.retry.status_codes.clone();
            }
        }

        let max_timeout_millis = upstream.timeouts.max_route_timeout_seconds * 1000;
        if let Some(timeout) = config.timeout_millis.as_mut() {
            if *timeout > max_timeout_millis {
                *timeout = max_timeout_millis;
            }
        }

        Ok(())
    }
}

/// Build an endpoint cluster from raw URLs.
///
/// With service discovery enabled, `consul(<query>,<default url>)` entries resolve to the default
/// URL and keep the query; unparseable consul entries are skipped. Any other malformed URL fails
/// the whole cluster. `Ok(None)` when no URL resolved.
pub fn build_endpoint_cluster(
    prefix: &str,
    urls: &[String],
    strategy: EndpointStrategy,
    kind: ApiKind,
    consul_enabled: bool,
) -> Result<Option<EndpointCluster>> {
    let mut endpoints = Vec::with_capacity(urls.len());

    for raw in urls {
        let endpoint = if consul_enabled && is_service_discovery_url(raw) {
            debug!(url = %raw, "Consul query syntax found");
            let Some((query, default_url)) = parse_consul_syntax(raw) else {
                error!(url = %raw, "Consul syntax parse error");
                continue;
            };
            let mut endpoint = Endpoint::parse(&default_url, kind)
                .map_err(|err| Error::endpoint_resolution(prefix, err.to_string()))?;
            endpoint.service_discovery_query = Some(query);
            endpoint
        } else {
            Endpoint::parse(raw, kind)
                .map_err(|err| Error::endpoint_resolution(prefix, err.to_string()))?
        };
        endpoints.push(endpoint);
    }

    if endpoints.is_empty() {
        return Ok(None);
    }

    Ok(Some(EndpointCluster {
        prefix: prefix.to_string(),
        endpoints,
        strategy,
        config: None,
        security: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_applies_default_scheme_and_ports() {
        let endpoint = Endpoint::parse("petstore.swagger.io/v2", ApiKind::Http).expect("parses");
        assert_eq!(endpoint.url_type, UrlType::Http);
        assert_eq!(endpoint.port, 80);
        assert_eq!(endpoint.basepath, "/v2");
        assert_eq!(endpoint.raw_url, "http://petstore.swagger.io/v2");

        let endpoint = Endpoint::parse("https://petstore.swagger.io", ApiKind::Http).expect("parses");
        assert_eq!(endpoint.port, 443);
        assert_eq!(endpoint.basepath, "");

        let endpoint = Endpoint::parse("echo.websocket.org", ApiKind::Ws).expect("parses");
        assert_eq!(endpoint.url_type, UrlType::Ws);
        assert_eq!(endpoint.basepath, "/");
        assert_eq!(endpoint.port, 80);

        let endpoint = Endpoint::parse("wss://echo.websocket.org:8443/chat", ApiKind::Ws)
            .expect("parses");
        assert!(endpoint.url_type.is_secure());
        assert_eq!(endpoint.port, 8443);
    }

    #[test]
    fn invalid_host_reports_raw_url() {
        let err = Endpoint::parse("https://-bad-host-:8443/api", ApiKind::Http).unwrap_err();
        assert!(matches!(err, Error::MalformedEndpoint { .. }));
        assert!(err.to_string().contains("https://-bad-host-:8443/api"));
    }

    #[test]
    fn relative_urls_are_rejected() {
        let err = Endpoint::parse("/backend/v1", ApiKind::Http).unwrap_err();
        assert!(matches!(err, Error::MalformedEndpoint { ref url, .. } if url == "/backend/v1"));
        assert!(Endpoint::parse(" /chat", ApiKind::Ws).is_err());

        let err = build_endpoint_cluster(
            "clusterProd",
            &["/backend/v1".to_string()],
            EndpointStrategy::LoadBalance,
            ApiKind::Http,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, Error::EndpointResolution { .. }));
    }

    #[test]
    fn consul_syntax_splits_at_last_comma() {
        let (query, default_url) =
            parse_consul_syntax("consul([dc1,dc2].pet-service.[prod],https://pets.local:9443)")
                .expect("parses");
        assert_eq!(query, "[dc1,dc2].pet-service.[prod]");
        assert_eq!(default_url, "https://pets.local:9443");

        assert!(parse_consul_syntax("consul(missing-default)").is_none());
        assert!(parse_consul_syntax("https://pets.local").is_none());
    }

    #[test]
    fn build_cluster_skips_bad_consul_entries_only() {
        let urls = vec![
            "consul(broken)".to_string(),
            "consul(pet-service.[prod],http://pets.local:8080)".to_string(),
        ];
        let cluster = build_endpoint_cluster(
            "clusterProd",
            &urls,
            EndpointStrategy::LoadBalance,
            ApiKind::Http,
            true,
        )
        .expect("builds")
        .expect("one endpoint resolved");

        assert_eq!(cluster.endpoints.len(), 1);
        assert_eq!(cluster.endpoints[0].service_discovery_query.as_deref(), Some("pet-service.[prod]"));

        let urls = vec!["http://ok.example.com".to_string(), "http://bad_host".to_string()];
        let err = build_endpoint_cluster(
            "clusterProd",
            &urls,
            EndpointStrategy::LoadBalance,
            ApiKind::Http,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, Error::EndpointResolution { .. }));
        assert!(err.to_string().contains("http://bad_host"));
    }

    #[test]
    fn empty_url_list_yields_no_cluster() {
        let cluster =
            build_endpoint_cluster("clusterProd", &[], EndpointStrategy::Failover, ApiKind::Http, false)
                .expect("builds");
        assert!(cluster.is_none());
    }

    #[test]
    fn validate_clamps_retry_and_timeout() {
        let mut cluster = build_endpoint_cluster(
            "clusterProd",
            &["http://pets.example.com".to_string()],
            EndpointStrategy::LoadBalance,
            ApiKind::Http,
            false,
        )
        .expect("builds")
        .expect("present");
        cluster.config = Some(EndpointConfig {
            retry: Some(RetryConfig { count: 50, status_codes: vec![200, 302] }),
            timeout_millis: Some(3_600_000),
            circuit_breakers: None,
        });

        let upstream = UpstreamSettings::default();
        cluster.validate("API level production", &upstream).expect("valid");

        let config = cluster.config.expect("config");
        let retry = config.retry.expect("retry");
        assert_eq!(retry.count, 5);
        assert_eq!(retry.status_codes, vec![504]);
        assert_eq!(config.timeout_millis, Some(60_000));
    }

    #[test]
    fn endpoint_security_debug_redacts_password() {
        let security = EndpointSecurity {
            enabled: true,
            security_type: "BASIC".to_string(),
            username: "admin".to_string(),
            password: "s3cret".to_string(),
        };
        assert!(!format!("{:?}", security).contains("s3cret"));
    }
}
