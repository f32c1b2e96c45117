//! Vendor extension (`x-...`) access and resolution.
//!
//! Every definition format hands its raw extension maps to an [`ExtensionBag`]. Resolvers never
//! mutate the bag, so resolving the same bag twice yields the same value.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::config::GlobalCorsSettings;
use crate::errors::{Error, Result};
use crate::model::api::ApiKind;
use crate::model::cors::CorsConfig;
use crate::model::endpoint::{
    build_endpoint_cluster, EndpointCluster, EndpointConfig, EndpointSecurity, EndpointStrategy,
};
use crate::model::interceptor::{InterceptEndpoint, InterceptorIncludes};

pub const X_WSO2_BASEPATH: &str = "x-wso2-basePath";
pub const X_WSO2_PRODUCTION_ENDPOINTS: &str = "x-wso2-production-endpoints";
pub const X_WSO2_SANDBOX_ENDPOINTS: &str = "x-wso2-sandbox-endpoints";
pub const X_WSO2_ENDPOINTS: &str = "x-wso2-endpoints";
pub const X_WSO2_CORS: &str = "x-wso2-cors";
pub const X_WSO2_THROTTLING_TIER: &str = "x-wso2-throttling-tier";
pub const X_THROTTLING_TIER: &str = "x-throttling-tier";
pub const X_WSO2_DISABLE_SECURITY: &str = "x-wso2-disable-security";
pub const X_AUTH_TYPE: &str = "x-auth-type";
pub const X_WSO2_AUTH_HEADER: &str = "x-wso2-auth-header";
pub const X_WSO2_REQUEST_INTERCEPTOR: &str = "x-wso2-request-interceptor";
pub const X_WSO2_RESPONSE_INTERCEPTOR: &str = "x-wso2-response-interceptor";
pub const X_WSO2_HTTP2_BACKEND_ENABLED: &str = "x-wso2-http2-backend-enabled";
pub const X_WSO2_PASS_REQUEST_PAYLOAD: &str = "x-wso2-pass-request-payload";
pub const X_WSO2_APPLICATION_SECURITY: &str = "x-wso2-application-security";

/// Cluster name prefix of API and resource level production endpoints
pub const PRODUCTION_CLUSTER_PREFIX: &str = "clusterProd";
/// Cluster name prefix of API and resource level sandbox endpoints
pub const SANDBOX_CLUSTER_PREFIX: &str = "clusterSand";
/// Suffix appended to the name of an `x-wso2-endpoints` entry to form its cluster prefix
pub const NAMED_CLUSTER_SUFFIX: &str = "xwso2cluster";

const ENDPOINT_REFERENCE_PREFIX: &str = "#/x-wso2-endpoints/";
const AUTH_TYPE_NONE: &str = "None";

/// Raw vendor extensions of an API, path item or operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtensionBag(Map<String, Value>);

impl ExtensionBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Collect the `x-` prefixed keys of a JSON object. Non-objects yield an empty bag.
    pub fn from_vendor_keys(value: &Value) -> Self {
        let map = value
            .as_object()
            .map(|object| {
                object
                    .iter()
                    .filter(|(key, _)| key.starts_with("x-"))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Self(map)
    }

    pub fn insert<K: Into<String>>(&mut self, key: K, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// String value of `key`; `None` when absent or not a string
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.0.get(key).and_then(Value::as_str).map(str::to_string)
    }

    /// Boolean value of `key`; `None` when absent or not a boolean
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    /// String array value of `key`; non-string entries are skipped
    pub fn get_string_list(&self, key: &str) -> Option<Vec<String>> {
        self.0.get(key).and_then(Value::as_array).map(|items| {
            items.iter().filter_map(Value::as_str).map(str::to_string).collect()
        })
    }

    pub fn get_object(&self, key: &str) -> Option<&Map<String, Value>> {
        self.0.get(key).and_then(Value::as_object)
    }

    pub fn resolve_basepath(&self) -> Option<String> {
        self.get_string(X_WSO2_BASEPATH).filter(|basepath| !basepath.is_empty())
    }

    /// `x-wso2-throttling-tier`, falling back to `x-throttling-tier`
    pub fn resolve_throttling_tier(&self) -> Option<String> {
        if self.contains(X_WSO2_THROTTLING_TIER) {
            return self.get_string(X_WSO2_THROTTLING_TIER);
        }
        self.get_string(X_THROTTLING_TIER)
    }

    pub fn resolve_auth_header(&self) -> Option<String> {
        self.get_string(X_WSO2_AUTH_HEADER).filter(|header| !header.is_empty())
    }

    /// Explicit `x-wso2-disable-security` wins; `x-auth-type: None` alone means disabled.
    pub fn resolve_disable_security(&self) -> Option<bool> {
        if let Some(disabled) = self.get_bool(X_WSO2_DISABLE_SECURITY) {
            return Some(disabled);
        }
        match self.get_string(X_AUTH_TYPE) {
            Some(auth_type) if auth_type.eq_ignore_ascii_case(AUTH_TYPE_NONE) => Some(true),
            Some(_) => Some(false),
            None => None,
        }
    }

    pub fn resolve_http2_backend(&self) -> Option<bool> {
        self.get_bool(X_WSO2_HTTP2_BACKEND_ENABLED)
    }

    pub fn resolve_pass_request_payload(&self) -> Option<bool> {
        self.get_bool(X_WSO2_PASS_REQUEST_PAYLOAD)
    }

    /// API level CORS. A disabled or missing `x-wso2-cors` falls back to the gateway defaults; a
    /// malformed one disables CORS for the API.
    pub fn resolve_cors(&self, global: &GlobalCorsSettings) -> Option<CorsConfig> {
        let Some(raw) = self.get(X_WSO2_CORS) else {
            debug!("CORS policy is applied from global configuration");
            return Some(CorsConfig::from_global(global));
        };

        if !raw.is_object() {
            error!(extension = X_WSO2_CORS, "Extension is not an object");
            return None;
        }

        match serde_json::from_value::<CorsConfig>(raw.clone()) {
            Ok(cors) if cors.enabled => Some(cors),
            Ok(_) => Some(CorsConfig::from_global(global)),
            Err(err) => {
                error!(extension = X_WSO2_CORS, error = %err, "Failed to parse CORS extension");
                None
            }
        }
    }

    /// Parse every entry of `x-wso2-endpoints` into a named cluster
    pub fn resolve_named_endpoints(
        &self,
        kind: ApiKind,
        consul_enabled: bool,
    ) -> Result<BTreeMap<String, EndpointCluster>> {
        let mut clusters = BTreeMap::new();
        let Some(raw) = self.get(X_WSO2_ENDPOINTS) else {
            return Ok(clusters);
        };

        let entries = raw.as_array().ok_or_else(|| {
            Error::malformed(X_WSO2_ENDPOINTS, "error while parsing x-wso2-endpoints extension")
        })?;

        for entry in entries {
            let Some(named) = entry.as_object() else {
                continue;
            };
            for (name, definition) in named {
                let prefix = format!("{}_{}", name, NAMED_CLUSTER_SUFFIX);
                if let Some(cluster) =
                    parse_endpoint_definition(name, &prefix, definition, kind, consul_enabled)?
                {
                    clusters.insert(name.clone(), cluster);
                }
            }
        }

        Ok(clusters)
    }

    /// Resolve `x-wso2-production-endpoints` or `x-wso2-sandbox-endpoints`.
    ///
    /// The value is either an inline endpoint definition or a `#/x-wso2-endpoints/<name>`
    /// reference into `named`. `Ok(None)` means the extension is absent or no URL resolved.
    pub fn resolve_endpoints(
        &self,
        key: &str,
        kind: ApiKind,
        named: &BTreeMap<String, EndpointCluster>,
        consul_enabled: bool,
    ) -> Result<Option<EndpointCluster>> {
        let Some(raw) = self.get(key) else {
            return Ok(None);
        };

        if let Some(reference) = raw.as_str() {
            let name = reference.strip_prefix(ENDPOINT_REFERENCE_PREFIX).ok_or_else(|| {
                Error::malformed(key, format!("Invalid endpoint reference {}", reference))
            })?;
            return named
                .get(name)
                .cloned()
                .map(Some)
                .ok_or_else(|| Error::malformed(key, format!("Invalid endpoint reference {}", reference)));
        }

        let prefix = if key == X_WSO2_SANDBOX_ENDPOINTS {
            SANDBOX_CLUSTER_PREFIX
        } else {
            PRODUCTION_CLUSTER_PREFIX
        };
        parse_endpoint_definition(key, prefix, raw, kind, consul_enabled)
    }

    /// Resolve a request or response interceptor extension.
    pub fn resolve_interceptor(
        &self,
        key: &str,
        cluster_timeout_seconds: u64,
    ) -> Result<Option<InterceptEndpoint>> {
        let Some(raw) = self.get_object(key) else {
            return Ok(None);
        };

        let service_url = raw
            .get("serviceURL")
            .and_then(Value::as_str)
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| Error::malformed(key, "serviceURL is mandatory for an interceptor"))?;

        let cluster = build_endpoint_cluster(
            "interceptor",
            &[service_url.to_string()],
            EndpointStrategy::LoadBalance,
            ApiKind::Http,
            false,
        )?
        .ok_or_else(|| Error::malformed(key, format!("Invalid serviceURL {}", service_url)))?;

        let basepath = cluster.basepath();
        if !basepath.is_empty() {
            warn!(extension = key, basepath = %basepath, "Interceptor serviceURL basepath is ignored");
        }

        let seconds = |field: &str| {
            raw.get(field).and_then(Value::as_u64).filter(|value| *value > 0)
        };

        let includes = raw
            .get("includes")
            .and_then(Value::as_array)
            .map(|items| {
                InterceptorIncludes::from_names(items.iter().filter_map(Value::as_str))
            })
            .unwrap_or_default();

        Ok(Some(InterceptEndpoint {
            enabled: true,
            cluster,
            cluster_timeout_seconds: seconds("clusterTimeout").unwrap_or(cluster_timeout_seconds),
            request_timeout_seconds: seconds("requestTimeout").unwrap_or(cluster_timeout_seconds),
            includes,
            cluster_name: String::new(),
        }))
    }
}

/// Parse one inline endpoint definition `{urls, type, advanceEndpointConfig, securityConfig}`.
fn parse_endpoint_definition(
    extension: &str,
    prefix: &str,
    raw: &Value,
    kind: ApiKind,
    consul_enabled: bool,
) -> Result<Option<EndpointCluster>> {
    let Some(definition) = raw.as_object() else {
        error!(extension, "Extension does not adhere with the schema");
        return Err(Error::malformed(extension, "invalid map structure detected"));
    };

    let urls = match definition.get("urls") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    Error::malformed(extension, format!("Error while parsing array of urls in {}", extension))
                })
            })
            .collect::<Result<Vec<_>>>()?,
        Some(_) => {
            return Err(Error::malformed(
                extension,
                format!("Error while parsing array of urls in {}", extension),
            ))
        }
        None => {
            return Err(Error::malformed(
                extension,
                format!("urls property is not provided with the {} extension", extension),
            ))
        }
    };

    let strategy = definition
        .get("type")
        .and_then(Value::as_str)
        .map(EndpointStrategy::from_type_name)
        .unwrap_or_default();

    let Some(mut cluster) = build_endpoint_cluster(prefix, &urls, strategy, kind, consul_enabled)?
    else {
        return Ok(None);
    };

    if let Some(advance) = definition.get("advanceEndpointConfig") {
        if !advance.is_object() {
            return Err(Error::malformed(
                extension,
                format!("Invalid structure for advanceEndpointConfig in {}", extension),
            ));
        }
        let config: EndpointConfig = serde_json::from_value(advance.clone()).map_err(|_| {
            Error::malformed(extension, format!("Invalid schema for advanceEndpointConfig in {}", extension))
        })?;
        cluster.config = Some(config);
    }

    if let Some(security) = definition.get("securityConfig").filter(|value| value.is_object()) {
        let mut security: EndpointSecurity = serde_json::from_value(security.clone()).map_err(|_| {
            Error::malformed(extension, format!("Invalid schema for securityConfig in {}", extension))
        })?;
        if !security.security_type.eq_ignore_ascii_case("BASIC") {
            return Err(Error::malformed(
                extension,
                format!("endpoint security type : {} is not currently supported", security.security_type),
            ));
        }
        security.enabled = true;
        cluster.security = Some(security);
    }

    Ok(Some(cluster))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bag(value: Value) -> ExtensionBag {
        ExtensionBag::from_vendor_keys(&value)
    }

    #[test]
    fn from_vendor_keys_keeps_only_extensions() {
        let extensions = bag(json!({"paths": {}, "x-wso2-basePath": "/api", "info": {}}));
        assert_eq!(extensions.as_map().len(), 1);
        assert_eq!(extensions.resolve_basepath().as_deref(), Some("/api"));
    }

    #[test]
    fn typed_accessors_report_absence_and_type_mismatch() {
        let extensions = bag(json!({"x-a": "text", "x-b": true, "x-c": ["one", 2, "three"]}));

        assert_eq!(extensions.get_string("x-a").as_deref(), Some("text"));
        assert_eq!(extensions.get_string("x-b"), None);
        assert_eq!(extensions.get_bool("x-b"), Some(true));
        assert_eq!(extensions.get_bool("x-missing"), None);
        assert_eq!(
            extensions.get_string_list("x-c"),
            Some(vec!["one".to_string(), "three".to_string()])
        );
        assert!(extensions.get_object("x-a").is_none());
    }

    #[test]
    fn throttling_tier_prefers_wso2_extension() {
        let extensions =
            bag(json!({"x-wso2-throttling-tier": "Gold", "x-throttling-tier": "Bronze"}));
        assert_eq!(extensions.resolve_throttling_tier().as_deref(), Some("Gold"));

        let extensions = bag(json!({"x-throttling-tier": "Bronze"}));
        assert_eq!(extensions.resolve_throttling_tier().as_deref(), Some("Bronze"));
    }

    #[test]
    fn disable_security_explicit_boolean_wins() {
        assert_eq!(bag(json!({"x-auth-type": "None"})).resolve_disable_security(), Some(true));
        assert_eq!(
            bag(json!({"x-auth-type": "None", "x-wso2-disable-security": false}))
                .resolve_disable_security(),
            Some(false)
        );
        assert_eq!(
            bag(json!({"x-auth-type": "Application & Application User"}))
                .resolve_disable_security(),
            Some(false)
        );
        assert_eq!(bag(json!({})).resolve_disable_security(), None);
    }

    #[test]
    fn resolving_twice_is_stable() {
        let extensions = bag(json!({"x-wso2-production-endpoints": {"urls": ["https://a.com/v1"]}}));
        let named = BTreeMap::new();

        let first = extensions
            .resolve_endpoints(X_WSO2_PRODUCTION_ENDPOINTS, ApiKind::Http, &named, false)
            .expect("first");
        let second = extensions
            .resolve_endpoints(X_WSO2_PRODUCTION_ENDPOINTS, ApiKind::Http, &named, false)
            .expect("second");

        assert_eq!(first, second);
        assert!(extensions.contains(X_WSO2_PRODUCTION_ENDPOINTS));
    }

    #[test]
    fn cors_falls_back_to_global_when_disabled() {
        let global = GlobalCorsSettings::default();
        let explicit = bag(json!({"x-wso2-cors": {
            "accessControlAllowOrigins": ["https://shop.example.com"],
            "accessControlAllowCredentials": true
        }}));
        let cors = explicit.resolve_cors(&global).expect("cors");
        assert!(cors.enabled);
        assert_eq!(cors.allow_origins, vec!["https://shop.example.com"]);

        let disabled = bag(json!({"x-wso2-cors": {"corsConfigurationEnabled": false}}));
        let cors = disabled.resolve_cors(&global).expect("cors");
        assert_eq!(cors.allow_origins, global.allow_origins);

        assert!(bag(json!({"x-wso2-cors": "yes"})).resolve_cors(&global).is_none());
    }

    #[test]
    fn endpoint_definition_with_advance_config_and_security() {
        let extensions = bag(json!({"x-wso2-sandbox-endpoints": {
            "urls": ["http://sand-1.example.com:8080/api", "http://sand-2.example.com:8080/api"],
            "type": "failover",
            "advanceEndpointConfig": {
                "retryConfig": {"count": 3, "statusCodes": [503]},
                "timeoutInMillis": 2000
            },
            "securityConfig": {"type": "basic", "username": "admin", "password": "admin"}
        }}));

        let cluster = extensions
            .resolve_endpoints(X_WSO2_SANDBOX_ENDPOINTS, ApiKind::Http, &BTreeMap::new(), false)
            .expect("resolves")
            .expect("present");

        assert_eq!(cluster.prefix, SANDBOX_CLUSTER_PREFIX);
        assert_eq!(cluster.strategy, EndpointStrategy::Failover);
        assert_eq!(cluster.endpoints.len(), 2);
        let config = cluster.config.expect("config");
        assert_eq!(config.timeout_millis, Some(2000));
        assert_eq!(config.retry.expect("retry").status_codes, vec![503]);
        assert!(cluster.security.expect("security").enabled);
    }

    #[test]
    fn endpoint_definition_errors() {
        let named = BTreeMap::new();
        let missing_urls = bag(json!({"x-wso2-production-endpoints": {"type": "loadbalance"}}));
        let err = missing_urls
            .resolve_endpoints(X_WSO2_PRODUCTION_ENDPOINTS, ApiKind::Http, &named, false)
            .unwrap_err();
        assert!(err.to_string().contains("urls property is not provided"));

        let oauth = bag(json!({"x-wso2-production-endpoints": {
            "urls": ["http://a.com"],
            "securityConfig": {"type": "oauth"}
        }}));
        assert!(oauth
            .resolve_endpoints(X_WSO2_PRODUCTION_ENDPOINTS, ApiKind::Http, &named, false)
            .is_err());

        let dangling = bag(json!({"x-wso2-production-endpoints": "#/x-wso2-endpoints/missing"}));
        assert!(dangling
            .resolve_endpoints(X_WSO2_PRODUCTION_ENDPOINTS, ApiKind::Http, &named, false)
            .is_err());
    }

    #[test]
    fn endpoint_reference_resolves_named_cluster() {
        let extensions = bag(json!({
            "x-wso2-endpoints": [{"myEndpoint": {"urls": ["https://named.example.com/v2"]}}],
            "x-wso2-production-endpoints": "#/x-wso2-endpoints/myEndpoint"
        }));

        let named = extensions.resolve_named_endpoints(ApiKind::Http, false).expect("named");
        assert_eq!(named["myEndpoint"].prefix, "myEndpoint_xwso2cluster");

        let production = extensions
            .resolve_endpoints(X_WSO2_PRODUCTION_ENDPOINTS, ApiKind::Http, &named, false)
            .expect("resolves")
            .expect("present");
        assert_eq!(production.prefix, "myEndpoint_xwso2cluster");
        assert_eq!(production.endpoints[0].host, "named.example.com");
    }

    #[test]
    fn interceptor_requires_service_url() {
        let extensions = bag(json!({"x-wso2-request-interceptor": {
            "serviceURL": "https://interceptor.example.com:8443/api",
            "includes": ["request_headers", "invocation_context", "unknown"],
            "requestTimeout": 5
        }}));

        let interceptor = extensions
            .resolve_interceptor(X_WSO2_REQUEST_INTERCEPTOR, 20)
            .expect("resolves")
            .expect("present");
        assert_eq!(interceptor.request_timeout_seconds, 5);
        assert_eq!(interceptor.cluster_timeout_seconds, 20);
        assert!(interceptor.includes.request_headers);
        assert!(interceptor.includes.invocation_context);
        assert!(!interceptor.includes.request_body);

        let missing = bag(json!({"x-wso2-request-interceptor": {"includes": []}}));
        assert!(missing.resolve_interceptor(X_WSO2_REQUEST_INTERCEPTOR, 20).is_err());
    }
}
