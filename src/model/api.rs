//! The unified API model every definition format is parsed into.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::{debug, error, info, warn};

use crate::config::{AdapterConfig, UpstreamSettings};
use crate::errors::{Error, Result};
use crate::model::cors::CorsConfig;
use crate::model::endpoint::{Endpoint, EndpointCluster, EndpointSecurity, EndpointStrategy};
use crate::model::extensions::{
    ExtensionBag, PRODUCTION_CLUSTER_PREFIX, SANDBOX_CLUSTER_PREFIX, X_WSO2_PRODUCTION_ENDPOINTS,
    X_WSO2_REQUEST_INTERCEPTOR, X_WSO2_RESPONSE_INTERCEPTOR, X_WSO2_SANDBOX_ENDPOINTS,
};
use crate::model::interceptor::InterceptEndpoint;
use crate::model::policy::{format_operation_policies, PolicyContainerMap};
use crate::model::resource::{sort_resources, Resource};
use crate::model::security::{
    requirement_for, SecurityRequirement, SecurityScheme, API_KEY_IN_HEADER, API_KEY_IN_QUERY,
    DEFAULT_OAUTH2_SECURITY,
};

static BASEPATH_VALIDATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[/][a-zA-Z0-9~/_.-]*$").expect("valid basepath regex"));

/// Type of API being deployed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiKind {
    #[default]
    #[serde(rename = "HTTP")]
    Http,
    #[serde(rename = "WS")]
    Ws,
    #[serde(rename = "WEBHOOK")]
    Webhook,
    #[serde(rename = "GRAPHQL")]
    GraphQl,
}

impl ApiKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "HTTP",
            Self::Ws => "WS",
            Self::Webhook => "WEBHOOK",
            Self::GraphQl => "GRAPHQL",
        }
    }
}

impl fmt::Display for ApiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiKind {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_uppercase().as_str() {
            "HTTP" => Ok(Self::Http),
            "WS" => Ok(Self::Ws),
            "WEBHOOK" => Ok(Self::Webhook),
            "GRAPHQL" => Ok(Self::GraphQl),
            other => Err(Error::malformed("api.yaml", format!("API type {} is not supported", other))),
        }
    }
}

/// Basic auth credentials towards the production and sandbox upstreams
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSecurityPair {
    #[serde(default)]
    pub production: Option<EndpointSecurity>,
    #[serde(default)]
    pub sandbox: Option<EndpointSecurity>,
}

/// Root of the unified model
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Api {
    pub uuid: String,
    /// Id from api.yaml; empty for definitions deployed without a project
    pub id: String,
    pub kind: ApiKind,
    pub title: String,
    pub version: String,
    pub description: String,
    pub organization_id: String,
    pub x_wso2_basepath: String,
    pub security_schemes: Vec<SecurityScheme>,
    pub security: Vec<SecurityRequirement>,
    pub cors: Option<CorsConfig>,
    pub throttling_tier: String,
    pub auth_header: String,
    pub disable_security: bool,
    pub production_endpoints: Option<EndpointCluster>,
    pub sandbox_endpoints: Option<EndpointCluster>,
    /// Clusters declared under `x-wso2-endpoints`, by name
    pub named_endpoints: BTreeMap<String, EndpointCluster>,
    pub resources: Vec<Resource>,
    pub extensions: ExtensionBag,
    pub lifecycle_status: String,
    /// Also routed on the basepath without its version segment
    pub is_default_version: bool,
    pub is_prototyped: bool,
    pub endpoint_security: EndpointSecurityPair,
    pub request_interceptor: Option<InterceptEndpoint>,
    pub response_interceptor: Option<InterceptEndpoint>,
    pub http2_backend_enabled: bool,
    pub pass_request_payload: bool,
}

impl Api {
    pub fn new(kind: ApiKind) -> Self {
        Self { uuid: uuid::Uuid::new_v4().to_string(), kind, ..Default::default() }
    }

    /// api.yaml id, or the name / version hash for APIs deployed without one
    pub fn unique_id(&self) -> String {
        if self.id.is_empty() {
            api_hash(&self.title, &self.version)
        } else {
            self.id.clone()
        }
    }

    /// Apply the API, resource and operation level vendor extensions.
    ///
    /// Production endpoints taken from the definition's servers are dropped when only
    /// `x-wso2-sandbox-endpoints` is declared at API level.
    pub fn apply_extensions(&mut self, config: &AdapterConfig) -> Result<()> {
        let consul = config.adapter.consul.enabled;

        if let Some(basepath) = self.extensions.resolve_basepath() {
            self.x_wso2_basepath = basepath;
        }

        self.named_endpoints =
            self.extensions.resolve_named_endpoints(self.kind, consul).inspect_err(|err| {
                error!(api = %self.title, error = %err, "Error while adding x-wso2-endpoints");
            })?;

        let production = self.resolve_endpoint_extension(X_WSO2_PRODUCTION_ENDPOINTS, consul)?;
        let sandbox = self.resolve_endpoint_extension(X_WSO2_SANDBOX_ENDPOINTS, consul)?;

        match (production, sandbox) {
            (None, Some(sandbox)) => {
                self.production_endpoints = None;
                self.sandbox_endpoints = Some(sandbox);
            }
            (production, sandbox) => {
                if production.is_some() {
                    self.production_endpoints = production;
                }
                if sandbox.is_some() {
                    self.sandbox_endpoints = sandbox;
                }
            }
        }

        self.cors = self.extensions.resolve_cors(&config.envoy.cors);
        if let Some(tier) = self.extensions.resolve_throttling_tier().filter(|tier| !tier.is_empty()) {
            self.throttling_tier = tier;
        }
        self.disable_security = self.extensions.resolve_disable_security().unwrap_or(false);
        if let Some(header) = self.extensions.resolve_auth_header() {
            self.auth_header = header;
        }
        if let Some(enabled) = self.extensions.resolve_http2_backend() {
            self.http2_backend_enabled = enabled;
        }
        // GraphQL queries are authorized from the request body
        self.pass_request_payload = self.kind == ApiKind::GraphQl
            || self
                .extensions
                .resolve_pass_request_payload()
                .unwrap_or(config.envoy.payload_passing.pass_request_payload);

        let timeout = config.envoy.cluster_timeout_seconds;
        self.request_interceptor =
            self.extensions.resolve_interceptor(X_WSO2_REQUEST_INTERCEPTOR, timeout)?;
        self.response_interceptor =
            self.extensions.resolve_interceptor(X_WSO2_RESPONSE_INTERCEPTOR, timeout)?;

        Ok(())
    }

    /// Resolve an endpoint extension at API level and on every resource. Returns the API level
    /// cluster; resource level clusters are stored on their resources.
    fn resolve_endpoint_extension(&mut self, key: &str, consul: bool) -> Result<Option<EndpointCluster>> {
        let api_level = self
            .extensions
            .resolve_endpoints(key, self.kind, &self.named_endpoints, consul)
            .map_err(|err| {
                error!(api = %self.title, extension = key, error = %err, "Error while extracting endpoints");
                err
            })?;

        for resource in &mut self.resources {
            let resolved = resource
                .extensions
                .resolve_endpoints(key, self.kind, &self.named_endpoints, consul)
                .map_err(|err| {
                    Error::malformed(
                        key,
                        format!(
                            "error encountered when extracting resource endpoints for API with basepath: {}. {}",
                            self.x_wso2_basepath, err
                        ),
                    )
                })?;
            if let Some(cluster) = resolved {
                if key == X_WSO2_SANDBOX_ENDPOINTS {
                    resource.sandbox_endpoints = Some(cluster);
                } else {
                    resource.production_endpoints = Some(cluster);
                }
            }
        }

        Ok(api_level)
    }

    /// Replace definition security with the api.yaml security options.
    ///
    /// With API key security, header and query key schemes are generated; with OAuth2, only the
    /// `default` scheme survives. Requirements naming unknown schemes are dropped.
    pub fn sanitize_security(&mut self, api_key_enabled: bool, oauth2_enabled: bool) {
        let overridden = api_key_enabled || oauth2_enabled;
        let mut allowed: Vec<String> = Vec::new();
        let mut schemes: Vec<SecurityScheme> = Vec::new();

        if api_key_enabled {
            schemes.push(SecurityScheme::api_key(API_KEY_IN_HEADER, "header"));
            schemes.push(SecurityScheme::api_key(API_KEY_IN_QUERY, "query"));
        }
        for scheme in &self.security_schemes {
            if oauth2_enabled && scheme.definition_name == DEFAULT_OAUTH2_SECURITY {
                schemes.push(scheme.clone());
                allowed.push(scheme.definition_name.clone());
            } else if !overridden {
                allowed.push(scheme.definition_name.clone());
            }
        }
        if overridden {
            debug!(api = %self.title, version = %self.version, "Security definitions overridden by api.yaml");
            self.security_schemes = schemes;
        }

        let key_requirements = || vec![requirement_for(API_KEY_IN_HEADER), requirement_for(API_KEY_IN_QUERY)];

        let mut api_security = self.sanitize_requirements(&self.security, &allowed);
        if api_key_enabled {
            api_security.extend(key_requirements());
        }
        self.security = api_security;

        let title = self.title.clone();
        let version = self.version.clone();
        for resource in &mut self.resources {
            for operation in &mut resource.operations {
                let mut security = filter_requirements(&operation.security, &allowed, &title, &version);
                if oauth2_enabled && api_key_enabled {
                    security.extend(key_requirements());
                }
                operation.security = security;
            }
        }
    }

    fn sanitize_requirements(
        &self,
        requirements: &[SecurityRequirement],
        allowed: &[String],
    ) -> Vec<SecurityRequirement> {
        filter_requirements(requirements, allowed, &self.title, &self.version)
    }

    /// Check the API can be deployed and clamp endpoint configuration to the gateway limits.
    pub fn validate(&mut self, upstream: &UpstreamSettings) -> Result<()> {
        let has_endpoints = |cluster: &Option<EndpointCluster>| {
            cluster.as_ref().is_some_and(|cluster| !cluster.endpoints.is_empty())
        };
        if !has_endpoints(&self.production_endpoints) && !has_endpoints(&self.sandbox_endpoints) {
            error!(api = %self.title, version = %self.version, "No endpoints are provided for the API");
            return Err(Error::malformed(&self.title, "no endpoints are provided for the API"));
        }

        if let Some(cluster) = self.production_endpoints.as_mut() {
            cluster.validate("API level production", upstream)?;
        }
        if let Some(cluster) = self.sandbox_endpoints.as_mut() {
            cluster.validate("API level sandbox", upstream)?;
        }
        for resource in &mut self.resources {
            if let Some(cluster) = resource.production_endpoints.as_mut() {
                cluster.validate("Resource level production", upstream)?;
            }
            if let Some(cluster) = resource.sandbox_endpoints.as_mut() {
                cluster.validate("Resource level sandbox", upstream)?;
            }
        }

        self.validate_basepath().inspect_err(|err| {
            error!(api = %self.title, version = %self.version, error = %err, "Invalid basepath");
        })
    }

    fn validate_basepath(&self) -> Result<()> {
        if self.x_wso2_basepath.is_empty() {
            return Err(Error::malformed(
                &self.title,
                "empty Basepath is provided. Provide a non empty context either using the \
                 x-wso2-basePath extension, or else 'basePath' (if OpenAPI v2) or a 'servers' \
                 entry (if OpenAPI v3)",
            ));
        }
        if !BASEPATH_VALIDATOR.is_match(&self.x_wso2_basepath) {
            return Err(Error::malformed(
                &self.title,
                "invalid basepath. Does not start with / or includes invalid characters",
            ));
        }
        Ok(())
    }

    /// Apply endpoint overrides from the environment.
    ///
    /// `api_<hash>_prod_endpoint_<n>` / `api_<hash>_sand_endpoint_<n>` replace the endpoint lists
    /// (read from `n = 0` until the first gap) and `api_<hash>_{prod,sand}_basic_{username,password}`
    /// replace the credentials of enabled endpoint security.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let hash = api_hash(&self.title, &self.version);

        for (environment, prefix) in [("prod", PRODUCTION_CLUSTER_PREFIX), ("sand", SANDBOX_CLUSTER_PREFIX)] {
            let endpoints = self.env_endpoints(&hash, environment, &lookup);
            if !endpoints.is_empty() {
                info!(
                    api = %self.title,
                    version = %self.version,
                    environment,
                    "Applying endpoints provided in environment variables"
                );
                let cluster = EndpointCluster {
                    prefix: prefix.to_string(),
                    endpoints,
                    strategy: EndpointStrategy::LoadBalance,
                    config: None,
                    security: None,
                };
                let slot = if environment == "prod" {
                    &mut self.production_endpoints
                } else {
                    &mut self.sandbox_endpoints
                };
                *slot = Some(match slot.take() {
                    Some(existing) => EndpointCluster { config: existing.config, security: existing.security, ..cluster },
                    None => cluster,
                });
            }

            let slot = if environment == "prod" {
                self.production_endpoints.as_mut()
            } else {
                self.sandbox_endpoints.as_mut()
            };
            if let Some(security) = slot.and_then(|cluster| cluster.security.as_mut()).filter(|s| s.enabled) {
                let key = |field: &str| format!("api_{}_{}_basic_{}", hash, environment, field);
                if let Some(username) = lookup(&key("username")) {
                    security.username = username;
                }
                if let Some(password) = lookup(&key("password")) {
                    security.password = password;
                }
            }
        }
    }

    fn env_endpoints<F>(&self, hash: &str, environment: &str, lookup: &F) -> Vec<Endpoint>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut endpoints = Vec::new();
        for index in 0.. {
            let key = format!("api_{}_{}_endpoint_{}", hash, environment, index);
            let Some(url) = lookup(&key).filter(|url| !url.is_empty()) else {
                break;
            };
            match Endpoint::parse(&url, self.kind) {
                Ok(endpoint) => endpoints.push(endpoint),
                Err(err) => error!(
                    api = %self.title,
                    url = %url,
                    error = %err,
                    "Error while reading endpoint from environment variables"
                ),
            }
        }
        endpoints
    }

    /// Render every operation's policies against the project's policy containers
    pub fn format_policies(&mut self, containers: &PolicyContainerMap) {
        let api_id = self.unique_id();
        for resource in &mut self.resources {
            for operation in &mut resource.operations {
                if operation.policies.is_empty() {
                    continue;
                }
                operation.policies =
                    format_operation_policies(&operation.policies, containers, &api_id, &self.organization_id);
            }
        }
    }

    pub fn sort_resources(&mut self) {
        sort_resources(&mut self.resources);
    }
}

fn filter_requirements(
    requirements: &[SecurityRequirement],
    allowed: &[String],
    title: &str,
    version: &str,
) -> Vec<SecurityRequirement> {
    let mut sanitized = Vec::new();
    for requirement in requirements {
        for name in requirement.keys() {
            if allowed.contains(name) {
                sanitized.push(requirement.clone());
            } else {
                warn!(
                    scheme = %name,
                    api = %title,
                    version = %version,
                    "A security definition has not been found for the requirement"
                );
            }
        }
    }
    sanitized
}

/// Hex SHA-1 of `name:version`, used to name environment overrides
pub fn api_hash(name: &str, version: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("{}:{}", name, version).as_bytes());
    hex::encode(hasher.finalize())
}
