//! The project descriptor (`api.yaml` / `api.json`).
//!
//! The descriptor carries the API identity, its endpoints and the security options chosen at
//! design time. It is overlaid on the model parsed from the definition, or on an empty model
//! when the API type has no definition to parse.

use std::collections::BTreeMap;

use serde::de::IgnoredAny;
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::errors::{Error, Result};
use crate::model::extensions::{PRODUCTION_CLUSTER_PREFIX, SANDBOX_CLUSTER_PREFIX};
use crate::model::security::{
    requirement_for, API_KEY_IN_HEADER, API_KEY_IN_QUERY, DEFAULT_OAUTH2_SECURITY,
};
use crate::model::{
    build_endpoint_cluster, Api, ApiKind, EndpointCluster, EndpointConfig, EndpointSecurity,
    EndpointSecurityPair, EndpointStrategy, ExtensionBag, Operation, OperationPolicies, Resource,
    SecurityScheme,
};
use crate::parser::from_json_or_yaml;

const PROTOTYPED: &str = "prototyped";
const INLINE_IMPLEMENTATION: &str = "INLINE";
const BASIC_SECURITY: &str = "BASIC";
const AUTH_TYPE_NONE: &str = "None";
/// `securityScheme` entry enabling API key authentication
pub const API_KEY_SECURITY_OPTION: &str = "api_key";
/// `securityScheme` entry enabling OAuth2 authentication
pub const OAUTH2_SECURITY_OPTION: &str = "oauth2";
const WS_UPGRADE_METHOD: &str = "GET";

/// Root of api.yaml
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiYaml {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub version: String,
    pub data: ApiYamlData,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiYamlData {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub version: String,
    #[serde(rename = "type", default)]
    pub api_type: String,
    #[serde(rename = "lifeCycleStatus", default)]
    pub lifecycle_status: String,
    #[serde(default)]
    pub is_default_version: bool,
    #[serde(default)]
    pub organization_id: String,
    #[serde(default)]
    pub authorization_header: String,
    #[serde(default)]
    pub security_scheme: Vec<String>,
    #[serde(default)]
    pub endpoint_implementation_type: String,
    #[serde(default)]
    pub operations: Vec<OperationYaml>,
    #[serde(default)]
    pub endpoint_config: EndpointConfigYaml,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationYaml {
    pub target: String,
    pub verb: String,
    #[serde(default)]
    pub auth_type: String,
    #[serde(default)]
    pub throttling_policy: String,
    #[serde(default)]
    pub operation_policies: OperationPolicies,
}

/// One production / sandbox endpoint entry
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointInfo {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub config: Option<EndpointConfig>,
}

/// Production / sandbox endpoints are either a single entry or a list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EndpointList {
    One(EndpointInfo),
    Many(Vec<EndpointInfo>),
    Unsupported(IgnoredAny),
}

impl EndpointList {
    fn entries(&self, label: &str) -> Vec<EndpointInfo> {
        match self {
            Self::One(info) => vec![info.clone()],
            Self::Many(infos) => infos.clone(),
            Self::Unsupported(_) => {
                warn!(endpoints = label, "No {} endpoints provided", label);
                Vec::new()
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointConfigYaml {
    #[serde(default)]
    pub endpoint_type: String,
    #[serde(default)]
    pub production_endpoints: Option<EndpointList>,
    #[serde(default)]
    pub sandbox_endpoints: Option<EndpointList>,
    #[serde(default)]
    pub production_failovers: Vec<EndpointInfo>,
    #[serde(default)]
    pub sandbox_failovers: Vec<EndpointInfo>,
    #[serde(default)]
    pub endpoint_security: EndpointSecurityPair,
    #[serde(default)]
    pub implementation_status: String,
}

impl EndpointConfigYaml {
    pub fn production(&self) -> Vec<EndpointInfo> {
        self.production_endpoints.as_ref().map(|list| list.entries("production")).unwrap_or_default()
    }

    pub fn sandbox(&self) -> Vec<EndpointInfo> {
        self.sandbox_endpoints.as_ref().map(|list| list.entries("sandbox")).unwrap_or_default()
    }
}

impl ApiYaml {
    /// Read and validate api.yaml / api.json content.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let descriptor: Self = from_json_or_yaml(bytes, "api.yaml")?;
        descriptor.verify_mandatory_fields()?;

        if descriptor.data.endpoint_implementation_type.eq_ignore_ascii_case(INLINE_IMPLEMENTATION) {
            warn!(api = %descriptor.data.name, "Inline endpoint implementation type is not supported");
            return Err(Error::malformed(
                "api.yaml",
                "inline endpointImplementationType is not currently supported",
            ));
        }
        Ok(descriptor)
    }

    /// API type named by the descriptor
    pub fn api_kind(&self) -> Result<ApiKind> {
        if self.data.api_type.trim().is_empty() {
            return Err(Error::malformed("api.yaml", "API type is missing"));
        }
        self.data.api_type.parse()
    }

    pub fn api_key_enabled(&self) -> bool {
        self.data.security_scheme.iter().any(|scheme| scheme == API_KEY_SECURITY_OPTION)
    }

    pub fn oauth2_enabled(&self) -> bool {
        self.data.security_scheme.iter().any(|scheme| scheme == OAUTH2_SECURITY_OPTION)
    }

    fn verify_mandatory_fields(&self) -> Result<()> {
        let data = &self.data;
        let mut missing = Vec::new();
        if data.name.is_empty() {
            missing.push("API Name");
        }
        if data.version.is_empty() {
            missing.push("API Version");
        }
        if data.context.is_empty() {
            missing.push("API Context");
        }

        let production = data.endpoint_config.production();
        let sandbox = data.endpoint_config.sandbox();
        if production.is_empty() && sandbox.is_empty() {
            missing.push("API production and sandbox endpoints");
        }

        if !missing.is_empty() {
            let name = if data.name.is_empty() { "unknownAPIName" } else { data.name.as_str() };
            let version = if data.version.is_empty() { "unknownAPIVersion" } else { data.version.as_str() };
            let message = format!("{} fields cannot be empty for {} {}", missing.join(", "), name, version);
            error!(api = %name, version = %version, "{}", message);
            return Err(Error::malformed("api.yaml", message));
        }

        for (label, endpoints) in [("production", &production), ("sandbox", &sandbox)] {
            if endpoints.iter().any(|endpoint| endpoint.url.trim().is_empty() || endpoint.url.starts_with('/')) {
                return Err(Error::malformed(
                    "api.yaml",
                    format!("relative urls or empty values are not supported for API {} endpoints", label),
                ));
            }
        }
        Ok(())
    }

    /// Overlay the descriptor on a parsed model.
    ///
    /// Identity, basepath (`context/version`), endpoints and endpoint security always come from
    /// the descriptor. Resources are built from `operations` only when the definition produced
    /// none; otherwise operation policies are attached to the matching definition operations.
    pub fn apply_to(&self, api: &mut Api, consul_enabled: bool) -> Result<()> {
        let data = &self.data;
        api.id = data.id.clone();
        api.title = data.name.clone();
        api.version = data.version.clone();
        api.x_wso2_basepath = format!("{}/{}", data.context, data.version);
        api.organization_id = data.organization_id.clone();
        api.lifecycle_status = data.lifecycle_status.to_uppercase();
        api.is_default_version = data.is_default_version;
        api.is_prototyped = data.endpoint_config.implementation_status == PROTOTYPED;
        if !data.authorization_header.is_empty() {
            api.auth_header = data.authorization_header.clone();
        }

        let endpoint_config = &data.endpoint_config;
        if let Some(cluster) = self.endpoint_cluster(
            PRODUCTION_CLUSTER_PREFIX,
            &endpoint_config.production(),
            &endpoint_config.production_failovers,
            api.kind,
            consul_enabled,
        )? {
            api.production_endpoints = Some(cluster);
        }
        if let Some(cluster) = self.endpoint_cluster(
            SANDBOX_CLUSTER_PREFIX,
            &endpoint_config.sandbox(),
            &endpoint_config.sandbox_failovers,
            api.kind,
            consul_enabled,
        )? {
            api.sandbox_endpoints = Some(cluster);
        }

        let security = &endpoint_config.endpoint_security;
        api.endpoint_security = EndpointSecurityPair {
            production: supported_security(security.production.as_ref(), "production"),
            sandbox: supported_security(security.sandbox.as_ref(), "sandbox"),
        };
        if let Some(cluster) = api.production_endpoints.as_mut() {
            cluster.security = api.endpoint_security.production.clone().filter(|s| s.enabled);
        }
        if let Some(cluster) = api.sandbox_endpoints.as_mut() {
            cluster.security = api.endpoint_security.sandbox.clone().filter(|s| s.enabled);
        }

        if api.kind == ApiKind::GraphQl {
            self.graphql_security(api);
        }

        if api.resources.is_empty() {
            api.resources = self.resources(api.kind);
        } else {
            self.attach_operation_policies(api);
        }

        debug!(api = %api.title, version = %api.version, basepath = %api.x_wso2_basepath, "Applied api.yaml");
        Ok(())
    }

    fn endpoint_cluster(
        &self,
        prefix: &str,
        endpoints: &[EndpointInfo],
        failovers: &[EndpointInfo],
        kind: ApiKind,
        consul_enabled: bool,
    ) -> Result<Option<EndpointCluster>> {
        if endpoints.is_empty() {
            return Ok(None);
        }
        let strategy = if failovers.is_empty() {
            EndpointStrategy::LoadBalance
        } else {
            EndpointStrategy::Failover
        };
        let urls: Vec<String> =
            endpoints.iter().chain(failovers).map(|endpoint| endpoint.url.clone()).collect();

        let cluster = build_endpoint_cluster(prefix, &urls, strategy, kind, consul_enabled)
            .inspect_err(|err| {
                error!(api = %self.data.name, cluster = prefix, error = %err, "Error while reading api.yaml endpoints");
            })?;
        Ok(cluster.map(|mut cluster| {
            cluster.config = endpoints.iter().find_map(|endpoint| endpoint.config.clone());
            cluster
        }))
    }

    fn graphql_security(&self, api: &mut Api) {
        if self.api_key_enabled() {
            api.security_schemes.push(SecurityScheme::api_key(API_KEY_IN_HEADER, "header"));
            api.security_schemes.push(SecurityScheme::api_key(API_KEY_IN_QUERY, "query"));
        }
        if self.oauth2_enabled() {
            api.security_schemes.push(SecurityScheme {
                definition_name: DEFAULT_OAUTH2_SECURITY.to_string(),
                kind: OAUTH2_SECURITY_OPTION.to_string(),
                name: String::new(),
                location: String::new(),
            });
            api.security.push(requirement_for(DEFAULT_OAUTH2_SECURITY));
        }
    }

    /// One resource per target, operations in declaration order. WebSocket targets get a single
    /// upgrade `GET`.
    fn resources(&self, kind: ApiKind) -> Vec<Resource> {
        let mut grouped: Vec<(String, Vec<Operation>)> = Vec::new();
        for operation in &self.data.operations {
            let index = match grouped.iter().position(|(target, _)| *target == operation.target) {
                Some(index) => index,
                None => {
                    grouped.push((operation.target.clone(), Vec::new()));
                    grouped.len() - 1
                }
            };
            let operations = &mut grouped[index].1;
            if kind == ApiKind::Ws {
                if operations.is_empty() {
                    operations.push(yaml_operation(WS_UPGRADE_METHOD, operation));
                }
                continue;
            }
            operations.push(yaml_operation(&operation.verb, operation));
        }

        grouped
            .into_iter()
            .map(|(target, operations)| Resource::new(target, operations, ExtensionBag::new()))
            .collect()
    }

    fn attach_operation_policies(&self, api: &mut Api) {
        let policies: BTreeMap<(&str, String), &OperationPolicies> = self
            .data
            .operations
            .iter()
            .filter(|operation| !operation.operation_policies.is_empty())
            .map(|operation| {
                ((operation.target.as_str(), operation.verb.to_uppercase()), &operation.operation_policies)
            })
            .collect();
        if policies.is_empty() {
            return;
        }

        for resource in &mut api.resources {
            for operation in &mut resource.operations {
                if let Some(found) = policies.get(&(resource.path.as_str(), operation.method.clone())) {
                    operation.policies = (*found).clone();
                }
            }
        }
    }
}

fn yaml_operation(method: &str, operation: &OperationYaml) -> Operation {
    let mut parsed = Operation::new(method);
    parsed.throttling_tier = operation.throttling_policy.clone();
    if !operation.auth_type.is_empty() {
        parsed.disable_security = Some(operation.auth_type.eq_ignore_ascii_case(AUTH_TYPE_NONE));
    }
    parsed.policies = operation.operation_policies.clone();
    parsed
}

/// Only BASIC endpoint security is supported; anything else is logged and disabled.
fn supported_security(security: Option<&EndpointSecurity>, label: &str) -> Option<EndpointSecurity> {
    let security = security?;
    if !security.enabled {
        return Some(security.clone());
    }
    if security.security_type.eq_ignore_ascii_case(BASIC_SECURITY) {
        return Some(security.clone());
    }
    error!(
        environment = label,
        security_type = %security.security_type,
        "Endpoint security type given in api.yaml is not currently supported"
    );
    Some(EndpointSecurity { enabled: false, ..security.clone() })
}
