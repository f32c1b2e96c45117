//! Enforcer API descriptor.
//!
//! The enforcer authorizes requests for the gateway and needs its own view of every deployed API:
//! security schemes, per-operation requirements, throttling tiers and the policies it executes.
//! [`EnforcerApi::from_api`] projects the unified model onto that descriptor.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::policy::actions;
use crate::model::{
    Api, EndpointCluster, EndpointSecurity, MockConfig, Operation, Policy, Resource, SecurityRequirement,
    SecurityScheme,
};

/// Actions executed by the router; the enforcer never sees them
const ROUTER_ACTIONS: [&str; 4] = [
    actions::SET_HEADER,
    actions::REMOVE_HEADER,
    actions::REWRITE_RESOURCE_PATH,
    actions::REWRITE_RESOURCE_METHOD,
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcerApi {
    pub id: String,
    pub title: String,
    pub description: String,
    pub base_path: String,
    pub version: String,
    pub api_type: String,
    pub production_endpoints: Option<EnforcerEndpointCluster>,
    pub sandbox_endpoints: Option<EnforcerEndpointCluster>,
    pub resources: Vec<EnforcerResource>,
    pub security_schemes: Vec<SecurityScheme>,
    pub security: Vec<SecurityRequirement>,
    pub endpoint_security: EnforcerEndpointSecurity,
    pub authorization_header: String,
    pub disable_security: bool,
    pub organization_id: String,
    pub vhost: String,
    pub api_life_cycle_state: String,
    pub tier: String,
    pub is_mocked_api: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graphql_schema: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcerEndpointCluster {
    pub urls: Vec<EnforcerEndpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_config: Option<EnforcerRetryConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_in_millis: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcerEndpoint {
    pub host: String,
    pub basepath: String,
    pub port: u32,
    #[serde(rename = "urlType")]
    pub url_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcerRetryConfig {
    pub count: i32,
    pub status_codes: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcerResource {
    pub id: String,
    pub path: String,
    pub methods: Vec<EnforcerOperation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub production_endpoints: Option<EnforcerEndpointCluster>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_endpoints: Option<EnforcerEndpointCluster>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcerOperation {
    pub method: String,
    pub security: Vec<SecurityRequirement>,
    pub tier: String,
    pub disable_security: bool,
    pub policies: EnforcerPolicies,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mocked_api_config: Option<MockConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcerPolicies {
    pub request: Vec<EnforcerPolicy>,
    pub response: Vec<EnforcerPolicy>,
    pub fault: Vec<EnforcerPolicy>,
}

/// A rendered policy with its parameters flattened to strings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcerPolicy {
    pub action: String,
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcerEndpointSecurity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub production_security_info: Option<EnforcerSecurityInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sand_box_security_info: Option<EnforcerSecurityInfo>,
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcerSecurityInfo {
    pub username: String,
    pub password: String,
    pub security_type: String,
    pub enabled: bool,
}

impl std::fmt::Debug for EnforcerSecurityInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnforcerSecurityInfo")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("security_type", &self.security_type)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl EnforcerApi {
    /// Build the descriptor of `api` deployed on `vhost`.
    pub fn from_api(api: &Api, vhost: &str) -> Self {
        let is_mocked_api = api.is_prototyped;
        Self {
            id: api.unique_id(),
            title: api.title.clone(),
            description: api.description.clone(),
            base_path: api.x_wso2_basepath.clone(),
            version: api.version.clone(),
            api_type: api.kind.to_string(),
            production_endpoints: api.production_endpoints.as_ref().and_then(endpoint_cluster),
            sandbox_endpoints: api.sandbox_endpoints.as_ref().and_then(endpoint_cluster),
            resources: api.resources.iter().map(|resource| enforcer_resource(resource, is_mocked_api)).collect(),
            security_schemes: api.security_schemes.clone(),
            security: api.security.clone(),
            endpoint_security: EnforcerEndpointSecurity {
                production_security_info: api
                    .production_endpoints
                    .as_ref()
                    .map(|cluster| security_info(cluster.security.as_ref())),
                sand_box_security_info: api
                    .sandbox_endpoints
                    .as_ref()
                    .map(|cluster| security_info(cluster.security.as_ref())),
            },
            authorization_header: api.auth_header.clone(),
            disable_security: api.disable_security,
            organization_id: api.organization_id.clone(),
            vhost: vhost.to_string(),
            api_life_cycle_state: api.lifecycle_status.clone(),
            tier: api.throttling_tier.clone(),
            is_mocked_api,
            graphql_schema: None,
        }
    }

    pub fn with_graphql_schema(mut self, schema: Option<String>) -> Self {
        self.graphql_schema = schema;
        self
    }
}

fn endpoint_cluster(cluster: &EndpointCluster) -> Option<EnforcerEndpointCluster> {
    if cluster.endpoints.is_empty() {
        return None;
    }
    Some(EnforcerEndpointCluster {
        urls: cluster
            .endpoints
            .iter()
            .map(|endpoint| EnforcerEndpoint {
                host: endpoint.host.clone(),
                basepath: endpoint.basepath.clone(),
                port: endpoint.port,
                url_type: endpoint.url_type.to_string(),
            })
            .collect(),
        retry_config: cluster.retry().map(|retry| EnforcerRetryConfig {
            count: retry.count,
            status_codes: retry.status_codes.clone(),
        }),
        timeout_in_millis: cluster.timeout_millis(),
    })
}

fn security_info(security: Option<&EndpointSecurity>) -> EnforcerSecurityInfo {
    security
        .map(|security| EnforcerSecurityInfo {
            username: security.username.clone(),
            password: security.password.clone(),
            security_type: security.security_type.clone(),
            enabled: security.enabled,
        })
        .unwrap_or_default()
}

fn enforcer_resource(resource: &Resource, is_mocked_api: bool) -> EnforcerResource {
    EnforcerResource {
        id: resource.uuid.clone(),
        path: resource.path.clone(),
        methods: resource
            .operations
            .iter()
            .map(|operation| enforcer_operation(operation, is_mocked_api))
            .collect(),
        production_endpoints: resource.production_endpoints.as_ref().and_then(endpoint_cluster),
        sandbox_endpoints: resource.sandbox_endpoints.as_ref().and_then(endpoint_cluster),
    }
}

fn enforcer_operation(operation: &Operation, is_mocked_api: bool) -> EnforcerOperation {
    EnforcerOperation {
        method: operation.method.clone(),
        security: operation.security.clone(),
        tier: operation.throttling_tier.clone(),
        disable_security: operation.is_security_disabled(),
        policies: EnforcerPolicies {
            request: enforcer_policies(&operation.policies.request),
            response: enforcer_policies(&operation.policies.response),
            fault: enforcer_policies(&operation.policies.fault),
        },
        mocked_api_config: if is_mocked_api { operation.mock.clone() } else { None },
    }
}

/// Policies the enforcer executes. String and boolean parameters are kept, anything else dropped.
fn enforcer_policies(policies: &[Policy]) -> Vec<EnforcerPolicy> {
    policies
        .iter()
        .filter(|policy| !policy.action.is_empty() && !ROUTER_ACTIONS.contains(&policy.action.as_str()))
        .map(|policy| EnforcerPolicy {
            action: policy.action.clone(),
            parameters: policy
                .parameters
                .iter()
                .filter_map(|(key, value)| match value {
                    Value::String(value) => Some((key.clone(), value.clone())),
                    Value::Bool(value) => Some((key.clone(), value.to_string())),
                    _ => None,
                })
                .collect(),
        })
        .collect()
}
