//! # Definition Parsers
//!
//! Every supported description format is normalised to a `serde_json::Value` first (JSON, then
//! YAML as a fallback) and then parsed into the unified [`Api`] model:
//!
//! - Swagger 2.0 and OpenAPI 3.1 are walked as JSON values ([`openapi`])
//! - OpenAPI 3.0 is typed through `openapiv3::OpenAPI` ([`openapi`])
//! - AsyncAPI channels become WebSocket resources ([`asyncapi`])
//! - The project descriptor `api.yaml` overlays identity, endpoints and security ([`api_yaml`])

pub mod api_yaml;
pub mod asyncapi;
pub mod openapi;

pub use api_yaml::{ApiYaml, ApiYamlData, EndpointConfigYaml, OperationYaml};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use crate::errors::{Error, Result};
use crate::model::extensions::PRODUCTION_CLUSTER_PREFIX;
use crate::model::{Api, ApiKind, Endpoint, EndpointCluster, EndpointStrategy, Resource};

/// Description format of an API definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    Swagger2,
    OpenApi3,
    OpenApi31,
    AsyncApi,
}

impl DefinitionFormat {
    /// Detect the format from the version marker at the document root.
    pub fn detect(document: &Value) -> Result<Self> {
        if let Some(version) = document.get("swagger").and_then(version_string) {
            if version.starts_with('2') {
                return Ok(Self::Swagger2);
            }
            return Err(Error::malformed("definition", format!("unsupported swagger version {}", version)));
        }
        if let Some(version) = document.get("openapi").and_then(version_string) {
            if version.starts_with("3.1") {
                return Ok(Self::OpenApi31);
            }
            if version.starts_with('3') {
                return Ok(Self::OpenApi3);
            }
            return Err(Error::malformed("definition", format!("unsupported openapi version {}", version)));
        }
        if document.get("asyncapi").is_some() {
            return Ok(Self::AsyncApi);
        }
        Err(Error::malformed(
            "definition",
            "the definition is neither a swagger, openapi nor asyncapi document",
        ))
    }
}

fn version_string(value: &Value) -> Option<String> {
    match value {
        Value::String(version) => Some(version.clone()),
        Value::Number(version) => Some(version.to_string()),
        _ => None,
    }
}

/// Read JSON or YAML bytes into a JSON value.
pub fn to_json_value(bytes: &[u8], file: &str) -> Result<Value> {
    from_json_or_yaml(bytes, file)
}

/// Deserialize JSON or YAML bytes. YAML goes through `serde_json::Value` so both formats share the
/// same field handling.
pub fn from_json_or_yaml<T: DeserializeOwned>(bytes: &[u8], file: &str) -> Result<T> {
    match serde_json::from_slice(bytes) {
        Ok(parsed) => Ok(parsed),
        Err(json_err) => {
            let value: Value = serde_yaml::from_slice(bytes).map_err(|yaml_err| {
                Error::malformed(
                    file,
                    format!("JSON error: {}; YAML error: {}", json_err, yaml_err),
                )
            })?;
            serde_json::from_value(value)
                .map_err(|err| Error::malformed(file, format!("invalid structure: {}", err)))
        }
    }
}

/// Parse an API definition into the unified model. Resources come back sorted.
pub fn parse_definition(bytes: &[u8], kind: ApiKind) -> Result<Api> {
    let document = to_json_value(bytes, "definition")?;
    let format = DefinitionFormat::detect(&document)?;
    debug!(?format, %kind, "Parsing API definition");

    let mut api = match format {
        DefinitionFormat::Swagger2 => openapi::parse_swagger2(&document, kind)?,
        DefinitionFormat::OpenApi3 => openapi::parse_openapi3(document, kind)?,
        DefinitionFormat::OpenApi31 => openapi::parse_openapi31(&document, kind)?,
        DefinitionFormat::AsyncApi => asyncapi::parse_asyncapi(&document)?,
    };
    api.sort_resources();
    Ok(api)
}

/// Production cluster from server URLs. Relative and empty URLs are ignored; URLs that fail to
/// parse are logged and skipped.
pub(crate) fn server_cluster<'a>(
    urls: impl IntoIterator<Item = &'a str>,
    kind: ApiKind,
) -> Option<EndpointCluster> {
    let mut endpoints = Vec::new();
    for url in urls {
        let url = url.trim();
        if url.is_empty() || url.starts_with('/') {
            continue;
        }
        match Endpoint::parse(url, kind) {
            Ok(endpoint) => endpoints.push(endpoint),
            Err(err) => error!(url = %url, error = %err, "Error while parsing the server URL"),
        }
    }

    if endpoints.is_empty() {
        return None;
    }
    Some(EndpointCluster {
        prefix: PRODUCTION_CLUSTER_PREFIX.to_string(),
        endpoints,
        strategy: EndpointStrategy::LoadBalance,
        config: None,
        security: None,
    })
}

/// Back-fill a disable-security value onto operations that do not carry their own. With
/// `path_level_wins`, a path item's own value takes precedence over `api_level`.
pub(crate) fn backfill_disable_security(
    resources: &mut [Resource],
    api_level: Option<bool>,
    path_level_wins: bool,
) {
    for resource in resources {
        let path_level = if path_level_wins {
            resource.extensions.resolve_disable_security()
        } else {
            None
        };
        let Some(inherited) = path_level.or(api_level) else {
            continue;
        };
        for operation in &mut resource.operations {
            if operation.disable_security.is_none() {
                operation.disable_security = Some(inherited);
            }
        }
    }
}

/// Fill the basepath from the first production endpoint when no extension set one.
pub(crate) fn default_basepath(api: &mut Api) {
    if !api.x_wso2_basepath.is_empty() {
        return;
    }
    if let Some(endpoint) = api.production_endpoints.as_ref().and_then(EndpointCluster::first) {
        api.x_wso2_basepath = endpoint.basepath.clone();
    }
}
