//! Swagger 2.0, OpenAPI 3.0 and OpenAPI 3.1 parsing.

use openapiv3::{APIKeyLocation, OpenAPI, ReferenceOr};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::errors::{Error, Result};
use crate::model::extensions::{
    PRODUCTION_CLUSTER_PREFIX, X_WSO2_APPLICATION_SECURITY, X_WSO2_DISABLE_SECURITY,
};
use crate::model::security::requirement_for;
use crate::model::{
    Api, ApiKind, Endpoint, EndpointCluster, EndpointStrategy, ExtensionBag, Operation, Resource,
    SecurityRequirement, SecurityScheme,
};
use crate::parser::{backfill_disable_security, default_basepath, server_cluster};

const SWAGGER2_METHODS: &[&str] = &["get", "post", "put", "delete", "head", "patch", "options"];
const OPENAPI3_METHODS: &[&str] = &["get", "put", "post", "delete", "options", "head", "patch", "trace"];

/// Security definition added when `x-wso2-application-security` makes an API key mandatory
const APPLICATION_API_KEY: &str = "api_key";

/// Parse an OpenAPI 3.0 document through the typed `openapiv3` model.
pub fn parse_openapi3(document: Value, kind: ApiKind) -> Result<Api> {
    let spec: OpenAPI = serde_json::from_value(document)
        .map_err(|err| Error::malformed("definition", format!("Invalid OpenAPI 3 document: {}", err)))?;

    let mut api = Api::new(kind);
    api.title = spec.info.title.clone();
    api.version = spec.info.version.clone();
    api.description = spec.info.description.clone().unwrap_or_default();
    api.extensions = ExtensionBag::from_map(spec.extensions.clone().into_iter().collect());
    api.production_endpoints = server_cluster(spec.servers.iter().map(|server| server.url.as_str()), kind);
    api.security = spec.security.as_deref().map(typed_requirements).unwrap_or_default();

    if let Some(components) = spec.components.as_ref() {
        for (name, scheme) in &components.security_schemes {
            match scheme {
                ReferenceOr::Item(scheme) => api.security_schemes.push(typed_security_scheme(name, scheme)),
                ReferenceOr::Reference { reference } => {
                    warn!(scheme = %name, reference = %reference, "Security scheme references are not supported")
                }
            }
        }
    }

    for (path, item) in &spec.paths.paths {
        let item = match item {
            ReferenceOr::Item(item) => item,
            ReferenceOr::Reference { reference } => {
                warn!(path = %path, reference = %reference, "Path item references are not supported");
                continue;
            }
        };

        let operations: Vec<Operation> = [
            ("GET", &item.get),
            ("PUT", &item.put),
            ("POST", &item.post),
            ("DELETE", &item.delete),
            ("OPTIONS", &item.options),
            ("HEAD", &item.head),
            ("PATCH", &item.patch),
            ("TRACE", &item.trace),
        ]
        .into_iter()
        .filter_map(|(method, operation)| operation.as_ref().map(|operation| typed_operation(method, operation)))
        .collect();

        if operations.is_empty() {
            continue;
        }

        let mut resource = Resource::new(
            path.clone(),
            operations,
            ExtensionBag::from_map(item.extensions.clone().into_iter().collect()),
        );
        resource.production_endpoints =
            server_cluster(item.servers.iter().map(|server| server.url.as_str()), kind);
        api.resources.push(resource);
    }

    let api_level = api.extensions.get_bool(X_WSO2_DISABLE_SECURITY);
    backfill_disable_security(&mut api.resources, api_level, false);
    default_basepath(&mut api);

    debug!(api = %api.title, version = %api.version, resources = api.resources.len(), "Parsed OpenAPI 3.0 definition");
    Ok(api)
}

fn typed_operation(method: &str, operation: &openapiv3::Operation) -> Operation {
    let extensions = ExtensionBag::from_map(operation.extensions.clone().into_iter().collect());
    let mut parsed = Operation::with_extensions(method, extensions);
    parsed.security = operation.security.as_deref().map(typed_requirements).unwrap_or_default();
    parsed
}

fn typed_requirements(requirements: &[openapiv3::SecurityRequirement]) -> Vec<SecurityRequirement> {
    requirements
        .iter()
        .map(|requirement| {
            requirement.iter().map(|(name, scopes)| (name.clone(), scopes.clone())).collect()
        })
        .collect()
}

fn typed_security_scheme(name: &str, scheme: &openapiv3::SecurityScheme) -> SecurityScheme {
    let (kind, key_name, location) = match scheme {
        openapiv3::SecurityScheme::APIKey { location, name, .. } => {
            let location = match location {
                APIKeyLocation::Query => "query",
                APIKeyLocation::Header => "header",
                APIKeyLocation::Cookie => "cookie",
            };
            ("apiKey", name.clone(), location)
        }
        openapiv3::SecurityScheme::HTTP { .. } => ("http", String::new(), ""),
        openapiv3::SecurityScheme::OAuth2 { .. } => ("oauth2", String::new(), ""),
        openapiv3::SecurityScheme::OpenIDConnect { .. } => ("openIdConnect", String::new(), ""),
    };
    SecurityScheme {
        definition_name: name.to_string(),
        kind: kind.to_string(),
        name: key_name,
        location: location.to_string(),
    }
}

/// Parse an OpenAPI 3.1 document. A path item's `x-wso2-disable-security` takes precedence over
/// the API level one.
pub fn parse_openapi31(document: &Value, kind: ApiKind) -> Result<Api> {
    let mut api = Api::new(kind);
    read_info(&mut api, document);
    api.extensions = ExtensionBag::from_vendor_keys(document);
    api.production_endpoints = server_cluster(server_urls(document.get("servers")), kind);
    api.security = requirements(document.get("security"));
    api.security_schemes = schemes_from_object(document.pointer("/components/securitySchemes"));
    api.resources = value_resources(document, OPENAPI3_METHODS, kind, true);

    let api_level = api.extensions.get_bool(X_WSO2_DISABLE_SECURITY);
    backfill_disable_security(&mut api.resources, api_level, true);
    default_basepath(&mut api);

    debug!(api = %api.title, version = %api.version, resources = api.resources.len(), "Parsed OpenAPI 3.1 definition");
    Ok(api)
}

/// Parse a Swagger 2.0 document.
///
/// `host`, `schemes` and `basePath` form the production endpoint: https is preferred, then http;
/// any other scheme is logged and ignored.
pub fn parse_swagger2(document: &Value, kind: ApiKind) -> Result<Api> {
    let mut api = Api::new(kind);
    read_info(&mut api, document);
    api.extensions = ExtensionBag::from_vendor_keys(document);
    api.x_wso2_basepath = string_at(document, "basePath");
    api.security = requirements(document.get("security"));

    if application_api_key_required(api.extensions.get(X_WSO2_APPLICATION_SECURITY)) {
        api.security_schemes.push(SecurityScheme {
            definition_name: APPLICATION_API_KEY.to_string(),
            kind: APPLICATION_API_KEY.to_string(),
            name: APPLICATION_API_KEY.to_string(),
            location: String::new(),
        });
    }
    api.security_schemes.extend(schemes_from_object(document.get("securityDefinitions")));

    let host = string_at(document, "host");
    if !host.is_empty() {
        let scheme = swagger2_scheme(document, &api);
        let url = format!("{}{}{}", scheme, host, api.x_wso2_basepath);
        let endpoint = Endpoint::parse(&url, kind).map_err(|err| {
            Error::malformed("definition", format!("error encountered when parsing the endpoint: {}", err))
        })?;
        api.production_endpoints = Some(EndpointCluster {
            prefix: PRODUCTION_CLUSTER_PREFIX.to_string(),
            endpoints: vec![endpoint],
            strategy: EndpointStrategy::LoadBalance,
            config: None,
            security: None,
        });
    }

    api.resources = value_resources(document, SWAGGER2_METHODS, kind, false);
    for operation in api.resources.iter_mut().flat_map(|resource| resource.operations.iter_mut()) {
        if application_api_key_required(operation.extensions.get(X_WSO2_APPLICATION_SECURITY)) {
            operation.security.push(requirement_for(APPLICATION_API_KEY));
        }
    }

    let api_level = api.extensions.get_bool(X_WSO2_DISABLE_SECURITY);
    backfill_disable_security(&mut api.resources, api_level, false);

    debug!(api = %api.title, version = %api.version, resources = api.resources.len(), "Parsed Swagger 2.0 definition");
    Ok(api)
}

fn swagger2_scheme(document: &Value, api: &Api) -> &'static str {
    let mut scheme = "";
    for candidate in document.get("schemes").and_then(Value::as_array).into_iter().flatten() {
        match candidate.as_str() {
            Some("https") => return "https://",
            Some("http") => scheme = "http://",
            other => error!(
                scheme = ?other,
                api = %api.title,
                version = %api.version,
                "Scheme of the swagger definition is not supported"
            ),
        }
    }
    scheme
}

/// `x-wso2-application-security` with `optional: false` and `api_key` among its security types
fn application_api_key_required(extension: Option<&Value>) -> bool {
    let Some(object) = extension.and_then(Value::as_object) else {
        return false;
    };
    let optional = object.get("optional").map_or(true, |optional| optional == &Value::Bool(true));
    !optional
        && object
            .get("security-types")
            .and_then(Value::as_array)
            .is_some_and(|types| types.iter().any(|kind| kind == APPLICATION_API_KEY))
}

fn read_info(api: &mut Api, document: &Value) {
    if let Some(info) = document.get("info") {
        api.title = string_at(info, "title");
        api.version = string_at(info, "version");
        api.description = string_at(info, "description");
    }
}

pub(crate) fn string_at(value: &Value, key: &str) -> String {
    value.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn server_urls(servers: Option<&Value>) -> impl Iterator<Item = &str> {
    servers
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|server| server.get("url").and_then(Value::as_str))
}

fn requirements(security: Option<&Value>) -> Vec<SecurityRequirement> {
    let Some(security) = security else {
        return Vec::new();
    };
    serde_json::from_value(security.clone()).unwrap_or_else(|err| {
        warn!(error = %err, "Ignoring malformed security requirements");
        Vec::new()
    })
}

fn schemes_from_object(definitions: Option<&Value>) -> Vec<SecurityScheme> {
    definitions
        .and_then(Value::as_object)
        .map(|definitions| {
            definitions
                .iter()
                .map(|(name, definition)| SecurityScheme {
                    definition_name: name.clone(),
                    kind: string_at(definition, "type"),
                    name: string_at(definition, "name"),
                    location: string_at(definition, "in"),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Walk `paths` of an untyped document. Path items without a known method are dropped.
fn value_resources(document: &Value, methods: &[&str], kind: ApiKind, path_servers: bool) -> Vec<Resource> {
    let Some(paths) = document.get("paths").and_then(Value::as_object) else {
        return Vec::new();
    };

    let mut resources = Vec::with_capacity(paths.len());
    for (path, item) in paths {
        let operations: Vec<Operation> = methods
            .iter()
            .filter_map(|method| {
                item.get(*method).map(|operation| value_operation(method, operation))
            })
            .collect();
        if operations.is_empty() {
            continue;
        }

        let mut resource = Resource::new(path.clone(), operations, ExtensionBag::from_vendor_keys(item));
        if path_servers {
            resource.production_endpoints = server_cluster(server_urls(item.get("servers")), kind);
        }
        resources.push(resource);
    }
    resources
}

fn value_operation(method: &str, operation: &Value) -> Operation {
    let mut parsed = Operation::with_extensions(method, ExtensionBag::from_vendor_keys(operation));
    parsed.security = requirements(operation.get("security"));
    parsed
}
