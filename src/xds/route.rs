//! Route generation for one resource of an API.
//!
//! A resource without operation policies becomes a single route matching all of its methods. A
//! resource with policies becomes one route per operation, so headers and rewrites can differ per
//! method; a method rewrite adds a second, internal route for the rewritten method.

use std::collections::HashMap;

use envoy_types::pb::envoy::config::core::v3::{
    header_value_option::HeaderAppendAction, HeaderValue, HeaderValueOption,
};
use envoy_types::pb::envoy::config::route::v3::{
    header_matcher::HeaderMatchSpecifier,
    retry_policy::RetryBackOff,
    route::Action,
    route_action::{ClusterSpecifier, HostRewriteSpecifier, MaxStreamDuration, UpgradeConfig},
    route_match::PathSpecifier,
    Decorator, HeaderMatcher, RetryPolicy, Route, RouteAction, RouteMatch,
};
use envoy_types::pb::envoy::r#type::matcher::v3::{
    metadata_matcher::{path_segment::Segment, PathSegment},
    string_matcher::MatchPattern,
    value_matcher::MatchPattern as ValueMatchPattern,
    MetadataMatcher, RegexMatchAndSubstitute, RegexMatcher, StringMatcher, ValueMatcher,
};
use envoy_types::pb::google::protobuf::{Any, BoolValue, UInt32Value};
use tracing::{debug, error};

use crate::config::EnvoySettings;
use crate::errors::{codes, Error, Result};
use crate::model::policy::{actions, params};
use crate::model::{ApiKind, CorsConfig, Operation, Policy, Resource};
use crate::xds::filters::http::ext_authz::{context, ExtAuthzPerRouteConfig};
use crate::xds::filters::http::lua::{InterceptorFlow, InvocationContext, LuaPerRouteConfig};
use crate::xds::filters::http::{PerRouteFilters, EXT_AUTHZ_FILTER_NAME};
use crate::xds::path::{
    default_version_prefix, generate_substitution_string, path_regex_under, rewrite_regex_from_path_template,
    route_prefix,
};
use crate::xds::resources::{millis_to_duration, seconds_to_duration};

/// Header carrying the cluster chosen by the enforcer
pub const CLUSTER_HEADER_NAME: &str = "x-wso2-cluster-header";
const METHOD_HEADER_NAME: &str = ":method";
/// Dynamic metadata key set by the enforcer on method-rewritten requests
pub const METHOD_REWRITE_METADATA_KEY: &str = "method-rewrite";
const RETRIABLE_STATUS_CODES: &str = "retriable-status-codes";
const WEBSOCKET_UPGRADE: &str = "websocket";
const WEBSOCKET_MAX_STREAM_SECONDS: u64 = 60 * 60 * 24;
/// `currentMethod` value rendered for an absent parameter
const NO_VALUE: &str = "<no value>";

/// Everything route generation needs about one resource
#[derive(Debug, Clone, Default)]
pub struct RouteCreateParams<'a> {
    pub organization_id: String,
    pub title: String,
    pub version: String,
    pub kind: ApiKind,
    pub vhost: String,
    pub x_wso2_basepath: String,
    pub endpoint_basepath: String,
    /// `None` for GraphQL APIs, which expose a single POST route
    pub resource: Option<&'a Resource>,
    pub prod_cluster_name: String,
    pub sand_cluster_name: String,
    pub cors: Option<CorsConfig>,
    /// Endpoint level `timeoutInMillis` overriding the configured route timeout
    pub timeout_millis: Option<u64>,
    /// Whether any endpoint configuration declares retries
    pub retry_enabled: bool,
    pub pass_request_payload: bool,
    /// The resource has its own sandbox cluster; routes also match the cluster header
    pub is_sandbox: bool,
    /// Routes also match the basepath without its version segment
    pub is_default_version: bool,
    pub request_interceptors: InterceptorFlow,
    pub response_interceptors: InterceptorFlow,
}

impl RouteCreateParams<'_> {
    pub fn resource_path(&self) -> &str {
        match self.resource {
            Some(resource) if self.kind != ApiKind::GraphQl => &resource.path,
            _ => "",
        }
    }

    pub fn methods(&self) -> Vec<String> {
        match (self.kind, self.resource) {
            (ApiKind::GraphQl, _) | (_, None) => vec!["POST".to_string()],
            (_, Some(resource)) => resource.methods(),
        }
    }

    fn base_path_context(&self) -> &str {
        if self.x_wso2_basepath.is_empty() {
            &self.endpoint_basepath
        } else {
            &self.x_wso2_basepath
        }
    }

    fn route_path(&self) -> String {
        let prefix = route_prefix(&self.x_wso2_basepath, &self.endpoint_basepath);
        let prefix = if self.is_default_version { default_version_prefix(&prefix, &self.version) } else { prefix };
        path_regex_under(&prefix, self.resource_path())
    }

    fn needs_basepath_rewrite(&self) -> bool {
        !self.x_wso2_basepath.is_empty()
            && self.x_wso2_basepath.trim_end_matches('/') != self.endpoint_basepath.trim_end_matches('/')
    }
}

fn regex_matcher(regex: impl Into<String>) -> RegexMatcher {
    RegexMatcher { regex: regex.into(), ..Default::default() }
}

fn header_matcher(name: &str, pattern: MatchPattern) -> HeaderMatcher {
    HeaderMatcher {
        name: name.to_string(),
        header_match_specifier: Some(HeaderMatchSpecifier::StringMatch(StringMatcher {
            match_pattern: Some(pattern),
            ..Default::default()
        })),
        ..Default::default()
    }
}

/// `:method` matcher for `method_regex`, always letting CORS preflight requests through, plus the
/// cluster header matcher of sandbox routes.
fn method_matchers(method_regex: &str, params: &RouteCreateParams<'_>) -> Vec<HeaderMatcher> {
    let mut method_regex = method_regex.to_string();
    if !method_regex.split('|').any(|method| method == "OPTIONS") {
        method_regex.push_str("|OPTIONS");
    }
    let mut headers = vec![header_matcher(
        METHOD_HEADER_NAME,
        MatchPattern::SafeRegex(regex_matcher(format!("^({})$", method_regex))),
    )];
    if params.is_sandbox {
        headers.push(header_matcher(
            CLUSTER_HEADER_NAME,
            MatchPattern::Exact(params.sand_cluster_name.clone()),
        ));
    }
    headers
}

fn route_match(route_path: &str, headers: Vec<HeaderMatcher>) -> RouteMatch {
    RouteMatch {
        path_specifier: Some(PathSpecifier::SafeRegex(regex_matcher(route_path))),
        headers,
        ..Default::default()
    }
}

fn method_rewrite_matcher(value: ValueMatchPattern, invert: bool) -> MetadataMatcher {
    MetadataMatcher {
        filter: EXT_AUTHZ_FILTER_NAME.to_string(),
        path: vec![PathSegment { segment: Some(Segment::Key(METHOD_REWRITE_METADATA_KEY.to_string())) }],
        value: Some(ValueMatcher { match_pattern: Some(value) }),
        invert,
    }
}

/// Requests not rewritten by the enforcer
fn external_route_metadata() -> Vec<MetadataMatcher> {
    vec![method_rewrite_matcher(ValueMatchPattern::PresentMatch(true), true)]
}

/// Requests the enforcer rewrote from one method to another
fn internal_route_metadata(marker: &str) -> Vec<MetadataMatcher> {
    vec![method_rewrite_matcher(
        ValueMatchPattern::StringMatch(StringMatcher {
            match_pattern: Some(MatchPattern::Exact(marker.to_string())),
            ..Default::default()
        }),
        false,
    )]
}

fn regex_rewrite(route_path: &str, endpoint_basepath: &str, resource_path: &str) -> RegexMatchAndSubstitute {
    RegexMatchAndSubstitute {
        pattern: Some(regex_matcher(route_path)),
        substitution: generate_substitution_string(endpoint_basepath, resource_path),
    }
}

fn route_action(params: &RouteCreateParams<'_>, settings: &EnvoySettings) -> RouteAction {
    let timeouts = &settings.upstream.timeouts;
    let is_ws = params.kind == ApiKind::Ws;

    let cluster_specifier =
        if !params.prod_cluster_name.is_empty() && !params.sand_cluster_name.is_empty() {
            ClusterSpecifier::ClusterHeader(CLUSTER_HEADER_NAME.to_string())
        } else if params.prod_cluster_name.is_empty() {
            ClusterSpecifier::Cluster(params.sand_cluster_name.clone())
        } else {
            ClusterSpecifier::Cluster(params.prod_cluster_name.clone())
        };

    let mut action = RouteAction {
        cluster_specifier: Some(cluster_specifier),
        host_rewrite_specifier: Some(HostRewriteSpecifier::AutoHostRewrite(BoolValue { value: true })),
        upgrade_configs: vec![UpgradeConfig {
            upgrade_type: WEBSOCKET_UPGRADE.to_string(),
            enabled: Some(BoolValue { value: is_ws }),
            ..Default::default()
        }],
        timeout: Some(match params.timeout_millis {
            Some(millis) => millis_to_duration(millis),
            None => seconds_to_duration(timeouts.route_timeout_seconds),
        }),
        idle_timeout: Some(seconds_to_duration(timeouts.route_idle_timeout_seconds)),
        ..Default::default()
    };

    if is_ws {
        action.max_stream_duration = Some(MaxStreamDuration {
            max_stream_duration: Some(seconds_to_duration(WEBSOCKET_MAX_STREAM_SECONDS)),
            ..Default::default()
        });
    }

    // Retry counts are set per request by the enforcer through headers.
    if params.retry_enabled {
        let retry = &settings.upstream.retry;
        action.retry_policy = Some(RetryPolicy {
            retry_on: RETRIABLE_STATUS_CODES.to_string(),
            num_retries: Some(UInt32Value { value: 0 }),
            retriable_status_codes: retry.status_codes.clone(),
            retry_back_off: Some(RetryBackOff {
                base_interval: Some(millis_to_duration(u64::from(retry.base_interval_millis))),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    action
}

#[derive(Debug, Default)]
struct HeaderPolicies {
    request_to_add: Vec<HeaderValueOption>,
    request_to_remove: Vec<String>,
    response_to_add: Vec<HeaderValueOption>,
    response_to_remove: Vec<String>,
}

fn header_to_set(policy: &Policy) -> Result<HeaderValueOption> {
    let name = policy
        .string_param(params::HEADER_NAME)
        .ok_or_else(|| Error::policy(&policy.name, "policy parameter map must include headerName"))?;
    let value = policy
        .string_param(params::HEADER_VALUE)
        .ok_or_else(|| Error::policy(&policy.name, "policy parameter map must include headerValue"))?;

    Ok(HeaderValueOption {
        header: Some(HeaderValue { key: name.to_string(), value: value.to_string(), ..Default::default() }),
        append_action: HeaderAppendAction::OverwriteIfExistsOrAdd as i32,
        ..Default::default()
    })
}

fn header_to_remove(policy: &Policy) -> Result<String> {
    policy
        .string_param(params::HEADER_NAME)
        .map(str::to_string)
        .ok_or_else(|| Error::policy(&policy.name, "policy parameter map must include headerName"))
}

/// Whether a `REWRITE_RESOURCE_METHOD` policy applies to `method`.
fn applies_to_method(policy: &Policy, method: &str) -> bool {
    match policy.parameters.get(params::CURRENT_METHOD).and_then(|value| value.as_str()) {
        None | Some("") | Some(NO_VALUE) => true,
        Some(current) => current.eq_ignore_ascii_case(method),
    }
}

/// Routing decisions taken from the policies of one operation
#[derive(Debug, Default)]
struct OperationRouting {
    headers: HeaderPolicies,
    path_rewrite: Option<RegexMatchAndSubstitute>,
    new_method: Option<String>,
}

fn operation_routing(
    operation: &Operation,
    route_path: &str,
    resource_path: &str,
    endpoint_basepath: &str,
) -> Result<OperationRouting> {
    let mut routing = OperationRouting::default();

    for policy in &operation.policies.request {
        match policy.action.as_str() {
            actions::SET_HEADER => routing.headers.request_to_add.push(header_to_set(policy)?),
            actions::REMOVE_HEADER => routing.headers.request_to_remove.push(header_to_remove(policy)?),
            actions::REWRITE_RESOURCE_PATH => {
                let template = policy
                    .string_param(params::REWRITE_PATH_RESOURCE_PATH)
                    .ok_or_else(|| Error::policy(&policy.name, "policy parameter map must include rewritePath"))?;
                let rewrite = rewrite_regex_from_path_template(resource_path, template).inspect_err(|err| {
                    error!(
                        error_code = codes::INVALID_REWRITE_PATH,
                        method = %operation.method,
                        resource = %resource_path,
                        error = %err,
                        "Error adding request policy {} to operation",
                        actions::REWRITE_RESOURCE_PATH
                    );
                })?;
                routing.path_rewrite = Some(regex_rewrite(route_path, endpoint_basepath, &rewrite));
            }
            actions::REWRITE_RESOURCE_METHOD => {
                if !applies_to_method(policy, &operation.method) {
                    continue;
                }
                let updated = policy.string_param(params::UPDATED_METHOD).ok_or_else(|| {
                    Error::policy(&policy.name, "policy parameter updatedMethod not found")
                })?;
                routing.new_method = Some(updated.to_uppercase());
            }
            other => debug!(action = other, "Request policy applied by the enforcer"),
        }
    }

    for policy in &operation.policies.response {
        match policy.action.as_str() {
            actions::SET_HEADER => routing.headers.response_to_add.push(header_to_set(policy)?),
            actions::REMOVE_HEADER => routing.headers.response_to_remove.push(header_to_remove(policy)?),
            other => debug!(action = other, "Response policy applied by the enforcer"),
        }
    }

    Ok(routing)
}

fn route(
    name: String,
    route_match: RouteMatch,
    action: RouteAction,
    decorator: &Decorator,
    filters: HashMap<String, Any>,
    headers: HeaderPolicies,
) -> Route {
    Route {
        name,
        r#match: Some(route_match),
        action: Some(Action::Route(action)),
        decorator: Some(decorator.clone()),
        typed_per_filter_config: filters,
        request_headers_to_add: headers.request_to_add,
        request_headers_to_remove: headers.request_to_remove,
        response_headers_to_add: headers.response_to_add,
        response_headers_to_remove: headers.response_to_remove,
        ..Default::default()
    }
}

fn context_extensions(params: &RouteCreateParams<'_>, methods: &[String]) -> HashMap<String, String> {
    HashMap::from([
        (context::PATH.to_string(), params.resource_path().to_string()),
        (context::VHOST.to_string(), params.vhost.clone()),
        (context::BASE_PATH.to_string(), params.base_path_context().to_string()),
        (context::METHOD.to_string(), methods.join(" ")),
        (context::API_VERSION.to_string(), params.version.clone()),
        (context::API_NAME.to_string(), params.title.clone()),
        (context::PROD_CLUSTER_NAME.to_string(), params.prod_cluster_name.clone()),
        (context::SAND_CLUSTER_NAME.to_string(), params.sand_cluster_name.clone()),
    ])
}

/// Build the routes of one resource.
///
/// An operation whose policies cannot be turned into route configuration is logged and left
/// without a route; the remaining operations are still routed.
pub fn create_routes(params: &RouteCreateParams<'_>, settings: &EnvoySettings) -> Result<Vec<Route>> {
    let resource_path = params.resource_path();
    let methods = params.methods();
    let route_path = params.route_path();
    let decorator = Decorator { operation: format!("{}:{}", params.vhost, route_path), ..Default::default() };

    let context_extensions = context_extensions(params, &methods);
    let invocation = InvocationContext {
        organization_id: params.organization_id.clone(),
        base_path: params.base_path_context().to_string(),
        supported_methods: methods.join(" "),
        api_name: params.title.clone(),
        api_version: params.version.clone(),
        path_template: resource_path.to_string(),
        vhost: params.vhost.clone(),
        prod_cluster_name: params.prod_cluster_name.clone(),
        sand_cluster_name: params.sand_cluster_name.clone(),
    };

    let filters = PerRouteFilters {
        ext_authz: ExtAuthzPerRouteConfig::CheckSettings {
            context_extensions,
            disable_request_body_buffering: !params.pass_request_payload,
        },
        lua: Some(LuaPerRouteConfig::for_route(
            &params.request_interceptors,
            &params.response_interceptors,
            &invocation,
        )?),
        cors: params.cors.clone(),
    }
    .to_typed_per_filter_config();

    let default_rewrite = params
        .needs_basepath_rewrite()
        .then(|| regex_rewrite(&route_path, &params.endpoint_basepath, resource_path));

    let resource_with_policies =
        params.resource.filter(|resource| resource.operations.iter().any(|op| !op.policies.is_empty()));

    let Some(resource) = resource_with_policies else {
        let method_regex = methods.join("|");
        let mut action = route_action(params, settings);
        action.regex_rewrite = default_rewrite;

        debug!(resource = %resource_path, methods = %method_regex, "Created route for resource without policies");
        return Ok(vec![route(
            params.x_wso2_basepath.clone(),
            route_match(&route_path, method_matchers(&method_regex, params)),
            action,
            &decorator,
            filters,
            HeaderPolicies::default(),
        )]);
    };

    let mut routes = Vec::new();
    for operation in &resource.operations {
        let routing = match operation_routing(operation, &route_path, resource_path, &params.endpoint_basepath) {
            Ok(routing) => routing,
            Err(err) => {
                error!(
                    error_code = codes::ROUTE_GENERATION_FAILED,
                    api = %params.title,
                    resource = %resource_path,
                    method = %operation.method,
                    error = %err,
                    "Operation skipped, its policies could not be applied"
                );
                continue;
            }
        };

        let rewrite = routing.path_rewrite.or_else(|| default_rewrite.clone());

        match routing.new_method {
            Some(new_method) => {
                debug!(resource = %resource_path, method = %operation.method, new_method = %new_method, "Creating method rewrite routes");

                let mut external = route_match(&route_path, method_matchers(&operation.method, params));
                external.dynamic_metadata = external_route_metadata();
                routes.push(route(
                    format!("{}{}", params.x_wso2_basepath, operation.method),
                    external,
                    route_action(params, settings),
                    &decorator,
                    filters.clone(),
                    HeaderPolicies::default(),
                ));

                let mut internal = route_match(&route_path, method_matchers(&new_method, params));
                internal.dynamic_metadata =
                    internal_route_metadata(&format!("{}_to_{}", operation.method, new_method));
                let mut action = route_action(params, settings);
                action.regex_rewrite = rewrite;
                routes.push(route(
                    params.x_wso2_basepath.clone(),
                    internal,
                    action,
                    &decorator,
                    PerRouteFilters::skip_enforcer().to_typed_per_filter_config(),
                    routing.headers,
                ));
            }
            None => {
                let mut matcher = route_match(&route_path, method_matchers(&operation.method, params));
                matcher.dynamic_metadata = external_route_metadata();
                let mut action = route_action(params, settings);
                action.regex_rewrite = rewrite;
                routes.push(route(
                    params.x_wso2_basepath.clone(),
                    matcher,
                    action,
                    &decorator,
                    filters.clone(),
                    routing.headers,
                ));
            }
        }
    }

    Ok(routes)
}
