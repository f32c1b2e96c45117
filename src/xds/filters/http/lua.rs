//! Lua per-route configuration carrying the interceptor script.
//!
//! Routes without interceptors disable the Lua filter. Routes with interceptors get an inline
//! script rendered from a Handlebars template; the script calls the interceptor library shipped
//! with the router image.

use std::collections::BTreeMap;

use envoy_types::pb::envoy::config::core::v3::{data_source::Specifier, DataSource};
use envoy_types::pb::envoy::extensions::filters::http::lua::v3::{
    lua_per_route::Override, LuaPerRoute,
};
use envoy_types::pb::google::protobuf::Any as EnvoyAny;
use handlebars::{no_escape, Handlebars};
use serde::Serialize;

use crate::model::{InterceptEndpoint, InterceptorIncludes};
use crate::xds::filters::{any_from_message, invalid_config};

pub const LUA_PER_ROUTE_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.lua.v3.LuaPerRoute";

const INTERCEPTOR_TEMPLATE_NAME: &str = "interceptor";

const INTERCEPTOR_TEMPLATE: &str = r#"local interceptor = require 'home.wso2.interceptor.lib.interceptor'
local inv_context = {
    organizationId = "{{context.organization_id}}",
    basePath = "{{context.base_path}}",
    supportedMethods = "{{context.supported_methods}}",
    apiName = "{{context.api_name}}",
    apiVersion = "{{context.api_version}}",
    pathTemplate = "{{context.path_template}}",
    vhost = "{{context.vhost}}",
    prodClusterName = "{{context.prod_cluster_name}}",
    sandClusterName = "{{context.sand_cluster_name}}"
}
{{#if request_flow}}
local req_flow_list = {
{{#each request_flow}}
    {{@key}} = {
        cluster_name = "{{this.cluster_name}}",
        timeout = {{this.timeout_millis}},
        authority_header = "{{this.authority_header}}",
        includes = { request_headers = {{this.includes.request_headers}}, request_body = {{this.includes.request_body}}, request_trailers = {{this.includes.request_trailers}}, invocation_context = {{this.includes.invocation_context}} }
    },
{{/each}}
}

function envoy_on_request(request_handle)
    interceptor.handle_request_interceptor(request_handle, req_flow_list, inv_context)
end
{{/if}}
{{#if response_flow}}
local resp_flow_list = {
{{#each response_flow}}
    {{@key}} = {
        cluster_name = "{{this.cluster_name}}",
        timeout = {{this.timeout_millis}},
        authority_header = "{{this.authority_header}}",
        includes = { request_headers = {{this.includes.request_headers}}, request_body = {{this.includes.request_body}}, request_trailers = {{this.includes.request_trailers}}, response_headers = {{this.includes.response_headers}}, response_body = {{this.includes.response_body}}, response_trailers = {{this.includes.response_trailers}}, invocation_context = {{this.includes.invocation_context}} }
    },
{{/each}}
}

function envoy_on_response(response_handle)
    interceptor.handle_response_interceptor(response_handle, resp_flow_list)
end
{{/if}}
"#;

/// Route metadata handed to interceptor services
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvocationContext {
    pub organization_id: String,
    pub base_path: String,
    pub supported_methods: String,
    pub api_name: String,
    pub api_version: String,
    pub path_template: String,
    pub vhost: String,
    pub prod_cluster_name: String,
    pub sand_cluster_name: String,
}

#[derive(Debug, Serialize)]
struct InterceptorCall<'a> {
    cluster_name: &'a str,
    timeout_millis: u64,
    authority_header: String,
    includes: InterceptorIncludes,
}

impl<'a> InterceptorCall<'a> {
    fn from_endpoint(endpoint: &'a InterceptEndpoint) -> Self {
        Self {
            cluster_name: &endpoint.cluster_name,
            timeout_millis: endpoint.request_timeout_seconds * 1000,
            authority_header: endpoint.authority_header(),
            includes: endpoint.includes,
        }
    }
}

#[derive(Debug, Serialize)]
struct InterceptorScript<'a> {
    context: &'a InvocationContext,
    request_flow: BTreeMap<&'a str, InterceptorCall<'a>>,
    response_flow: BTreeMap<&'a str, InterceptorCall<'a>>,
}

/// Interceptors of one route, by HTTP method
pub type InterceptorFlow = BTreeMap<String, InterceptEndpoint>;

fn calls(flow: &InterceptorFlow) -> BTreeMap<&str, InterceptorCall<'_>> {
    flow.iter()
        .map(|(method, endpoint)| (method.as_str(), InterceptorCall::from_endpoint(endpoint)))
        .collect()
}

/// Render the inline interceptor script for a route.
pub fn render_interceptor_script(
    request_flow: &InterceptorFlow,
    response_flow: &InterceptorFlow,
    context: &InvocationContext,
) -> crate::Result<String> {
    let script = InterceptorScript {
        context,
        request_flow: calls(request_flow),
        response_flow: calls(response_flow),
    };

    let mut registry = Handlebars::new();
    registry.register_escape_fn(no_escape);
    registry
        .register_template_string(INTERCEPTOR_TEMPLATE_NAME, INTERCEPTOR_TEMPLATE)
        .map_err(|err| invalid_config(format!("Invalid interceptor template: {}", err)))?;
    registry
        .render(INTERCEPTOR_TEMPLATE_NAME, &script)
        .map_err(|err| invalid_config(format!("Error rendering interceptor script: {}", err)))
}

/// Per-route Lua override
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LuaPerRouteConfig {
    Disabled,
    InlineSource(String),
}

impl LuaPerRouteConfig {
    /// Disabled without interceptors, else the rendered interceptor script
    pub fn for_route(
        request_flow: &InterceptorFlow,
        response_flow: &InterceptorFlow,
        context: &InvocationContext,
    ) -> crate::Result<Self> {
        if request_flow.is_empty() && response_flow.is_empty() {
            return Ok(Self::Disabled);
        }
        render_interceptor_script(request_flow, response_flow, context).map(Self::InlineSource)
    }

    pub fn to_proto(&self) -> LuaPerRoute {
        let override_val = match self {
            Self::Disabled => Override::Disabled(true),
            Self::InlineSource(source) => Override::SourceCode(DataSource {
                specifier: Some(Specifier::InlineString(source.clone())),
                ..Default::default()
            }),
        };
        LuaPerRoute { r#override: Some(override_val), ..Default::default() }
    }

    pub fn to_any(&self) -> EnvoyAny {
        any_from_message(LUA_PER_ROUTE_TYPE_URL, &self.to_proto())
    }
}
