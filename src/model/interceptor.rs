use serde::Serialize;

use crate::model::endpoint::EndpointCluster;

/// Parts of the request / response context forwarded to an interceptor service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InterceptorIncludes {
    pub request_headers: bool,
    pub request_body: bool,
    pub request_trailers: bool,
    pub response_headers: bool,
    pub response_body: bool,
    pub response_trailers: bool,
    pub invocation_context: bool,
}

impl InterceptorIncludes {
    /// Build from the `includes` list of an interceptor extension; unknown names are ignored.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut includes = Self::default();
        for name in names {
            match name {
                "request_headers" => includes.request_headers = true,
                "request_body" => includes.request_body = true,
                "request_trailers" => includes.request_trailers = true,
                "response_headers" => includes.response_headers = true,
                "response_body" => includes.response_body = true,
                "response_trailers" => includes.response_trailers = true,
                "invocation_context" => includes.invocation_context = true,
                _ => {}
            }
        }
        includes
    }
}

/// An external interceptor service called from the gateway's Lua filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptEndpoint {
    pub enabled: bool,
    pub cluster: EndpointCluster,
    pub cluster_timeout_seconds: u64,
    pub request_timeout_seconds: u64,
    pub includes: InterceptorIncludes,
    /// Assigned by the generator once the interceptor cluster is built
    pub cluster_name: String,
}

impl InterceptEndpoint {
    /// `host:port` of the interceptor service
    pub fn authority_header(&self) -> String {
        self.cluster
            .first()
            .map(|endpoint| format!("{}:{}", endpoint.host, endpoint.port))
            .unwrap_or_default()
    }
}
