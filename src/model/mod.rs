//! # Unified API Model
//!
//! Gateway-agnostic representation of an API produced by every definition format. The
//! generator in [`crate::xds`] and the enforcer descriptor in [`crate::enforcer`] read only
//! this model.

pub mod api;
pub mod cors;
pub mod endpoint;
pub mod extensions;
pub mod interceptor;
pub mod operation;
pub mod policy;
pub mod resource;
pub mod security;

pub use api::{Api, ApiKind, EndpointSecurityPair};
pub use cors::CorsConfig;
pub use endpoint::{
    build_endpoint_cluster, CircuitBreakers, Endpoint, EndpointCluster, EndpointConfig,
    EndpointSecurity, EndpointStrategy, RetryConfig, UrlType,
};
pub use extensions::ExtensionBag;
pub use interceptor::{InterceptEndpoint, InterceptorIncludes};
pub use operation::{MockConfig, Operation, OperationPolicies, Policy};
pub use policy::{
    format_operation_policies, PolicyAttribute, PolicyContainer, PolicyContainerMap, PolicyFlow,
    PolicySpecification,
};
pub use resource::{sort_resources, Resource};
pub use security::{SecurityRequirement, SecurityScheme};
