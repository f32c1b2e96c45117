//! External authorization per-route configuration
//!
//! The enforcer receives per-route metadata through ext_authz context extensions; routes that
//! must bypass the enforcer disable the filter.

use std::collections::HashMap;

use envoy_types::pb::envoy::extensions::filters::http::ext_authz::v3::{
    ext_authz_per_route::Override, CheckSettings, ExtAuthzPerRoute as ExtAuthzPerRouteProto,
};
use envoy_types::pb::google::protobuf::Any as EnvoyAny;

use crate::xds::filters::any_from_message;

pub const EXT_AUTHZ_PER_ROUTE_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.ext_authz.v3.ExtAuthzPerRoute";

/// Context extension keys read by the enforcer
pub mod context {
    pub const PATH: &str = "path";
    pub const VHOST: &str = "vHost";
    pub const BASE_PATH: &str = "basePath";
    pub const METHOD: &str = "method";
    pub const API_VERSION: &str = "version";
    pub const API_NAME: &str = "name";
    pub const PROD_CLUSTER_NAME: &str = "prodClusterName";
    pub const SAND_CLUSTER_NAME: &str = "sandClusterName";
}

/// Per-route ext_authz override
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtAuthzPerRouteConfig {
    /// Skip the enforcer for this route
    Disabled,
    CheckSettings {
        context_extensions: HashMap<String, String>,
        disable_request_body_buffering: bool,
    },
}

impl ExtAuthzPerRouteConfig {
    pub fn to_proto(&self) -> ExtAuthzPerRouteProto {
        let override_val = match self {
            Self::Disabled => Override::Disabled(true),
            Self::CheckSettings { context_extensions, disable_request_body_buffering } => {
                Override::CheckSettings(CheckSettings {
                    context_extensions: context_extensions.clone(),
                    disable_request_body_buffering: *disable_request_body_buffering,
                    ..Default::default()
                })
            }
        };

        ExtAuthzPerRouteProto { r#override: Some(override_val) }
    }

    pub fn to_any(&self) -> EnvoyAny {
        any_from_message(EXT_AUTHZ_PER_ROUTE_TYPE_URL, &self.to_proto())
    }

    /// Context extensions when the enforcer is engaged
    pub fn context_extensions(&self) -> Option<&HashMap<String, String>> {
        match self {
            Self::Disabled => None,
            Self::CheckSettings { context_extensions, .. } => Some(context_extensions),
        }
    }
}
