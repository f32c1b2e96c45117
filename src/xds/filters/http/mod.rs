//! HTTP filters configured per route.
//!
//! The gateway's listener installs ext_authz (the enforcer), Lua (interceptors) and CORS filters;
//! each generated route overrides them through `typed_per_filter_config`.

pub mod cors;
pub mod ext_authz;
pub mod lua;

use std::collections::HashMap;

use envoy_types::pb::google::protobuf::Any as EnvoyAny;

use crate::model::CorsConfig;
use crate::xds::filters::http::ext_authz::ExtAuthzPerRouteConfig;
use crate::xds::filters::http::lua::LuaPerRouteConfig;

/// Filter names used as `typed_per_filter_config` keys
pub const EXT_AUTHZ_FILTER_NAME: &str = "envoy.filters.http.ext_authz";
pub const LUA_FILTER_NAME: &str = "envoy.filters.http.lua";
pub const CORS_FILTER_NAME: &str = "envoy.filters.http.cors";

/// Per-route overrides of the gateway's HTTP filters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerRouteFilters {
    pub ext_authz: ExtAuthzPerRouteConfig,
    pub lua: Option<LuaPerRouteConfig>,
    pub cors: Option<CorsConfig>,
}

impl PerRouteFilters {
    /// Overrides for a route served without the enforcer
    pub fn skip_enforcer() -> Self {
        Self { ext_authz: ExtAuthzPerRouteConfig::Disabled, lua: None, cors: None }
    }

    pub fn to_typed_per_filter_config(&self) -> HashMap<String, EnvoyAny> {
        let mut configs = HashMap::new();
        configs.insert(EXT_AUTHZ_FILTER_NAME.to_string(), self.ext_authz.to_any());
        if let Some(lua) = &self.lua {
            configs.insert(LUA_FILTER_NAME.to_string(), lua.to_any());
        }
        if let Some(cors) = cors::cors_policy_any(self.cors.as_ref()) {
            configs.insert(CORS_FILTER_NAME.to_string(), cors);
        }
        configs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_enforcer_only_overrides_ext_authz() {
        let configs = PerRouteFilters::skip_enforcer().to_typed_per_filter_config();
        assert_eq!(configs.len(), 1);
        assert_eq!(
            configs.get(EXT_AUTHZ_FILTER_NAME).map(|any| any.type_url.as_str()),
            Some(ext_authz::EXT_AUTHZ_PER_ROUTE_TYPE_URL)
        );
    }

    #[test]
    fn full_overrides() {
        let filters = PerRouteFilters {
            ext_authz: ExtAuthzPerRouteConfig::CheckSettings {
                context_extensions: HashMap::new(),
                disable_request_body_buffering: true,
            },
            lua: Some(LuaPerRouteConfig::Disabled),
            cors: Some(CorsConfig {
                enabled: true,
                allow_credentials: false,
                allow_headers: Vec::new(),
                allow_methods: vec!["GET".into()],
                allow_origins: vec!["*".into()],
                expose_headers: Vec::new(),
            }),
        };

        let configs = filters.to_typed_per_filter_config();
        assert_eq!(configs.len(), 3);
        assert_eq!(
            configs.get(CORS_FILTER_NAME).map(|any| any.type_url.as_str()),
            Some(cors::FILTER_CORS_POLICY_TYPE_URL)
        );
        assert_eq!(
            configs.get(LUA_FILTER_NAME).map(|any| any.type_url.as_str()),
            Some(lua::LUA_PER_ROUTE_TYPE_URL)
        );
    }
}
