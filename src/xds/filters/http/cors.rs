//! CORS per-route policy

use envoy_types::pb::envoy::extensions::filters::http::cors::v3::CorsPolicy as FilterCorsPolicy;
use envoy_types::pb::envoy::r#type::matcher::v3::string_matcher::MatchPattern;
use envoy_types::pb::envoy::r#type::matcher::v3::{RegexMatcher, StringMatcher};
use envoy_types::pb::google::protobuf::{Any as EnvoyAny, BoolValue};

use crate::model::CorsConfig;
use crate::xds::filters::any_from_message;

pub const FILTER_CORS_POLICY_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.cors.v3.CorsPolicy";

/// Anchored regex for one allowed origin; `*` is the only wildcard.
pub fn origin_regex(origin: &str) -> String {
    format!("^{}$", regex::escape(origin).replace(r"\*", ".*"))
}

fn origin_matcher(origin: &str) -> StringMatcher {
    StringMatcher {
        match_pattern: Some(MatchPattern::SafeRegex(RegexMatcher {
            regex: origin_regex(origin),
            ..Default::default()
        })),
        ..Default::default()
    }
}

/// Envoy CORS policy for the route, `None` when CORS is absent or disabled
pub fn cors_policy(config: Option<&CorsConfig>) -> Option<FilterCorsPolicy> {
    let config = config.filter(|config| config.enabled)?;

    Some(FilterCorsPolicy {
        allow_origin_string_match: config.allow_origins.iter().map(|o| origin_matcher(o)).collect(),
        allow_methods: config.allow_methods.join(", "),
        allow_headers: config.allow_headers.join(", "),
        expose_headers: config.expose_headers.join(", "),
        allow_credentials: Some(BoolValue { value: config.allow_credentials }),
        ..Default::default()
    })
}

/// Packed per-route CORS override
pub fn cors_policy_any(config: Option<&CorsConfig>) -> Option<EnvoyAny> {
    cors_policy(config).map(|policy| any_from_message(FILTER_CORS_POLICY_TYPE_URL, &policy))
}
