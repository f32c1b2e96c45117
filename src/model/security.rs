use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Scheme name to required scopes. An operation or API lists alternatives of these.
pub type SecurityRequirement = BTreeMap<String, Vec<String>>;

/// Security definition generated for API keys sent in a header
pub const API_KEY_IN_HEADER: &str = "api_key_header";
/// Security definition generated for API keys sent as a query parameter
pub const API_KEY_IN_QUERY: &str = "api_key_query";
/// Default OAuth2 definition kept when api.yaml enables OAuth2
pub const DEFAULT_OAUTH2_SECURITY: &str = "default";
/// Header / query parameter carrying the API key
pub const API_KEY_NAME: &str = "apikey";
pub const API_KEY_TYPE: &str = "apiKey";

/// One entry of `components.securitySchemes` / `securityDefinitions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityScheme {
    pub definition_name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "in", default)]
    pub location: String,
}

impl SecurityScheme {
    pub fn api_key(definition_name: &str, location: &str) -> Self {
        Self {
            definition_name: definition_name.to_string(),
            kind: API_KEY_TYPE.to_string(),
            name: API_KEY_NAME.to_string(),
            location: location.to_string(),
        }
    }
}

/// Requirement naming a single scheme with no scopes
pub fn requirement_for(definition_name: &str) -> SecurityRequirement {
    BTreeMap::from([(definition_name.to_string(), Vec::new())])
}
