use serde::{Deserialize, Serialize};

use crate::config::GlobalCorsSettings;

/// CORS configuration of an API, as written in `x-wso2-cors`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(rename = "corsConfigurationEnabled", default = "enabled_by_default")]
    pub enabled: bool,

    #[serde(rename = "accessControlAllowCredentials", default)]
    pub allow_credentials: bool,

    #[serde(rename = "accessControlAllowHeaders", default)]
    pub allow_headers: Vec<String>,

    #[serde(rename = "accessControlAllowMethods", default)]
    pub allow_methods: Vec<String>,

    #[serde(rename = "accessControlAllowOrigins", default)]
    pub allow_origins: Vec<String>,

    #[serde(rename = "accessControlExposeHeaders", default)]
    pub expose_headers: Vec<String>,
}

fn enabled_by_default() -> bool {
    true
}

impl CorsConfig {
    /// The gateway-wide CORS settings
    pub fn from_global(global: &GlobalCorsSettings) -> Self {
        Self {
            enabled: global.enabled,
            allow_credentials: global.allow_credentials,
            allow_headers: global.allow_headers.clone(),
            allow_methods: global.allow_methods.clone(),
            allow_origins: global.allow_origins.clone(),
            expose_headers: global.expose_headers.clone(),
        }
    }
}
