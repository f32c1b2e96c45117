use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::extensions::ExtensionBag;
use crate::model::security::SecurityRequirement;

/// Vendor extension holding the mocked responses of a prototyped operation
pub const X_WSO2_MOCKED_API_CONFIG: &str = "x-wso2-mockedApiConfig";

/// One operation policy. Before formatting `action` is empty and `parameters` hold the user
/// values; after formatting they hold the rendered definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(rename = "policyName")]
    pub name: String,
    #[serde(rename = "policyVersion", default)]
    pub version: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl Policy {
    /// String parameter, `None` when absent, not a string or blank
    pub fn string_param(&self, key: &str) -> Option<&str> {
        self.parameters
            .get(key)
            .and_then(Value::as_str)
            .filter(|value| !value.trim().is_empty())
    }
}

/// Policies of one operation, per flow and in application order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationPolicies {
    #[serde(default)]
    pub request: Vec<Policy>,
    #[serde(default)]
    pub response: Vec<Policy>,
    #[serde(default)]
    pub fault: Vec<Policy>,
}

impl OperationPolicies {
    pub fn is_empty(&self) -> bool {
        self.request.is_empty() && self.response.is_empty() && self.fault.is_empty()
    }
}

/// Static response returned for a prototyped operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockResponse {
    pub code: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Content type to example payload
    #[serde(default)]
    pub content: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockConfig {
    #[serde(default)]
    pub responses: Vec<MockResponse>,
}

/// A single HTTP method of a resource
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub method: String,
    pub uuid: String,
    pub security: Vec<SecurityRequirement>,
    pub throttling_tier: String,
    /// `None` until resolved; parsers back-fill the API level value
    pub disable_security: Option<bool>,
    pub policies: OperationPolicies,
    pub mock: Option<MockConfig>,
    pub extensions: ExtensionBag,
}

impl Operation {
    pub fn new<M: Into<String>>(method: M) -> Self {
        Self {
            method: method.into().to_uppercase(),
            uuid: uuid::Uuid::new_v4().to_string(),
            security: Vec::new(),
            throttling_tier: String::new(),
            disable_security: None,
            policies: OperationPolicies::default(),
            mock: None,
            extensions: ExtensionBag::new(),
        }
    }

    /// Operation carrying its vendor extensions; tier and disable-security are resolved from them.
    pub fn with_extensions<M: Into<String>>(method: M, extensions: ExtensionBag) -> Self {
        let mut operation = Self::new(method);
        operation.throttling_tier = extensions.resolve_throttling_tier().unwrap_or_default();
        operation.disable_security = extensions.resolve_disable_security();
        operation.mock = extensions
            .get(X_WSO2_MOCKED_API_CONFIG)
            .and_then(|raw| serde_json::from_value(raw.clone()).ok());
        operation.extensions = extensions;
        operation
    }

    pub fn is_security_disabled(&self) -> bool {
        self.disable_security.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operation_resolves_extensions() {
        let extensions = ExtensionBag::from_vendor_keys(&json!({
            "x-throttling-tier": "Unlimited",
            "x-auth-type": "None",
            "x-wso2-mockedApiConfig": {"responses": [{"code": 200, "content": {"application/json": {"id": 1}}}]}
        }));

        let operation = Operation::with_extensions("get", extensions);
        assert_eq!(operation.method, "GET");
        assert_eq!(operation.throttling_tier, "Unlimited");
        assert!(operation.is_security_disabled());
        assert_eq!(operation.mock.expect("mock").responses[0].code, 200);
    }

    #[test]
    fn policy_deserializes_from_api_yaml_shape() {
        let policies: OperationPolicies = serde_json::from_value(json!({
            "request": [{
                "policyName": "addHeader",
                "policyVersion": "v1",
                "parameters": {"headerName": "x-user", "headerValue": " "}
            }]
        }))
        .expect("policies");

        let policy = &policies.request[0];
        assert_eq!(policy.name, "addHeader");
        assert_eq!(policy.string_param("headerName"), Some("x-user"));
        assert_eq!(policy.string_param("headerValue"), None);
        assert!(policies.response.is_empty());
    }
}
