//! Operation policy specifications and templated definitions.
//!
//! A project bundles, per policy, a specification (`Policies/<name>.yaml`) and a definition
//! template (`Policies/<name>.gotmpl`). Formatting validates each user policy against its
//! specification, renders the definition with the user parameters and replaces the policy's
//! action and parameters with the rendered `definition`. Failures drop the single policy.

use std::collections::HashMap;
use std::sync::LazyLock;

use handlebars::{no_escape, Handlebars, Template};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, warn};

use crate::errors::{codes, Error, Result};
use crate::model::operation::{OperationPolicies, Policy};

/// Gateway name a specification must list in `supportedGateways`
pub const SUPPORTED_GATEWAY: &str = "ChoreoConnect";

/// Actions understood by the route generator
pub mod actions {
    pub const SET_HEADER: &str = "SET_HEADER";
    pub const REMOVE_HEADER: &str = "REMOVE_HEADER";
    pub const REWRITE_RESOURCE_PATH: &str = "REWRITE_RESOURCE_PATH";
    pub const REWRITE_RESOURCE_METHOD: &str = "REWRITE_RESOURCE_METHOD";
}

/// Parameter names of the rendered actions
pub mod params {
    pub const HEADER_NAME: &str = "headerName";
    pub const HEADER_VALUE: &str = "headerValue";
    pub const REWRITE_PATH_RESOURCE_PATH: &str = "rewritePathResourcePath";
    pub const CURRENT_METHOD: &str = "currentMethod";
    pub const UPDATED_METHOD: &str = "updatedMethod";
}

static GO_TEMPLATE_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(\s*)\.(\w)").expect("valid template field regex"));

/// Flow a policy is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyFlow {
    Request,
    Response,
    Fault,
}

impl PolicyFlow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Fault => "fault",
        }
    }
}

/// One declared parameter of a policy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyAttribute {
    pub name: String,
    /// Regex wrapped in delimiters, e.g. `/^[a-z]+$/`
    pub validation_regex: String,
    #[serde(rename = "type")]
    pub value_type: String,
    pub required: bool,
    pub default_value: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicySpecificationData {
    pub name: String,
    pub applicable_flows: Vec<String>,
    pub supported_gateways: Vec<String>,
    pub supported_api_types: Vec<String>,
    pub multiple_allowed: bool,
    pub policy_attributes: Vec<PolicyAttribute>,
}

/// Contents of `Policies/<name>.yaml` or `.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySpecification {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
    pub data: PolicySpecificationData,
}

/// Specification and raw definition template of one policy
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyContainer {
    pub specification: PolicySpecification,
    pub definition: String,
}

/// Policy containers of a project keyed by the bundled file stem
pub type PolicyContainerMap = HashMap<String, PolicyContainer>;

#[derive(Debug, Deserialize)]
struct RenderedPolicy {
    definition: RenderedDefinition,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RenderedDefinition {
    action: String,
    parameters: Map<String, Value>,
}

/// Occurrence count and first index of each policy name within one flow
#[derive(Debug, Clone, Copy)]
struct PolicyStats {
    count: usize,
    first_index: usize,
}

fn flow_stats(policies: &[Policy]) -> HashMap<&str, PolicyStats> {
    let mut stats: HashMap<&str, PolicyStats> = HashMap::new();
    for (index, policy) in policies.iter().enumerate() {
        stats
            .entry(policy.name.as_str())
            .and_modify(|stat| stat.count += 1)
            .or_insert(PolicyStats { count: 1, first_index: index });
    }
    stats
}

/// Locate the container of a policy, by name first and then by `<name>_<version>`
fn find_container<'a>(containers: &'a PolicyContainerMap, policy: &Policy) -> Option<&'a PolicyContainer> {
    containers
        .get(&policy.name)
        .or_else(|| containers.get(&format!("{}_{}", policy.name, policy.version)))
}

impl PolicySpecification {
    fn validate_policy(
        &self,
        policy: &Policy,
        flow: PolicyFlow,
        stats: &HashMap<&str, PolicyStats>,
        index: usize,
    ) -> Result<()> {
        let data = &self.data;
        if data.name != policy.name {
            return Err(Error::policy(
                &policy.name,
                format!(
                    "invalid policy specification, spec name \"{}\" and policy name \"{}\" mismatch",
                    data.name, policy.name
                ),
            ));
        }
        if !policy.version.is_empty() && !self.version.is_empty() && self.version != policy.version {
            return Err(Error::policy(
                &policy.name,
                format!(
                    "spec version \"{}\" and policy version \"{}\" mismatch",
                    self.version, policy.version
                ),
            ));
        }
        if !data.applicable_flows.iter().any(|applicable| applicable == flow.as_str()) {
            return Err(Error::policy(
                &policy.name,
                format!("policy flow \"{}\" not supported", flow.as_str()),
            ));
        }
        if !data.supported_gateways.iter().any(|gateway| gateway == SUPPORTED_GATEWAY) {
            return Err(Error::policy(&policy.name, "gateway not supported"));
        }

        if !data.multiple_allowed {
            if let Some(stat) = stats.get(policy.name.as_str()).filter(|stat| stat.count > 1) {
                if index != stat.first_index {
                    return Err(Error::policy(&policy.name, "multiple policies not allowed"));
                }
                warn!(
                    policy = %policy.name,
                    "Operation policy not allowed multiple times, applying the first policy"
                );
            }
        }

        for attribute in &data.policy_attributes {
            let Some(value) = policy.parameters.get(&attribute.name) else {
                if attribute.required {
                    return Err(Error::policy(
                        &policy.name,
                        format!("required parameter {} not found", attribute.name),
                    ));
                }
                continue;
            };
            self.validate_attribute(policy, attribute, value)?;
        }

        Ok(())
    }

    fn validate_attribute(&self, policy: &Policy, attribute: &PolicyAttribute, value: &Value) -> Result<()> {
        let expected = match value {
            Value::String(_) => "String",
            Value::Number(number) if number.is_i64() || number.is_u64() => "Integer",
            Value::Bool(_) => "Boolean",
            Value::Array(_) => "Array",
            Value::Object(_) => "Map",
            _ => {
                return Err(Error::policy(
                    &policy.name,
                    format!(
                        "invalid value type of parameter {}, unsupported type {}",
                        attribute.name, attribute.value_type
                    ),
                ))
            }
        };

        if !attribute.value_type.eq_ignore_ascii_case(expected) {
            return Err(Error::policy(
                &policy.name,
                format!(
                    "invalid value type of parameter {}, required {}",
                    attribute.name, attribute.value_type
                ),
            ));
        }

        if let (Value::String(text), false) = (value, attribute.validation_regex.is_empty()) {
            let pattern = strip_delimiters(&attribute.validation_regex);
            let regex = Regex::new(pattern).map_err(|_| {
                Error::policy(
                    &policy.name,
                    format!(
                        "invalid regex expression in policy spec {}, regex: \"{}\"",
                        self.data.name, attribute.validation_regex
                    ),
                )
            })?;
            if !regex.is_match(text) {
                return Err(Error::policy(
                    &policy.name,
                    format!(
                        "invalid parameter value of attribute \"{}\", regex match failed",
                        attribute.name
                    ),
                ));
            }
        }

        Ok(())
    }
}

fn strip_delimiters(regex: &str) -> &str {
    let mut chars = regex.chars();
    match (chars.next(), chars.next_back()) {
        (Some(_), Some(_)) => chars.as_str(),
        _ => regex,
    }
}

/// Rewrite Go template field access (`{{ .name }}`) to handlebars syntax (`{{ name }}`)
fn normalise_template(definition: &str) -> String {
    GO_TEMPLATE_FIELD.replace_all(definition, "{{${1}${2}").into_owned()
}

fn render_definition(
    policy: &Policy,
    container: &PolicyContainer,
    api_id: &str,
    organization_id: &str,
) -> Option<RenderedDefinition> {
    let template = match Template::compile(&normalise_template(&container.definition)) {
        Ok(template) => template,
        Err(err) => {
            error!(
                error_code = codes::POLICY_TEMPLATE_PARSE_FAILED,
                policy = %policy.name,
                api = %api_id,
                organization = %organization_id,
                error = %err,
                "Error parsing the operation policy definition template"
            );
            return None;
        }
    };

    let mut registry = Handlebars::new();
    registry.register_escape_fn(no_escape);
    registry.register_template("policy-def", template);

    let rendered = match registry.render("policy-def", &policy.parameters) {
        Ok(rendered) => rendered,
        Err(err) => {
            error!(
                error_code = codes::POLICY_TEMPLATE_RENDER_FAILED,
                policy = %policy.name,
                api = %api_id,
                organization = %organization_id,
                error = %err,
                "Error rendering the operation policy definition"
            );
            return None;
        }
    };

    match serde_yaml::from_str::<RenderedPolicy>(&rendered) {
        Ok(parsed) => Some(parsed.definition),
        Err(err) => {
            error!(
                error_code = codes::POLICY_DEFINITION_YAML_FAILED,
                policy = %policy.name,
                api = %api_id,
                organization = %organization_id,
                error = %err,
                "Error parsing the rendered operation policy definition"
            );
            None
        }
    }
}

fn format_policy(
    policy: &Policy,
    flow: PolicyFlow,
    stats: &HashMap<&str, PolicyStats>,
    index: usize,
    containers: &PolicyContainerMap,
    api_id: &str,
    organization_id: &str,
) -> Option<Policy> {
    let default_container = PolicyContainer::default();
    let container = find_container(containers, policy).unwrap_or(&default_container);

    if let Err(err) = container.specification.validate_policy(policy, flow, stats, index) {
        warn!(
            error_code = codes::POLICY_VALIDATION_FAILED,
            policy = %policy.name,
            api = %api_id,
            organization = %organization_id,
            error = %err,
            "Operation policy validation failed, ignoring the policy"
        );
        return None;
    }

    let definition = render_definition(policy, container, api_id, organization_id)?;

    let mut parameters = definition.parameters;
    for attribute in &container.specification.data.policy_attributes {
        if let Some(default) = &attribute.default_value {
            parameters.entry(attribute.name.clone()).or_insert_with(|| default.clone());
        }
    }

    Some(Policy {
        name: policy.name.clone(),
        version: policy.version.clone(),
        action: definition.action,
        parameters,
    })
}

fn format_flow(
    policies: &[Policy],
    flow: PolicyFlow,
    containers: &PolicyContainerMap,
    api_id: &str,
    organization_id: &str,
) -> Vec<Policy> {
    let stats = flow_stats(policies);
    policies
        .iter()
        .enumerate()
        .filter_map(|(index, policy)| {
            format_policy(policy, flow, &stats, index, containers, api_id, organization_id)
        })
        .collect()
}

/// Turn user policies into gateway actions. Invalid policies are logged and dropped; the order
/// inside each flow is kept.
pub fn format_operation_policies(
    policies: &OperationPolicies,
    containers: &PolicyContainerMap,
    api_id: &str,
    organization_id: &str,
) -> OperationPolicies {
    OperationPolicies {
        request: format_flow(&policies.request, PolicyFlow::Request, containers, api_id, organization_id),
        response: format_flow(&policies.response, PolicyFlow::Response, containers, api_id, organization_id),
        fault: format_flow(&policies.fault, PolicyFlow::Fault, containers, api_id, organization_id),
    }
}
