//! Operation policies: bundled specifications and definitions rendered onto operations.

mod common;

use std::collections::HashMap;

use api_adapter::config::AdapterConfig;
use api_adapter::enforcer::EnforcerApi;
use api_adapter::model::policy::actions;
use api_adapter::model::{format_operation_policies, OperationPolicies, Policy, PolicyContainer};
use api_adapter::project::ProjectApi;
use api_adapter::Api;
use common::{project_entries, ADD_HEADER_DEFINITION, ADD_HEADER_SPEC};
use serde_json::{json, Value};

fn compiled_api() -> Api {
    let config = AdapterConfig::default();
    let project = ProjectApi::from_files(project_entries(), &config).expect("project");
    project.build_api(&config, |_| None).expect("api")
}

fn policy(name: &str, parameters: Value) -> Policy {
    Policy {
        name: name.to_string(),
        version: "v1".to_string(),
        parameters: parameters.as_object().cloned().unwrap_or_default(),
        ..Default::default()
    }
}

fn add_header_containers() -> HashMap<String, PolicyContainer> {
    HashMap::from([(
        "addHeader_v1".to_string(),
        PolicyContainer {
            specification: serde_yaml::from_str(ADD_HEADER_SPEC).expect("specification"),
            definition: ADD_HEADER_DEFINITION.to_string(),
        },
    )])
}

#[test]
fn invalid_policy_is_dropped_and_siblings_survive() {
    let api = compiled_api();
    let pets = api.resources.iter().find(|resource| resource.path == "/pets").expect("pets");
    let get = &pets.operations[0];

    assert_eq!(get.policies.request.len(), 1);
    let set_header = &get.policies.request[0];
    assert_eq!(set_header.action, actions::SET_HEADER);
    assert_eq!(set_header.parameters["headerName"], "x-env");
    assert_eq!(set_header.parameters["headerValue"], "prod");

    assert_eq!(get.policies.response.len(), 1);
    assert_eq!(get.policies.response[0].action, actions::REMOVE_HEADER);
    assert_eq!(get.policies.response[0].parameters["headerName"], "server");
}

#[test]
fn operations_without_policies_are_untouched() {
    let api = compiled_api();
    let pet = api.resources.iter().find(|resource| resource.path == "/pets/{petId}").expect("pet");
    assert!(pet.operations.iter().all(|operation| operation.policies.is_empty()));
}

#[test]
fn validation_regex_rejects_values() {
    let policies = OperationPolicies {
        request: vec![
            policy("addHeader", json!({"headerName": "bad header!", "headerValue": "v"})),
            policy("addHeader", json!({"headerName": "x-good", "headerValue": "v"})),
        ],
        ..Default::default()
    };

    let formatted = format_operation_policies(&policies, &add_header_containers(), "api-1", "carbon.super");
    assert_eq!(formatted.request.len(), 1);
    assert_eq!(formatted.request[0].parameters["headerName"], "x-good");
}

#[test]
fn policies_outside_their_flows_are_dropped() {
    let policies = OperationPolicies {
        fault: vec![policy("addHeader", json!({"headerName": "x-a", "headerValue": "v"}))],
        ..Default::default()
    };

    let formatted = format_operation_policies(&policies, &add_header_containers(), "api-1", "carbon.super");
    assert!(formatted.fault.is_empty());
}

#[test]
fn router_actions_stay_out_of_the_enforcer_descriptor() {
    let api = compiled_api();
    let descriptor = EnforcerApi::from_api(&api, "localhost");

    let pets = descriptor.resources.iter().find(|resource| resource.path == "/pets").expect("pets");
    assert!(pets.methods[0].policies.request.is_empty());
    assert!(pets.methods[0].policies.response.is_empty());
}
