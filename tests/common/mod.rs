//! Common test utilities for all integration tests.
//!
//! Provides project bundle fixtures and zip archive helpers.

#![allow(dead_code)]
#![allow(clippy::duplicate_mod)]

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;

pub const API_YAML: &str = r#"
type: api
version: v4.0.0
data:
  id: pets-uuid
  name: PetStore
  context: /petstore
  version: 1.0.0
  type: HTTP
  lifeCycleStatus: PUBLISHED
  securityScheme: [oauth2, api_key]
  operations:
    - target: /pets
      verb: GET
      operationPolicies:
        request:
          - policyName: addHeader
            policyVersion: v1
            parameters:
              headerName: x-env
              headerValue: prod
          - policyName: addHeader
            policyVersion: v1
            parameters:
              headerName: x-missing-value
        response:
          - policyName: removeHeader
            policyVersion: v1
            parameters:
              headerName: server
  endpointConfig:
    endpoint_type: http
    production_endpoints:
      url: https://petstore.io/v1
    sandbox_endpoints:
      url: https://sandbox.petstore.io/v1
"#;

pub const SWAGGER: &str = r#"{
    "openapi": "3.0.1",
    "info": {"title": "PetStore", "version": "1.0.0"},
    "components": {"securitySchemes": {"default": {"type": "oauth2", "flows": {}}}},
    "security": [{"default": []}],
    "paths": {
        "/pets": {"get": {"responses": {}}},
        "/pets/{petId}": {"get": {"responses": {}}, "delete": {"responses": {}}}
    }
}"#;

pub const DEPLOYMENTS: &str = r#"
data:
  - deploymentEnvironment: Default
    displayOnDevportal: true
"#;

pub const ADD_HEADER_SPEC: &str = r#"
type: operation_policy_specification
version: v1
data:
  name: addHeader
  applicableFlows: [request, response]
  supportedGateways: [ChoreoConnect]
  supportedApiTypes: [HTTP]
  multipleAllowed: true
  policyAttributes:
    - name: headerName
      validationRegex: "/^[a-zA-Z-]+$/"
      type: String
      required: true
    - name: headerValue
      type: String
      required: true
"#;

pub const ADD_HEADER_DEFINITION: &str = "definition:\n  action: SET_HEADER\n  parameters:\n    headerName: {{ .headerName }}\n    headerValue: {{ .headerValue }}\n";

pub const REMOVE_HEADER_SPEC: &str = r#"
type: operation_policy_specification
version: v1
data:
  name: removeHeader
  applicableFlows: [request, response, fault]
  supportedGateways: [ChoreoConnect]
  supportedApiTypes: [HTTP]
  policyAttributes:
    - name: headerName
      type: String
      required: true
"#;

pub const REMOVE_HEADER_DEFINITION: &str = "definition:\n  action: REMOVE_HEADER\n  parameters:\n    headerName: {{ .headerName }}\n";

/// Entries of a complete HTTP project rooted at `PetStore-1.0.0/`
pub fn project_entries() -> Vec<(String, Vec<u8>)> {
    [
        ("api.yaml", API_YAML),
        ("Definitions/swagger.json", SWAGGER),
        ("deployment_environments.yaml", DEPLOYMENTS),
        ("Policies/addHeader_v1.yaml", ADD_HEADER_SPEC),
        ("Policies/addHeader_v1.gotmpl", ADD_HEADER_DEFINITION),
        ("Policies/removeHeader_v1.yaml", REMOVE_HEADER_SPEC),
        ("Policies/removeHeader_v1.gotmpl", REMOVE_HEADER_DEFINITION),
    ]
    .into_iter()
    .map(|(path, content)| (format!("PetStore-1.0.0/{}", path), content.as_bytes().to_vec()))
    .collect()
}

/// Zip entries into an in-memory archive
pub fn zip_bytes(entries: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (path, content) in entries {
        writer.start_file(path.as_str(), options).expect("start zip entry");
        writer.write_all(content).expect("write zip entry");
    }
    writer.finish().expect("finish zip").into_inner()
}
