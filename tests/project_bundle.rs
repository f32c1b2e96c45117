//! Project bundles: zip archives read into projects and compiled into the unified model.

mod common;

use api_adapter::config::AdapterConfig;
use api_adapter::model::api::api_hash;
use api_adapter::model::security::{API_KEY_IN_HEADER, API_KEY_IN_QUERY, DEFAULT_OAUTH2_SECURITY};
use api_adapter::model::ApiKind;
use api_adapter::project::{read_project_dir, ProjectApi};
use api_adapter::Error;
use common::{project_entries, zip_bytes};

fn replace(entries: &mut [(String, Vec<u8>)], suffix: &str, content: &str) {
    let entry = entries.iter_mut().find(|(path, _)| path.ends_with(suffix)).expect("entry");
    entry.1 = content.as_bytes().to_vec();
}

#[test]
fn zip_bundle_compiles_into_the_model() {
    let config = AdapterConfig::default();
    let project = ProjectApi::from_zip_bytes(&zip_bytes(&project_entries()), &config).expect("project");

    assert_eq!(project.kind, ApiKind::Http);
    assert_eq!(project.deployments.len(), 1);
    assert_eq!(project.policies.len(), 2);

    let api = project.build_api(&config, |_| None).expect("api");
    assert_eq!(api.id, "pets-uuid");
    assert_eq!(api.x_wso2_basepath, "/petstore/1.0.0");
    assert_eq!(api.lifecycle_status, "PUBLISHED");
    assert_eq!(api.resources.len(), 2);
    assert_eq!(api.production_endpoints.as_ref().map(|c| c.endpoints[0].host.as_str()), Some("petstore.io"));
    assert_eq!(api.sandbox_endpoints.as_ref().map(|c| c.endpoints[0].host.as_str()), Some("sandbox.petstore.io"));
}

#[test]
fn security_options_replace_definition_schemes() {
    let config = AdapterConfig::default();
    let project = ProjectApi::from_files(project_entries(), &config).expect("project");
    let api = project.build_api(&config, |_| None).expect("api");

    let names: Vec<&str> = api.security_schemes.iter().map(|scheme| scheme.definition_name.as_str()).collect();
    assert_eq!(names, vec![API_KEY_IN_HEADER, API_KEY_IN_QUERY, DEFAULT_OAUTH2_SECURITY]);
    assert!(api.security.iter().any(|requirement| requirement.contains_key(DEFAULT_OAUTH2_SECURITY)));
    assert!(api.security.iter().any(|requirement| requirement.contains_key(API_KEY_IN_HEADER)));
}

#[test]
fn environment_overrides_replace_endpoints() {
    let config = AdapterConfig::default();
    let project = ProjectApi::from_files(project_entries(), &config).expect("project");
    let key = format!("api_{}_sand_endpoint_0", api_hash("PetStore", "1.0.0"));

    let api = project
        .build_api(&config, |name| (name == key).then(|| "https://override.petstore.io:9443/v2".to_string()))
        .expect("api");

    let sandbox = api.sandbox_endpoints.expect("sandbox");
    assert_eq!(sandbox.endpoints.len(), 1);
    assert_eq!(sandbox.endpoints[0].host, "override.petstore.io");
    assert_eq!(sandbox.endpoints[0].port, 9443);
}

#[test]
fn websocket_project_uses_its_asyncapi_definition() {
    let config = AdapterConfig::default();
    let api_yaml = r#"
type: api
data:
  id: chat-uuid
  name: Chat
  context: /chat
  version: "1.0"
  type: WS
  endpointConfig:
    production_endpoints:
      url: ws://chat.backend:9090
"#;
    let asyncapi = r#"
asyncapi: 2.0.0
info: {title: Chat, version: "1.0"}
channels:
  /rooms/{roomId}:
    subscribe: {}
  /notifications:
    publish: {}
"#;
    let entries = vec![
        ("Chat-1.0/api.yaml".to_string(), api_yaml.as_bytes().to_vec()),
        ("Chat-1.0/Definitions/asyncapi.yaml".to_string(), asyncapi.as_bytes().to_vec()),
    ];

    let project = ProjectApi::from_zip_bytes(&zip_bytes(&entries), &config).expect("project");
    assert_eq!(project.deployments[0].vhost, "localhost");

    let api = project.build_api(&config, |_| None).expect("api");
    assert_eq!(api.kind, ApiKind::Ws);
    assert_eq!(api.x_wso2_basepath, "/chat/1.0");
    assert_eq!(api.resources.len(), 2);
    assert!(api.resources.iter().all(|resource| resource.methods() == vec!["GET"]));
}

#[test]
fn graphql_project_routes_from_api_yaml() {
    let config = AdapterConfig::default();
    let api_yaml = r#"
type: api
data:
  id: gql-uuid
  name: Countries
  context: /countries
  version: "1.0"
  type: GRAPHQL
  securityScheme: [oauth2]
  operations:
    - {target: country, verb: QUERY}
    - {target: addCountry, verb: MUTATION}
  endpointConfig:
    production_endpoints:
      url: http://countries.backend:8080/graphql
"#;
    let entries = vec![
        ("Countries/api.yaml".to_string(), api_yaml.as_bytes().to_vec()),
        ("Countries/Definitions/schema.graphql".to_string(), b"type Query { country: String }".to_vec()),
    ];

    let project = ProjectApi::from_files(entries, &config).expect("project");
    assert!(project.graphql_schema.is_some());

    let api = project.build_api(&config, |_| None).expect("api");
    assert_eq!(api.kind, ApiKind::GraphQl);
    assert!(api.pass_request_payload);
    assert!(api.security_schemes.iter().any(|scheme| scheme.definition_name == DEFAULT_OAUTH2_SECURITY));
}

#[test]
fn malformed_bundles_are_rejected() {
    let config = AdapterConfig::default();

    assert!(matches!(
        ProjectApi::from_zip_bytes(b"not a zip archive", &config),
        Err(Error::MalformedInput { .. })
    ));

    let mut descriptor_in_definitions = project_entries();
    descriptor_in_definitions.retain(|(path, _)| !path.ends_with("/api.yaml"));
    descriptor_in_definitions.push(("PetStore-1.0.0/Definitions/api.yaml".into(), common::API_YAML.as_bytes().to_vec()));
    assert!(ProjectApi::from_files(descriptor_in_definitions, &config).is_err());

    let mut no_endpoints = project_entries();
    replace(
        &mut no_endpoints,
        "api.yaml",
        "type: api\ndata:\n  name: PetStore\n  version: 1.0.0\n  context: /petstore\n  type: HTTP\n",
    );
    let err = ProjectApi::from_files(no_endpoints, &config).unwrap_err();
    assert!(err.to_string().contains("fields cannot be empty for PetStore 1.0.0"));

    let mut relative_endpoint = project_entries();
    replace(
        &mut relative_endpoint,
        "api.yaml",
        "type: api\ndata:\n  name: PetStore\n  version: 1.0.0\n  context: /petstore\n  type: HTTP\n  endpointConfig:\n    production_endpoints:\n      url: /relative\n",
    );
    assert!(ProjectApi::from_files(relative_endpoint, &config).is_err());
}

#[test]
fn project_directory_skips_unreadable_bundles() {
    let config = AdapterConfig::default();
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("petstore.zip"), zip_bytes(&project_entries())).unwrap();
    std::fs::write(dir.path().join("broken.zip"), b"garbage").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

    let projects = read_project_dir(dir.path(), &config).expect("read dir");
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].api_id(), "pets-uuid");
}
