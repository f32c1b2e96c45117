//! # API Project Bundles
//!
//! Reads an API project (a zip archive, or its entries already in memory) into a [`ProjectApi`]
//! and compiles it into the unified model.
//!
//! Recognised entries, relative to the project root:
//!
//! | Entry | Meaning |
//! |---|---|
//! | `api.yaml` / `api.json` | project descriptor (mandatory, never inside `Definitions/`) |
//! | `Definitions/swagger.*`, `Definitions/asyncapi.*` | API definition |
//! | `Definitions/schema.graphql` | GraphQL schema (must not be empty) |
//! | `deployment_environments.yaml` | gateway environments and vhosts |
//! | `Endpoint-certificates/*.crt`, `*.pem` | upstream certificates |
//! | `Endpoint-certificates/endpoint_certificates.*` | endpoint URL to certificate mapping |
//! | `Endpoint-certificates/interceptors/*.crt`, `*.pem` | interceptor certificates |
//! | `Policies/*.yaml`, `*.json` / `Policies/*.gotmpl` | policy specifications / definitions |

use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read};
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::config::{AdapterConfig, DEFAULT_ENVIRONMENT};
use crate::errors::{Error, Result, TlsError};
use crate::model::{Api, ApiKind, PolicyContainer, PolicyContainerMap, PolicySpecification};
use crate::parser::{from_json_or_yaml, parse_definition, ApiYaml};
use crate::xds::cluster::DEFAULT_CERT_KEY;
use crate::xds::UpstreamCerts;

const DEFINITIONS_DIR: &str = "Definitions";
const ENDPOINT_CERTIFICATES_DIR: &str = "Endpoint-certificates";
const INTERCEPTORS_DIR: &str = "interceptors";
const POLICIES_DIR: &str = "Policies";
const DEPLOYMENT_ENVIRONMENTS_FILE: &str = "deployment_environments.yaml";
const ENDPOINT_CERTIFICATES_STEM: &str = "endpoint_certificates";
const GRAPHQL_SCHEMA_FILE: &str = "schema.graphql";
const POLICY_DEFINITION_EXTENSION: &str = "gotmpl";

/// A gateway environment the API is deployed to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Deployment {
    pub environment: String,
    pub vhost: String,
    pub display_on_devportal: bool,
}

#[derive(Debug, Default, Deserialize)]
struct DeploymentEnvironments {
    #[serde(default)]
    data: Vec<DeploymentEnvironment>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentEnvironment {
    deployment_environment: String,
    #[serde(default)]
    deployment_vhost: String,
    #[serde(default)]
    display_on_devportal: bool,
}

#[derive(Debug, Default, Deserialize)]
struct EndpointCertificates {
    #[serde(default)]
    data: Vec<EndpointCertificate>,
}

#[derive(Debug, Default, Deserialize)]
struct EndpointCertificate {
    endpoint: String,
    certificate: String,
}

/// Everything read from one API project
#[derive(Debug, Clone)]
pub struct ProjectApi {
    pub api_yaml: ApiYaml,
    pub kind: ApiKind,
    /// Definition converted to JSON
    pub definition: Option<Vec<u8>>,
    pub graphql_schema: Option<String>,
    /// Upstream certificates by file name
    pub upstream_certs: BTreeMap<String, Vec<u8>>,
    /// Endpoint URL to certificate file name
    pub endpoint_certificates: BTreeMap<String, String>,
    pub interceptor_certs: Vec<u8>,
    pub policies: PolicyContainerMap,
    pub deployments: Vec<Deployment>,
    pub organization_id: String,
    pub lifecycle_status: String,
}

#[derive(Default)]
struct ProjectEntries {
    api_yaml: Option<Vec<u8>>,
    definition: Option<Vec<u8>>,
    graphql_schema: Option<String>,
    deployments: Option<Vec<u8>>,
    endpoint_certificates: Option<Vec<u8>>,
    upstream_certs: BTreeMap<String, Vec<u8>>,
    interceptor_certs: Vec<u8>,
    policy_specifications: HashMap<String, PolicySpecification>,
    policy_definitions: HashMap<String, String>,
}

impl ProjectApi {
    /// Read a project from zip archive bytes.
    pub fn from_zip_bytes(bytes: &[u8], config: &AdapterConfig) -> Result<Self> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|err| Error::malformed("project", format!("invalid zip archive: {}", err)))?;

        let mut files = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|err| Error::malformed("project", format!("unreadable zip entry: {}", err)))?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let mut content = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut content)?;
            files.push((name, content));
        }

        Self::from_files(files, config)
    }

    /// Read a project from a zip file on disk.
    pub fn from_zip_file(path: &Path, config: &AdapterConfig) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_zip_bytes(&bytes, config).map_err(|err| {
            error!(file = %path.display(), error = %err, "Failed to read API project");
            err
        })
    }

    /// Read a project from `(path, content)` entries.
    pub fn from_files<I>(files: I, config: &AdapterConfig) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Vec<u8>)>,
    {
        let mut entries = ProjectEntries::default();
        for (path, content) in files {
            entries.add(&path, content)?;
        }
        entries.into_project(config)
    }

    /// Upstream certificates keyed by endpoint URL, plus every unmapped certificate concatenated
    /// under `default`.
    pub fn upstream_cert_map(&self) -> Result<UpstreamCerts> {
        let mut certs = UpstreamCerts::new();
        let mut mapped_files = Vec::new();

        for (endpoint, file) in &self.endpoint_certificates {
            let cert = self.upstream_certs.get(file).ok_or_else(|| TlsError::MissingMappedCertificate {
                endpoint: endpoint.clone(),
                file: file.clone(),
            })?;
            certs.insert(endpoint.clone(), cert.clone());
            mapped_files.push(file.as_str());
        }

        let mut default_certs = Vec::new();
        for (file, cert) in &self.upstream_certs {
            if mapped_files.contains(&file.as_str()) {
                continue;
            }
            default_certs.extend_from_slice(cert);
            default_certs.push(b'\n');
        }
        if !default_certs.is_empty() {
            certs.insert(DEFAULT_CERT_KEY.to_string(), default_certs);
        }
        Ok(certs)
    }

    /// Interceptor certificates, all trusted under `default`
    pub fn interceptor_cert_map(&self) -> UpstreamCerts {
        let mut certs = UpstreamCerts::new();
        if !self.interceptor_certs.is_empty() {
            certs.insert(DEFAULT_CERT_KEY.to_string(), self.interceptor_certs.clone());
        }
        certs
    }

    /// Compile the project into the unified model.
    ///
    /// The definition is parsed (HTTP and WEBHOOK always need one, WS uses an AsyncAPI definition
    /// when bundled), api.yaml is overlaid, vendor extensions and security options are applied,
    /// environment overrides are read through `env`, and the result is validated before the
    /// operation policies are rendered.
    pub fn build_api<F>(&self, config: &AdapterConfig, env: F) -> Result<Api>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut api = match (self.kind, self.definition.as_deref()) {
            (ApiKind::Http | ApiKind::Webhook, Some(definition)) => parse_definition(definition, self.kind)?,
            (ApiKind::Http | ApiKind::Webhook, None) => {
                return Err(Error::malformed(
                    "project",
                    format!("{} APIs require a definition under {}/", self.kind, DEFINITIONS_DIR),
                ));
            }
            (ApiKind::Ws, Some(definition)) => parse_definition(definition, ApiKind::Ws)?,
            (kind, _) => Api::new(kind),
        };
        api.kind = self.kind;

        let consul = config.adapter.consul.enabled;
        self.api_yaml.apply_to(&mut api, consul)?;
        api.organization_id = self.organization_id.clone();

        api.apply_extensions(config)?;
        api.sanitize_security(self.api_yaml.api_key_enabled(), self.api_yaml.oauth2_enabled());
        api.apply_env_overrides(env);
        api.validate(&config.envoy.upstream)?;
        api.format_policies(&self.policies);
        api.sort_resources();

        info!(
            api = %api.title,
            version = %api.version,
            kind = %api.kind,
            basepath = %api.x_wso2_basepath,
            resources = api.resources.len(),
            "API project compiled"
        );
        Ok(api)
    }

    pub fn api_id(&self) -> &str {
        &self.api_yaml.data.id
    }

    pub fn name(&self) -> &str {
        &self.api_yaml.data.name
    }

    pub fn version(&self) -> &str {
        &self.api_yaml.data.version
    }
}

/// Path of an archive entry split into its last three segments
struct EntryPath<'a> {
    file: &'a str,
    parent: Option<&'a str>,
    grandparent: Option<&'a str>,
}

impl<'a> EntryPath<'a> {
    fn new(path: &'a str) -> Self {
        let mut segments = path.trim_end_matches('/').rsplit('/');
        let file = segments.next().unwrap_or_default();
        Self { file, parent: segments.next(), grandparent: segments.next() }
    }

    fn stem(&self) -> &'a str {
        self.file.rsplit_once('.').map_or(self.file, |(stem, _)| stem)
    }

    fn extension(&self) -> &'a str {
        self.file.rsplit_once('.').map_or("", |(_, extension)| extension)
    }

    fn in_dir(&self, dir: &str) -> bool {
        self.parent == Some(dir)
    }

    fn is_certificate(&self) -> bool {
        matches!(self.extension(), "crt" | "pem")
    }

    fn is_yaml_or_json(&self) -> bool {
        matches!(self.extension(), "yaml" | "yml" | "json")
    }
}

impl ProjectEntries {
    fn add(&mut self, path: &str, content: Vec<u8>) -> Result<()> {
        let entry = EntryPath::new(path);

        if entry.in_dir(DEFINITIONS_DIR) {
            if entry.file == GRAPHQL_SCHEMA_FILE {
                let schema = String::from_utf8_lossy(&content).into_owned();
                if schema.trim().is_empty() {
                    return Err(Error::malformed(path, "GraphQL schema is empty"));
                }
                self.graphql_schema = Some(schema);
            } else if matches!(entry.stem(), "swagger" | "asyncapi") {
                debug!(file = %path, "Reading API definition");
                let definition = crate::parser::to_json_value(&content, path)?;
                self.definition = Some(serde_json::to_vec(&definition)?);
            }
            return Ok(());
        }

        if entry.in_dir(INTERCEPTORS_DIR) && entry.grandparent == Some(ENDPOINT_CERTIFICATES_DIR) {
            if entry.is_certificate() {
                validate_pem(path, &content)?;
                self.interceptor_certs.extend_from_slice(&content);
                self.interceptor_certs.push(b'\n');
            }
            return Ok(());
        }

        if entry.in_dir(ENDPOINT_CERTIFICATES_DIR) {
            if entry.stem() == ENDPOINT_CERTIFICATES_STEM {
                self.endpoint_certificates = Some(content);
            } else if entry.is_certificate() {
                validate_pem(path, &content)?;
                self.upstream_certs.insert(entry.file.to_string(), content);
            }
            return Ok(());
        }

        if entry.in_dir(POLICIES_DIR) {
            if entry.extension() == POLICY_DEFINITION_EXTENSION {
                let definition = String::from_utf8_lossy(&content).into_owned();
                self.policy_definitions.insert(entry.stem().to_string(), definition);
            } else if entry.is_yaml_or_json() {
                let specification: PolicySpecification = from_json_or_yaml(&content, path)?;
                self.policy_specifications.insert(entry.stem().to_string(), specification);
            }
            return Ok(());
        }

        match entry.file {
            DEPLOYMENT_ENVIRONMENTS_FILE => self.deployments = Some(content),
            "api.yaml" | "api.json" => self.api_yaml = Some(content),
            _ => debug!(file = %path, "Ignoring project entry"),
        }
        Ok(())
    }

    fn into_project(self, config: &AdapterConfig) -> Result<ProjectApi> {
        let raw_descriptor = self
            .api_yaml
            .ok_or_else(|| Error::malformed("project", "could not find api.yaml or api.json"))?;
        let api_yaml = ApiYaml::from_bytes(&raw_descriptor)?;
        let kind = api_yaml.api_kind()?;

        let deployments = match self.deployments {
            Some(raw) => parse_deployments(&raw, config)?,
            None => config
                .default_vhost(DEFAULT_ENVIRONMENT)
                .map(|vhost| {
                    vec![Deployment {
                        environment: DEFAULT_ENVIRONMENT.to_string(),
                        vhost,
                        display_on_devportal: false,
                    }]
                })
                .unwrap_or_default(),
        };

        let endpoint_certificates = match self.endpoint_certificates {
            Some(raw) => from_json_or_yaml::<EndpointCertificates>(&raw, "endpoint_certificates")?
                .data
                .into_iter()
                .map(|mapping| (mapping.endpoint, mapping.certificate))
                .collect(),
            None => BTreeMap::new(),
        };

        let mut policy_definitions = self.policy_definitions;
        let mut policies = PolicyContainerMap::new();
        for (name, specification) in self.policy_specifications {
            match policy_definitions.remove(&name) {
                Some(definition) => {
                    policies.insert(name, PolicyContainer { specification, definition });
                }
                None => warn!(policy = %name, "Policy specification has no definition, ignoring"),
            }
        }
        for name in policy_definitions.keys() {
            warn!(policy = %name, "Policy definition has no specification, ignoring");
        }

        let organization_id = if api_yaml.data.organization_id.is_empty() {
            config.adapter.default_organization.clone()
        } else {
            api_yaml.data.organization_id.clone()
        };
        let lifecycle_status = api_yaml.data.lifecycle_status.to_uppercase();

        debug!(
            api = %api_yaml.data.name,
            version = %api_yaml.data.version,
            %kind,
            deployments = deployments.len(),
            policies = policies.len(),
            "Read API project"
        );

        Ok(ProjectApi {
            api_yaml,
            kind,
            definition: self.definition,
            graphql_schema: self.graphql_schema,
            upstream_certs: self.upstream_certs,
            endpoint_certificates,
            interceptor_certs: self.interceptor_certs,
            policies,
            deployments,
            organization_id,
            lifecycle_status,
        })
    }
}

/// Environments named by `deployment_environments.yaml`. Environments without a configured vhost
/// mapping are skipped; an entry without a vhost gets the environment's default one.
fn parse_deployments(raw: &[u8], config: &AdapterConfig) -> Result<Vec<Deployment>> {
    let environments: DeploymentEnvironments = from_json_or_yaml(raw, DEPLOYMENT_ENVIRONMENTS_FILE)?;

    let mut deployments = Vec::with_capacity(environments.data.len());
    for environment in environments.data {
        let Some(default_vhost) = config.default_vhost(&environment.deployment_environment) else {
            warn!(environment = %environment.deployment_environment, "Environment is not configured, skipping");
            continue;
        };
        let vhost = if environment.deployment_vhost.is_empty() {
            default_vhost
        } else {
            environment.deployment_vhost
        };
        deployments.push(Deployment {
            environment: environment.deployment_environment,
            vhost,
            display_on_devportal: environment.display_on_devportal,
        });
    }
    Ok(deployments)
}

fn validate_pem(name: &str, content: &[u8]) -> Result<()> {
    let mut reader = content;
    let certs: std::result::Result<Vec<_>, _> = rustls_pemfile::certs(&mut reader).collect();
    match certs {
        Ok(certs) if !certs.is_empty() => Ok(()),
        _ => {
            error!(file = %name, "Provided certificate is not in the PEM file format");
            Err(TlsError::InvalidCertificatePem { name: name.to_string() }.into())
        }
    }
}

/// Read every `*.zip` project in a directory. Unreadable projects are logged and skipped.
pub fn read_project_dir(dir: &Path, config: &AdapterConfig) -> Result<Vec<ProjectApi>> {
    let mut paths: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.extension().is_some_and(|extension| extension == "zip"))
        .collect();
    paths.sort();

    let mut projects = Vec::with_capacity(paths.len());
    for path in paths {
        match ProjectApi::from_zip_file(&path, config) {
            Ok(project) => projects.push(project),
            Err(err) => error!(file = %path.display(), error = %err, "Skipping API project"),
        }
    }
    Ok(projects)
}
