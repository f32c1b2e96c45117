//! # Command Line Interface
//!
//! Standalone commands around the compiler: deploy project bundles into an in-memory gateway
//! snapshot, inspect the enforcer descriptor of a project, and validate bundles.

pub mod output;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};

use crate::config::{AdapterConfig, DEFAULT_ENVIRONMENT};
use crate::deployer::{vhost_environments, DeploymentSummary, InMemoryPublisher, Orchestrator, VhostEnvironments};
use crate::enforcer::EnforcerApi;
use crate::observability::{init_logging, log_config_info};
use crate::project::{read_project_dir, ProjectApi};
use crate::xds::{create_routes_with_clusters, GeneratorContext, ServiceDiscoveryRegistry};
use output::{print_output, OutputFormat};

#[derive(Parser)]
#[command(name = "api-adapter")]
#[command(about = "Compiles API projects into gateway configuration")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Json, global = true)]
    pub output: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Deploy API project bundles (zip files or directories of zip files)
    Deploy {
        #[arg(required = true)]
        bundles: Vec<PathBuf>,

        /// Deploy to this vhost instead of the bundle's deployment environments
        #[arg(long)]
        vhost: Option<String>,

        /// Deploy to this environment instead of the bundle's deployment environments
        #[arg(long)]
        environment: Option<String>,

        /// Replace existing deployments
        #[arg(long = "override")]
        override_existing: bool,
    },

    /// Print the enforcer descriptor of a bundle
    Inspect {
        bundle: PathBuf,

        /// Vhost recorded in the descriptor
        #[arg(long)]
        vhost: Option<String>,
    },

    /// Compile bundles and report every failure
    Validate {
        #[arg(required = true)]
        bundles: Vec<PathBuf>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeployReport {
    api: String,
    version: String,
    #[serde(flatten)]
    summary: DeploymentSummary,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidationReport {
    bundle: String,
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Run CLI commands
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AdapterConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    init_logging(&config.logging);
    log_config_info(&config);

    match cli.command {
        Commands::Deploy { bundles, vhost, environment, override_existing } => {
            let targets = explicit_targets(&config, vhost, environment)?;
            handle_deploy(config, &bundles, targets, override_existing, cli.output).await
        }
        Commands::Inspect { bundle, vhost } => handle_inspect(&config, &bundle, vhost, cli.output),
        Commands::Validate { bundles } => handle_validate(&config, &bundles, cli.output),
    }
}

/// Targets given on the command line. An environment alone uses its default vhost; a vhost alone
/// belongs to the default environment.
fn explicit_targets(
    config: &AdapterConfig,
    vhost: Option<String>,
    environment: Option<String>,
) -> anyhow::Result<Option<VhostEnvironments>> {
    let (vhost, environment) = match (vhost, environment) {
        (None, None) => return Ok(None),
        (Some(vhost), environment) => (vhost, environment.unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string())),
        (None, Some(environment)) => match config.default_vhost(&environment) {
            Some(vhost) => (vhost, environment),
            None => bail!("Environment '{}' has no vhost mapping; pass --vhost", environment),
        },
    };
    Ok(Some(VhostEnvironments::from([(vhost, BTreeSet::from([environment]))])))
}

fn load_projects(config: &AdapterConfig, bundles: &[PathBuf]) -> anyhow::Result<Vec<ProjectApi>> {
    let mut projects = Vec::new();
    for bundle in bundles {
        if bundle.is_dir() {
            projects.extend(read_project_dir(bundle, config)?);
        } else {
            projects.push(load_project(config, bundle)?);
        }
    }
    Ok(projects)
}

fn load_project(config: &AdapterConfig, bundle: &Path) -> anyhow::Result<ProjectApi> {
    ProjectApi::from_zip_file(bundle, config).with_context(|| format!("Failed to read {}", bundle.display()))
}

async fn handle_deploy(
    config: AdapterConfig,
    bundles: &[PathBuf],
    targets: Option<VhostEnvironments>,
    override_existing: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let projects = load_projects(&config, bundles)?;
    let publisher = Arc::new(InMemoryPublisher::new());
    let orchestrator = Orchestrator::new(Arc::new(config), publisher.clone());

    let mut reports = Vec::with_capacity(projects.len());
    for project in &projects {
        let targets = targets.clone().unwrap_or_else(|| vhost_environments(&project.deployments));
        let summary = orchestrator.deploy(project, &targets, override_existing).await?;
        reports.push(DeployReport {
            api: project.name().to_string(),
            version: project.version().to_string(),
            summary,
        });
    }

    for vhost in publisher.vhosts() {
        info!(vhost = %vhost, resources = publisher.vhost_resources(&vhost).len(), "Gateway snapshot");
    }
    print_output(&reports, format)
}

fn handle_inspect(
    config: &AdapterConfig,
    bundle: &Path,
    vhost: Option<String>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let project = load_project(config, bundle)?;
    let api = project.build_api(config, |name| std::env::var(name).ok())?;
    let vhost = vhost
        .or_else(|| project.deployments.first().map(|deployment| deployment.vhost.clone()))
        .or_else(|| config.default_vhost(DEFAULT_ENVIRONMENT))
        .unwrap_or_default();

    let descriptor = EnforcerApi::from_api(&api, &vhost).with_graphql_schema(project.graphql_schema.clone());
    print_output(&descriptor, format)
}

fn handle_validate(config: &AdapterConfig, bundles: &[PathBuf], format: OutputFormat) -> anyhow::Result<()> {
    let mut reports = Vec::with_capacity(bundles.len());
    for bundle in bundles {
        let result = validate_bundle(config, bundle);
        if let Err(err) = &result {
            error!(bundle = %bundle.display(), error = %err, "Bundle is invalid");
        }
        reports.push(ValidationReport {
            bundle: bundle.display().to_string(),
            valid: result.is_ok(),
            error: result.err().map(|err| format!("{:#}", err)),
        });
    }

    print_output(&reports, format)?;
    let invalid = reports.iter().filter(|report| !report.valid).count();
    if invalid > 0 {
        bail!("{} of {} bundles are invalid", invalid, reports.len());
    }
    Ok(())
}

fn validate_bundle(config: &AdapterConfig, bundle: &Path) -> anyhow::Result<()> {
    let project = load_project(config, bundle)?;
    let api = project.build_api(config, |name| std::env::var(name).ok())?;
    let upstream_certs = project.upstream_cert_map()?;
    let interceptor_certs = project.interceptor_cert_map();
    let registry = ServiceDiscoveryRegistry::new();

    let mut vhosts: Vec<String> = vhost_environments(&project.deployments).into_keys().collect();
    if vhosts.is_empty() {
        vhosts.extend(config.default_vhost(DEFAULT_ENVIRONMENT));
    }
    for vhost in &vhosts {
        let ctx = GeneratorContext {
            settings: &config.envoy,
            vhost,
            organization_id: &api.organization_id,
            upstream_certs: &upstream_certs,
            interceptor_certs: &interceptor_certs,
            registry: &registry,
        };
        create_routes_with_clusters(&api, &ctx)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_targets_resolve_vhosts() {
        let config = AdapterConfig::default();

        assert!(explicit_targets(&config, None, None).unwrap().is_none());

        let targets = explicit_targets(&config, None, Some("Default".into())).unwrap().unwrap();
        assert!(targets["localhost"].contains("Default"));

        let targets = explicit_targets(&config, Some("us.io".into()), None).unwrap().unwrap();
        assert!(targets["us.io"].contains(DEFAULT_ENVIRONMENT));

        assert!(explicit_targets(&config, None, Some("Unknown".into())).is_err());
    }

    #[test]
    fn cli_parses_deploy_flags() {
        let cli = Cli::try_parse_from([
            "api-adapter",
            "deploy",
            "petstore.zip",
            "--vhost",
            "us.io",
            "--override",
            "--output",
            "yaml",
        ])
        .unwrap();

        assert_eq!(cli.output, OutputFormat::Yaml);
        match cli.command {
            Commands::Deploy { bundles, vhost, override_existing, .. } => {
                assert_eq!(bundles, vec![PathBuf::from("petstore.zip")]);
                assert_eq!(vhost.as_deref(), Some("us.io"));
                assert!(override_existing);
            }
            _ => panic!("expected deploy"),
        }
    }
}
