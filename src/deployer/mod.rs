//! # Deployment Orchestration
//!
//! Deploys compiled API projects to gateway vhosts. For each request the orchestrator:
//!
//! 1. compiles the project and generates resources for every target vhost, touching no state;
//! 2. under the index guard, rejects existing deployments (unless overriding) and basepaths owned
//!    by another API, then records the merged environments of each target vhost;
//! 3. publishes each vhost under that vhost's lock; a failed publish restores the index entries
//!    and the snapshots this request replaced before the error is returned;
//! 4. once every vhost is published, undeploys the environments the API moved away from.

pub mod index;
pub mod publisher;

pub use index::{DeployedApi, DeploymentIndex, DeploymentKey};
pub use publisher::{ApiSnapshot, InMemoryPublisher, ResourcePublisher};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn, Instrument};

use crate::config::AdapterConfig;
use crate::deploy_span;
use crate::enforcer::EnforcerApi;
use crate::errors::{Error, Result};
use crate::model::Api;
use crate::project::{Deployment, ProjectApi};
use crate::xds::{create_routes_with_clusters, GeneratorContext, ServiceDiscoveryRegistry};

/// Target environments of each vhost
pub type VhostEnvironments = BTreeMap<String, BTreeSet<String>>;

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Group deployments by vhost
pub fn vhost_environments(deployments: &[Deployment]) -> VhostEnvironments {
    let mut grouped = VhostEnvironments::new();
    for deployment in deployments {
        grouped.entry(deployment.vhost.clone()).or_default().insert(deployment.environment.clone());
    }
    grouped
}

/// Outcome of a successful deployment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSummary {
    pub api_uuid: String,
    /// Vhosts published, with the environments now held on each
    pub deployed: VhostEnvironments,
    /// Environments removed from other vhosts
    pub undeployed: VhostEnvironments,
    /// Service discovery queries of the generated clusters
    pub service_discovery: BTreeMap<String, String>,
}

pub struct Orchestrator {
    config: Arc<AdapterConfig>,
    index: DeploymentIndex,
    publisher: Arc<dyn ResourcePublisher>,
    vhost_locks: DashMap<String, Arc<Mutex<()>>>,
    env_lookup: EnvLookup,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").field("index", &self.index).finish_non_exhaustive()
    }
}

struct PreparedVhost {
    vhost: String,
    snapshot: ApiSnapshot,
}

/// Index changes made for one request, with the entries they replaced
struct Reservation {
    deployed: VhostEnvironments,
    stale: VhostEnvironments,
    previous: Vec<(DeploymentKey, Option<DeployedApi>)>,
}

impl Orchestrator {
    /// Orchestrator reading endpoint overrides from the process environment
    pub fn new(config: Arc<AdapterConfig>, publisher: Arc<dyn ResourcePublisher>) -> Self {
        Self {
            config,
            index: DeploymentIndex::new(),
            publisher,
            vhost_locks: DashMap::new(),
            env_lookup: Arc::new(|name| std::env::var(name).ok()),
        }
    }

    /// Replace the source of environment overrides
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env_lookup = Arc::new(lookup);
        self
    }

    pub fn index(&self) -> &DeploymentIndex {
        &self.index
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Deploy a project to the vhosts and environments of its `deployment_environments.yaml`.
    pub async fn deploy_project(&self, project: &ProjectApi, override_existing: bool) -> Result<DeploymentSummary> {
        self.deploy(project, &vhost_environments(&project.deployments), override_existing).await
    }

    /// Deploy a project to `targets`.
    ///
    /// Without `override_existing`, an API already deployed on any target vhost fails with
    /// [`Error::AlreadyExists`] before anything changes.
    pub async fn deploy(
        &self,
        project: &ProjectApi,
        targets: &VhostEnvironments,
        override_existing: bool,
    ) -> Result<DeploymentSummary> {
        let span = deploy_span!("deploy", project.name(), project.version(), vhosts = targets.len());
        self.deploy_inner(project, targets, override_existing).instrument(span).await
    }

    async fn deploy_inner(
        &self,
        project: &ProjectApi,
        targets: &VhostEnvironments,
        override_existing: bool,
    ) -> Result<DeploymentSummary> {
        let wrap = |err: Error| Error::deployment(project.name(), project.version(), project.api_id(), err);

        if targets.is_empty() {
            warn!("No deployment environments resolved, nothing to deploy");
            return Ok(DeploymentSummary { api_uuid: project.api_id().to_string(), ..Default::default() });
        }

        let env_lookup = Arc::clone(&self.env_lookup);
        let api = project.build_api(&self.config, |name| env_lookup(name)).map_err(wrap)?;
        let api_uuid = api.unique_id();

        let registry = ServiceDiscoveryRegistry::new();
        let prepared = self.prepare(project, &api, targets, &registry).map_err(wrap)?;

        let Reservation { deployed, stale, previous } = self.reserve(&api, &api_uuid, targets, override_existing)?;

        let mut published: Vec<(String, Option<ApiSnapshot>)> = Vec::with_capacity(prepared.len());
        for PreparedVhost { vhost, snapshot } in prepared {
            let outcome = {
                let lock = self.vhost_lock(&vhost);
                let _guard = lock.lock().await;
                match self.publisher.current(&vhost, &api_uuid).await {
                    Ok(before) => self.publisher.publish(&vhost, snapshot).await.map(|()| before),
                    Err(err) => Err(err),
                }
            };
            match outcome {
                Ok(before) => {
                    info!(vhost = %vhost, api_uuid = %api_uuid, "API deployed on vhost");
                    published.push((vhost, before));
                }
                Err(err) => {
                    error!(vhost = %vhost, api_uuid = %api_uuid, error = %err, "Publishing failed, rolling back");
                    self.rollback(&api_uuid, previous, published).await;
                    return Err(wrap(err));
                }
            }
        }

        let undeployed = self.undeploy_stale(&api, &api_uuid, stale).await.map_err(wrap)?;

        info!(
            api_uuid = %api_uuid,
            vhosts = deployed.len(),
            undeployed = undeployed.len(),
            "Deployment completed"
        );
        Ok(DeploymentSummary { api_uuid, deployed, undeployed, service_discovery: registry.snapshot() })
    }

    fn prepare(
        &self,
        project: &ProjectApi,
        api: &Api,
        targets: &VhostEnvironments,
        registry: &ServiceDiscoveryRegistry,
    ) -> Result<Vec<PreparedVhost>> {
        let upstream_certs = project.upstream_cert_map()?;
        let interceptor_certs = project.interceptor_cert_map();
        let api_uuid = api.unique_id();

        let mut prepared = Vec::with_capacity(targets.len());
        for vhost in targets.keys() {
            let ctx = GeneratorContext {
                settings: &self.config.envoy,
                vhost,
                organization_id: &api.organization_id,
                upstream_certs: &upstream_certs,
                interceptor_certs: &interceptor_certs,
                registry,
            };
            let resources = create_routes_with_clusters(api, &ctx)?;
            let enforcer = EnforcerApi::from_api(api, vhost).with_graphql_schema(project.graphql_schema.clone());
            prepared.push(PreparedVhost {
                vhost: vhost.clone(),
                snapshot: ApiSnapshot { api_uuid: api_uuid.clone(), resources, enforcer },
            });
        }
        Ok(prepared)
    }

    /// Check and record the deployment under one index guard. Returns the environments held on
    /// each target vhost and the stale environments on other vhosts.
    fn reserve(
        &self,
        api: &Api,
        api_uuid: &str,
        targets: &VhostEnvironments,
        override_existing: bool,
    ) -> Result<Reservation> {
        let organization_id = api.organization_id.as_str();
        let mut entries = self.index.lock()?;

        for vhost in targets.keys() {
            let key = DeploymentKey::new(organization_id, api_uuid, vhost);
            if !override_existing && entries.contains_key(&key) {
                warn!(vhost = %vhost, "API already exists on vhost");
                return Err(Error::AlreadyExists { api: api.title.clone(), vhost: vhost.clone() });
            }
            if let Some((owner, deployed)) =
                index::basepath_owner(&entries, organization_id, vhost, &api.x_wso2_basepath, api_uuid)
            {
                warn!(
                    vhost = %vhost,
                    basepath = %api.x_wso2_basepath,
                    owner = %owner.api_uuid,
                    owner_api = %deployed.title,
                    "Basepath already used by another API on vhost"
                );
                return Err(Error::AlreadyExists { api: api.title.clone(), vhost: vhost.clone() });
            }
        }

        let mut stale = VhostEnvironments::new();
        for (key, deployed) in entries.iter() {
            if key.api_uuid != api_uuid || key.organization_id != organization_id || targets.contains_key(&key.vhost) {
                continue;
            }
            for environments in targets.values() {
                for environment in deployed.environments.intersection(environments) {
                    stale.entry(key.vhost.clone()).or_default().insert(environment.clone());
                }
            }
        }

        let mut deployed = VhostEnvironments::new();
        let mut previous = Vec::with_capacity(targets.len());
        for (vhost, environments) in targets {
            let key = DeploymentKey::new(organization_id, api_uuid, vhost);
            let existing = entries.get(&key).cloned();
            let mut merged = existing.as_ref().map(|existing| existing.environments.clone()).unwrap_or_default();
            merged.extend(environments.iter().cloned());
            previous.push((key.clone(), existing));
            entries.insert(
                key,
                DeployedApi {
                    title: api.title.clone(),
                    version: api.version.clone(),
                    basepath: api.x_wso2_basepath.clone(),
                    environments: merged.clone(),
                },
            );
            deployed.insert(vhost.clone(), merged);
        }
        Ok(Reservation { deployed, stale, previous })
    }

    /// Restore the index entries and the snapshots a failed request replaced
    async fn rollback(
        &self,
        api_uuid: &str,
        previous: Vec<(DeploymentKey, Option<DeployedApi>)>,
        published: Vec<(String, Option<ApiSnapshot>)>,
    ) {
        match self.index.lock() {
            Ok(mut entries) => {
                for (key, entry) in previous {
                    match entry {
                        Some(entry) => entries.insert(key, entry),
                        None => entries.remove(&key),
                    };
                }
            }
            Err(err) => error!(api_uuid = %api_uuid, error = %err, "Deployment index not restored"),
        }

        for (vhost, before) in published {
            let lock = self.vhost_lock(&vhost);
            let _guard = lock.lock().await;
            let restored = match before {
                Some(snapshot) => self.publisher.publish(&vhost, snapshot).await,
                None => self.publisher.remove(&vhost, api_uuid).await,
            };
            if let Err(err) = restored {
                error!(vhost = %vhost, api_uuid = %api_uuid, error = %err, "Failed to restore vhost snapshot");
            }
        }
    }

    async fn undeploy_stale(&self, api: &Api, api_uuid: &str, stale: VhostEnvironments) -> Result<VhostEnvironments> {
        for (vhost, environments) in &stale {
            info!(vhost = %vhost, environments = ?environments, "Undeploying API from environments it moved away from");
            self.remove_environments(Some(vhost), api_uuid, &api.organization_id, environments).await?;
        }
        Ok(stale)
    }

    /// Remove `environments` of an API, on one vhost or on every vhost. An empty set removes every
    /// environment. The API is dropped from a vhost once no environment remains there.
    ///
    /// Returns the vhosts the API was dropped from.
    pub async fn delete_api(
        &self,
        vhost: Option<&str>,
        api_uuid: &str,
        organization_id: &str,
        environments: &BTreeSet<String>,
    ) -> Result<Vec<String>> {
        let span = deploy_span!("delete", api_uuid, "-", vhost = ?vhost);
        self.remove_environments(vhost, api_uuid, organization_id, environments).instrument(span).await
    }

    async fn remove_environments(
        &self,
        vhost: Option<&str>,
        api_uuid: &str,
        organization_id: &str,
        environments: &BTreeSet<String>,
    ) -> Result<Vec<String>> {
        let emptied = {
            let mut entries = self.index.lock()?;
            let keys: Vec<DeploymentKey> = entries
                .keys()
                .filter(|key| {
                    key.api_uuid == api_uuid
                        && key.organization_id == organization_id
                        && vhost.is_none_or(|vhost| key.vhost == vhost)
                })
                .cloned()
                .collect();
            if keys.is_empty() {
                warn!(api_uuid = %api_uuid, "API is not deployed, nothing to delete");
            }

            let mut emptied = Vec::new();
            for key in keys {
                let Some(deployed) = entries.get_mut(&key) else {
                    continue;
                };
                if environments.is_empty() {
                    deployed.environments.clear();
                } else {
                    deployed.environments.retain(|environment| !environments.contains(environment));
                }
                if deployed.environments.is_empty() {
                    entries.remove(&key);
                    emptied.push(key.vhost);
                }
            }
            emptied
        };

        for vhost in &emptied {
            let lock = self.vhost_lock(vhost);
            let _guard = lock.lock().await;
            self.publisher.remove(vhost, api_uuid).await?;
            info!(vhost = %vhost, api_uuid = %api_uuid, "API removed from vhost");
        }
        Ok(emptied)
    }

    /// Whether the API is deployed on `vhost` for its organization
    pub fn is_api_exist(&self, vhost: &str, api_uuid: &str, organization_id: &str) -> Result<bool> {
        self.index.is_already_deployed(api_uuid, vhost, organization_id)
    }

    fn vhost_lock(&self, vhost: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.vhost_locks.entry(vhost.to_string()).or_default().value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::tests::project_files;

    fn project(deployments: &[(&str, &str)]) -> ProjectApi {
        let mut project = ProjectApi::from_files(project_files(), &AdapterConfig::default()).expect("project");
        project.deployments = deployments
            .iter()
            .map(|(environment, vhost)| Deployment {
                environment: environment.to_string(),
                vhost: vhost.to_string(),
                display_on_devportal: false,
            })
            .collect();
        project
    }

    fn orchestrator() -> (Orchestrator, Arc<InMemoryPublisher>) {
        let publisher = Arc::new(InMemoryPublisher::new());
        let orchestrator = Orchestrator::new(Arc::new(AdapterConfig::default()), publisher.clone())
            .with_env_lookup(|_| None);
        (orchestrator, publisher)
    }

    #[test]
    fn deployments_group_by_vhost() {
        let project = project(&[("Default", "localhost"), ("eu", "localhost"), ("us", "us.io")]);
        let grouped = vhost_environments(&project.deployments);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["localhost"].len(), 2);
    }

    #[tokio::test]
    async fn deploy_publishes_every_vhost() {
        let (orchestrator, publisher) = orchestrator();
        let project = project(&[("Default", "localhost"), ("us", "us.io")]);

        let summary = orchestrator.deploy_project(&project, false).await.expect("deploys");

        assert_eq!(summary.api_uuid, "pets-uuid");
        assert_eq!(summary.deployed.len(), 2);
        assert!(summary.undeployed.is_empty());
        assert_eq!(publisher.vhosts(), vec!["localhost", "us.io"]);
        let snapshot = publisher.snapshot("us.io", "pets-uuid").expect("snapshot");
        assert_eq!(snapshot.enforcer.vhost, "us.io");
        assert!(!snapshot.resources.routes.is_empty());
        assert!(orchestrator.is_api_exist("localhost", "pets-uuid", "carbon.super").unwrap());
    }

    #[tokio::test]
    async fn create_only_rejects_existing_deployments_untouched() {
        let (orchestrator, publisher) = orchestrator();
        let project = project(&[("Default", "localhost")]);
        orchestrator.deploy_project(&project, false).await.expect("first deploy");
        let version = publisher.version();

        let err = orchestrator.deploy_project(&project, false).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { ref vhost, .. } if vhost == "localhost"));
        assert_eq!(publisher.version(), version);

        orchestrator.deploy_project(&project, true).await.expect("override");
        assert_eq!(publisher.version(), version + 1);
    }

    #[tokio::test]
    async fn moving_an_environment_undeploys_the_old_vhost() {
        let (orchestrator, publisher) = orchestrator();
        orchestrator.deploy_project(&project(&[("us", "us.io")]), false).await.unwrap();

        let summary = orchestrator.deploy_project(&project(&[("us", "us-new.io")]), true).await.unwrap();

        assert_eq!(summary.undeployed["us.io"], BTreeSet::from(["us".to_string()]));
        assert_eq!(publisher.vhosts(), vec!["us-new.io"]);
        assert!(!orchestrator.is_api_exist("us.io", "pets-uuid", "carbon.super").unwrap());
    }

    #[tokio::test]
    async fn environments_merge_on_the_same_vhost() {
        let (orchestrator, _) = orchestrator();
        orchestrator.deploy_project(&project(&[("Default", "localhost")]), false).await.unwrap();
        let summary = orchestrator.deploy_project(&project(&[("eu", "localhost")]), true).await.unwrap();

        assert_eq!(summary.deployed["localhost"], BTreeSet::from(["Default".to_string(), "eu".to_string()]));
    }

    #[tokio::test]
    async fn basepath_is_unique_per_vhost() {
        let (orchestrator, _) = orchestrator();
        orchestrator.deploy_project(&project(&[("Default", "localhost")]), false).await.unwrap();

        let mut other = project(&[("Default", "localhost")]);
        other.api_yaml.data.id = "other-uuid".into();
        let err = orchestrator.deploy_project(&other, true).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn generation_failures_wrap_the_api_identity() {
        let (orchestrator, publisher) = orchestrator();
        let mut broken = project(&[("Default", "localhost")]);
        broken.definition = None;

        let err = orchestrator.deploy_project(&broken, false).await.unwrap_err();
        assert!(matches!(err, Error::Deployment { ref uuid, .. } if uuid == "pets-uuid"));
        assert_eq!(publisher.version(), 0);
        assert!(orchestrator.index().is_empty().unwrap());
    }

    #[tokio::test]
    async fn delete_api_drops_vhosts_without_environments() {
        let (orchestrator, publisher) = orchestrator();
        orchestrator
            .deploy_project(&project(&[("Default", "localhost"), ("eu", "localhost")]), false)
            .await
            .unwrap();

        let dropped = orchestrator
            .delete_api(None, "pets-uuid", "carbon.super", &BTreeSet::from(["eu".to_string()]))
            .await
            .unwrap();
        assert!(dropped.is_empty());
        assert!(orchestrator.is_api_exist("localhost", "pets-uuid", "carbon.super").unwrap());

        let dropped = orchestrator.delete_api(Some("localhost"), "pets-uuid", "carbon.super", &BTreeSet::new()).await.unwrap();
        assert_eq!(dropped, vec!["localhost"]);
        assert!(publisher.vhosts().is_empty());
    }
}
