//! Deployment index: which API is deployed on which vhost, for which environments.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::errors::{Error, Result};

/// Identity of one API deployment on one vhost
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeploymentKey {
    pub organization_id: String,
    pub api_uuid: String,
    pub vhost: String,
}

impl DeploymentKey {
    pub fn new(organization_id: &str, api_uuid: &str, vhost: &str) -> Self {
        Self {
            organization_id: organization_id.to_string(),
            api_uuid: api_uuid.to_string(),
            vhost: vhost.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedApi {
    pub title: String,
    pub version: String,
    pub basepath: String,
    pub environments: BTreeSet<String>,
}

/// Deployments keyed by organization, API uuid and vhost.
///
/// Checks and mutations that must be atomic go through [`DeploymentIndex::lock`], which hands out
/// the whole table under one guard.
#[derive(Debug, Default)]
pub struct DeploymentIndex {
    entries: Mutex<HashMap<DeploymentKey, DeployedApi>>,
}

pub type IndexGuard<'a> = MutexGuard<'a, HashMap<DeploymentKey, DeployedApi>>;

impl DeploymentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> Result<IndexGuard<'_>> {
        self.entries.lock().map_err(|_| Error::internal("deployment index lock poisoned"))
    }

    /// Whether `api_uuid` of `organization_id` is deployed on `vhost`
    pub fn is_already_deployed(&self, api_uuid: &str, vhost: &str, organization_id: &str) -> Result<bool> {
        Ok(self.lock()?.contains_key(&DeploymentKey::new(organization_id, api_uuid, vhost)))
    }

    pub fn get(&self, api_uuid: &str, vhost: &str, organization_id: &str) -> Result<Option<DeployedApi>> {
        Ok(self.lock()?.get(&DeploymentKey::new(organization_id, api_uuid, vhost)).cloned())
    }

    /// Vhosts `api_uuid` is deployed on, sorted
    pub fn vhosts_of(&self, api_uuid: &str, organization_id: &str) -> Result<Vec<String>> {
        let mut vhosts: Vec<String> = self
            .lock()?
            .keys()
            .filter(|key| key.api_uuid == api_uuid && key.organization_id == organization_id)
            .map(|key| key.vhost.clone())
            .collect();
        vhosts.sort();
        Ok(vhosts)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }
}

/// Another API of the same organization already serving `basepath` on `vhost`
pub(crate) fn basepath_owner<'a>(
    entries: &'a HashMap<DeploymentKey, DeployedApi>,
    organization_id: &str,
    vhost: &str,
    basepath: &str,
    api_uuid: &str,
) -> Option<(&'a DeploymentKey, &'a DeployedApi)> {
    entries.iter().find(|(key, deployed)| {
        key.organization_id == organization_id
            && key.vhost == vhost
            && key.api_uuid != api_uuid
            && deployed.basepath == basepath
    })
}
