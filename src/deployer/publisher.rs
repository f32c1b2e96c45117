//! Sinks for generated gateway configuration.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use crate::enforcer::EnforcerApi;
use crate::errors::{Error, Result};
use crate::xds::{BuiltResource, GeneratedResources};

/// Everything published for one API on one vhost
#[derive(Debug, Clone)]
pub struct ApiSnapshot {
    pub api_uuid: String,
    pub resources: GeneratedResources,
    pub enforcer: EnforcerApi,
}

impl ApiSnapshot {
    pub fn built_resources(&self) -> Vec<BuiltResource> {
        self.resources.clone().into_built_resources()
    }
}

/// Destination of generated resources
#[async_trait]
pub trait ResourcePublisher: Send + Sync {
    /// Create or replace the snapshot of `snapshot.api_uuid` on `vhost`
    async fn publish(&self, vhost: &str, snapshot: ApiSnapshot) -> Result<()>;

    /// Remove an API from `vhost`. Removing an unknown API is not an error.
    async fn remove(&self, vhost: &str, api_uuid: &str) -> Result<()>;

    /// Snapshot currently published for an API on `vhost`
    async fn current(&self, vhost: &str, api_uuid: &str) -> Result<Option<ApiSnapshot>>;
}

/// Publisher keeping snapshots in memory, versioned on every change
#[derive(Debug, Default)]
pub struct InMemoryPublisher {
    snapshots: RwLock<HashMap<String, BTreeMap<String, ApiSnapshot>>>,
    version: AtomicU64,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of changes published so far
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self, vhost: &str, api_uuid: &str) -> Option<ApiSnapshot> {
        self.snapshots.read().ok()?.get(vhost)?.get(api_uuid).cloned()
    }

    /// Every resource published on a vhost, in API uuid order
    pub fn vhost_resources(&self, vhost: &str) -> Vec<BuiltResource> {
        let Ok(snapshots) = self.snapshots.read() else {
            return Vec::new();
        };
        snapshots
            .get(vhost)
            .map(|apis| apis.values().flat_map(ApiSnapshot::built_resources).collect())
            .unwrap_or_default()
    }

    pub fn vhosts(&self) -> Vec<String> {
        let Ok(snapshots) = self.snapshots.read() else {
            return Vec::new();
        };
        let mut vhosts: Vec<String> =
            snapshots.iter().filter(|(_, apis)| !apis.is_empty()).map(|(vhost, _)| vhost.clone()).collect();
        vhosts.sort();
        vhosts
    }
}

#[async_trait]
impl ResourcePublisher for InMemoryPublisher {
    async fn publish(&self, vhost: &str, snapshot: ApiSnapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write().map_err(|_| Error::internal("publisher lock poisoned"))?;
        debug!(
            vhost = %vhost,
            api_uuid = %snapshot.api_uuid,
            routes = snapshot.resources.routes.len(),
            clusters = snapshot.resources.clusters.len(),
            "Publishing API snapshot"
        );
        snapshots.entry(vhost.to_string()).or_default().insert(snapshot.api_uuid.clone(), snapshot);
        self.version.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, vhost: &str, api_uuid: &str) -> Result<()> {
        let mut snapshots = self.snapshots.write().map_err(|_| Error::internal("publisher lock poisoned"))?;
        let removed = snapshots.get_mut(vhost).and_then(|apis| apis.remove(api_uuid)).is_some();
        if removed {
            debug!(vhost = %vhost, api_uuid = %api_uuid, "Removed API snapshot");
            self.version.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn current(&self, vhost: &str, api_uuid: &str) -> Result<Option<ApiSnapshot>> {
        let snapshots = self.snapshots.read().map_err(|_| Error::internal("publisher lock poisoned"))?;
        Ok(snapshots.get(vhost).and_then(|apis| apis.get(api_uuid)).cloned())
    }
}
