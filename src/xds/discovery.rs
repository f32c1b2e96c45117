//! Service-discovery queries of the clusters built in one generator run.
//!
//! Endpoints declared with `consul(<query>,<default url>)` are built against the default URL; the
//! query is kept here, keyed by cluster name, for whatever resolves it later.

use std::collections::BTreeMap;
use std::sync::RwLock;

use tracing::{debug, error};

#[derive(Debug, Default)]
pub struct ServiceDiscoveryRegistry {
    queries: RwLock<BTreeMap<String, String>>,
}

impl ServiceDiscoveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the query resolving `cluster`, replacing any earlier one.
    pub fn record(&self, cluster: &str, query: &str) {
        let Ok(mut queries) = self.queries.write() else {
            error!(cluster = %cluster, "Service discovery registry lock poisoned, query dropped");
            return;
        };
        debug!(cluster = %cluster, query = %query, "Recorded service discovery query");
        queries.insert(cluster.to_string(), query.to_string());
    }

    pub fn get(&self, cluster: &str) -> Option<String> {
        self.queries.read().ok()?.get(cluster).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        match self.queries.read() {
            Ok(queries) => queries.clone(),
            Err(_) => {
                error!("Service discovery registry lock poisoned - returning empty");
                BTreeMap::new()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queries.read().map(|queries| queries.is_empty()).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_latest_query_per_cluster() {
        let registry = ServiceDiscoveryRegistry::new();
        assert!(registry.is_empty());

        registry.record("clusterProd_org_localhost_Pets1.0", "pets.[prod]");
        registry.record("clusterProd_org_localhost_Pets1.0", "pets.[dc1].[prod]");
        registry.record("clusterSand_org_localhost_Pets1.0", "pets.[sand]");

        assert_eq!(registry.get("clusterProd_org_localhost_Pets1.0").as_deref(), Some("pets.[dc1].[prod]"));
        assert_eq!(registry.snapshot().len(), 2);
        assert!(registry.get("unknown").is_none());
    }
}
