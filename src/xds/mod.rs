//! Envoy resource generation
//!
//! Compiles the unified API model into the route, cluster and endpoint resources the gateway
//! consumes. Entry point: [`generator::create_routes_with_clusters`].

pub mod cluster;
pub mod discovery;
pub mod filters;
pub mod generator;
pub mod path;
pub mod resources;
pub mod route;
pub mod tls;

use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::endpoint::v3::ClusterLoadAssignment;
use envoy_types::pb::envoy::config::route::v3::Route;

pub use cluster::{process_endpoints, ClusterBuild, UpstreamCerts};
pub use discovery::ServiceDiscoveryRegistry;
pub use generator::{create_routes_with_clusters, GeneratorContext};
pub use resources::{BuiltResource, CLUSTER_TYPE_URL, ENDPOINT_TYPE_URL, ROUTE_TYPE_URL};
pub use route::{create_routes, RouteCreateParams};

/// Everything generated for one API on one vhost
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedResources {
    pub routes: Vec<Route>,
    pub clusters: Vec<Cluster>,
    pub endpoints: Vec<ClusterLoadAssignment>,
}

impl GeneratedResources {
    pub(crate) fn push_cluster(&mut self, (cluster, endpoints): (Cluster, ClusterLoadAssignment)) {
        self.clusters.push(cluster);
        self.endpoints.push(endpoints);
    }

    pub fn cluster_names(&self) -> Vec<&str> {
        self.clusters.iter().map(|cluster| cluster.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty() && self.clusters.is_empty()
    }

    /// Encode every resource; routes are named by their decorator operation.
    pub fn into_built_resources(self) -> Vec<BuiltResource> {
        let mut built = Vec::with_capacity(self.routes.len() + self.clusters.len() * 2);

        for route in &self.routes {
            let name = route
                .decorator
                .as_ref()
                .map(|decorator| decorator.operation.clone())
                .filter(|operation| !operation.is_empty())
                .unwrap_or_else(|| route.name.clone());
            built.push(BuiltResource::encode(name, ROUTE_TYPE_URL, route));
        }
        for cluster in &self.clusters {
            built.push(BuiltResource::encode(cluster.name.clone(), CLUSTER_TYPE_URL, cluster));
        }
        for assignment in &self.endpoints {
            built.push(BuiltResource::encode(
                assignment.cluster_name.clone(),
                ENDPOINT_TYPE_URL,
                assignment,
            ));
        }

        built
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envoy_types::pb::envoy::config::route::v3::Decorator;

    #[test]
    fn built_resources_keep_order_and_names() {
        let resources = GeneratedResources {
            routes: vec![Route {
                name: "/pets".into(),
                decorator: Some(Decorator { operation: "localhost:^/pets((?:/.*)*)".into(), ..Default::default() }),
                ..Default::default()
            }],
            clusters: vec![Cluster { name: "clusterProd_org_localhost_Pets1.0".into(), ..Default::default() }],
            endpoints: vec![ClusterLoadAssignment {
                cluster_name: "clusterProd_org_localhost_Pets1.0".into(),
                ..Default::default()
            }],
        };
        assert_eq!(resources.cluster_names(), vec!["clusterProd_org_localhost_Pets1.0"]);

        let built = resources.into_built_resources();
        let names: Vec<_> = built.iter().map(|resource| resource.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "localhost:^/pets((?:/.*)*)",
                "clusterProd_org_localhost_Pets1.0",
                "clusterProd_org_localhost_Pets1.0"
            ]
        );
        assert_eq!(built[0].type_url(), ROUTE_TYPE_URL);
        assert_eq!(built[2].type_url(), ENDPOINT_TYPE_URL);
    }
}
