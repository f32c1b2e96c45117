//! Route and cluster generation for one API on one vhost.
//!
//! API level clusters are built first, then `x-wso2-endpoints` clusters and the interceptor
//! clusters, then every resource picks either its own clusters or the API level ones. A cluster
//! that fails to build is logged and replaced by the next level up; a resource whose routes fail
//! is logged and skipped.

use tracing::{debug, error, warn};

use crate::config::EnvoySettings;
use crate::errors::{codes, Result};
use crate::generator_span;
use crate::model::extensions::{
    NAMED_CLUSTER_SUFFIX, X_WSO2_REQUEST_INTERCEPTOR, X_WSO2_RESPONSE_INTERCEPTOR,
};
use crate::model::{Api, ApiKind, EndpointCluster, ExtensionBag, InterceptEndpoint, Operation, Resource};
use crate::xds::cluster::{process_endpoints, ClusterBuild, UpstreamCerts};
use crate::xds::discovery::ServiceDiscoveryRegistry;
use crate::xds::filters::http::lua::InterceptorFlow;
use crate::xds::route::{create_routes, RouteCreateParams};
use crate::xds::GeneratedResources;

const REQUEST_INTERCEPTOR_PREFIX: &str = "reqInterceptor";
const RESPONSE_INTERCEPTOR_PREFIX: &str = "respInterceptor";
const WS_UPGRADE_METHOD: &str = "GET";

/// Per-run inputs shared by every API compiled for a vhost
#[derive(Debug, Clone, Copy)]
pub struct GeneratorContext<'a> {
    pub settings: &'a EnvoySettings,
    pub vhost: &'a str,
    pub organization_id: &'a str,
    /// Trusted certificates of the API's backends, keyed by endpoint URL or `default`
    pub upstream_certs: &'a UpstreamCerts,
    pub interceptor_certs: &'a UpstreamCerts,
    pub registry: &'a ServiceDiscoveryRegistry,
}

/// Deterministic cluster name. Spaces are removed from the title and resource id.
pub fn cluster_name(
    prefix: &str,
    organization_id: &str,
    vhost: &str,
    title: &str,
    version: &str,
    resource_id: Option<&str>,
) -> String {
    let base = format!("{}_{}_{}_{}{}", prefix, organization_id, vhost, title.replace(' ', ""), version);
    let base = base.trim();
    match resource_id.filter(|id| !id.is_empty()) {
        Some(id) => format!("{}_{}0", base, id.replace(' ', "")),
        None => base.to_string(),
    }
}

/// Whether sandbox traffic needs its own cluster: no production cluster, or the first sandbox
/// endpoint differs in host, port or discovery query.
pub fn is_sandbox_cluster_required(
    production: Option<&EndpointCluster>,
    sandbox: Option<&EndpointCluster>,
) -> bool {
    let Some(production) = production.and_then(EndpointCluster::first) else {
        return true;
    };
    match sandbox.and_then(EndpointCluster::first) {
        Some(sandbox) => {
            production.host != sandbox.host
                || production.port != sandbox.port
                || production.service_discovery_query != sandbox.service_discovery_query
        }
        None => false,
    }
}

fn non_empty(cluster: Option<&EndpointCluster>) -> Option<&EndpointCluster> {
    cluster.filter(|cluster| !cluster.endpoints.is_empty())
}

fn is_named_reference(cluster: &EndpointCluster) -> bool {
    cluster.prefix.contains(NAMED_CLUSTER_SUFFIX)
}

/// Clusters and basepath chosen for the API as a whole
#[derive(Debug, Default)]
struct ApiClusters<'a> {
    basepath: String,
    prod_name: String,
    sand_name: String,
    prod: Option<&'a EndpointCluster>,
    sand: Option<&'a EndpointCluster>,
    /// `x-wso2-endpoints` clusters exist; every cluster must then share the API basepath
    strict_basepath: bool,
}

/// Clusters chosen for one resource
#[derive(Debug)]
struct ResourceClusters<'a> {
    basepath: String,
    prod_name: String,
    sand_name: String,
    prod: Option<&'a EndpointCluster>,
    sand: Option<&'a EndpointCluster>,
    own_sandbox: bool,
}

impl ResourceClusters<'_> {
    fn timeout_millis(&self) -> Option<u64> {
        self.prod
            .and_then(EndpointCluster::timeout_millis)
            .or_else(|| self.sand.and_then(EndpointCluster::timeout_millis))
    }

    fn retry_enabled(&self) -> bool {
        self.prod.and_then(EndpointCluster::retry).is_some()
            || self.sand.and_then(EndpointCluster::retry).is_some()
    }
}

struct Generator<'a, 'c> {
    api: &'a Api,
    ctx: &'c GeneratorContext<'c>,
    out: GeneratedResources,
}

impl<'a, 'c> Generator<'a, 'c> {
    fn name(&self, prefix: &str, resource_id: Option<&str>) -> String {
        cluster_name(
            prefix,
            self.ctx.organization_id,
            self.ctx.vhost,
            &self.api.title,
            &self.api.version,
            resource_id,
        )
    }

    fn build_cluster(&mut self, name: &str, endpoints: &EndpointCluster, basepath: &str) -> Result<()> {
        let build = ClusterBuild {
            name,
            endpoints,
            basepath,
            http2: self.api.http2_backend_enabled,
            connect_timeout_seconds: self.ctx.settings.cluster_timeout_seconds,
            certs: self.ctx.upstream_certs,
        };
        let built = process_endpoints(&build, self.ctx.settings, self.ctx.registry)?;
        self.out.push_cluster(built);
        Ok(())
    }

    fn build_interceptor_cluster(&mut self, interceptor: &InterceptEndpoint) -> Result<()> {
        let basepath = interceptor.cluster.basepath();
        let build = ClusterBuild {
            name: &interceptor.cluster_name,
            endpoints: &interceptor.cluster,
            basepath: &basepath,
            http2: false,
            connect_timeout_seconds: interceptor.cluster_timeout_seconds,
            certs: self.ctx.interceptor_certs,
        };
        debug!(cluster = %interceptor.cluster_name, "Creating interceptor cluster");
        let built = process_endpoints(&build, self.ctx.settings, self.ctx.registry)?;
        self.out.push_cluster(built);
        Ok(())
    }

    fn api_clusters(&mut self) -> ApiClusters<'a> {
        let api = self.api;
        let mut clusters = ApiClusters::default();

        match non_empty(api.production_endpoints.as_ref()) {
            Some(prod) => {
                clusters.basepath = prod.basepath();
                clusters.prod = Some(prod);
                clusters.prod_name = self.name(&prod.prefix, None);
                if !is_named_reference(prod) {
                    let name = clusters.prod_name.clone();
                    if let Err(err) = self.build_cluster(&name, prod, &clusters.basepath) {
                        error!(
                            error_code = codes::API_LEVEL_CLUSTER_FAILED,
                            api = %api.title,
                            error = %err,
                            "Error while adding api level production endpoints"
                        );
                        clusters.prod_name.clear();
                    }
                }
            }
            None => warn!(api = %api.title, version = %api.version, "API level production endpoints are not defined"),
        }

        match non_empty(api.sandbox_endpoints.as_ref()) {
            Some(sand) => {
                if clusters.basepath.is_empty() && clusters.prod_name.is_empty() {
                    clusters.basepath = sand.basepath();
                }
                if sand.basepath() != clusters.basepath {
                    warn!(
                        api = %api.title,
                        production_basepath = %clusters.basepath,
                        sandbox_basepath = %sand.basepath(),
                        "API level sandbox endpoint basepath differs from production, sandbox endpoints skipped"
                    );
                } else {
                    clusters.sand = Some(sand);
                    clusters.sand_name = clusters.prod_name.clone();
                    if is_sandbox_cluster_required(clusters.prod, Some(sand)) {
                        clusters.sand_name = self.name(&sand.prefix, None);
                        if !is_named_reference(sand) {
                            let name = clusters.sand_name.clone();
                            if let Err(err) = self.build_cluster(&name, sand, &clusters.basepath) {
                                error!(
                                    error_code = codes::API_LEVEL_CLUSTER_FAILED,
                                    api = %api.title,
                                    error = %err,
                                    "Error while adding api level sandbox endpoints"
                                );
                                clusters.sand_name.clear();
                            }
                        }
                    }
                }
            }
            None => debug!(api = %api.title, "API level sandbox endpoints are not defined"),
        }

        for (endpoint_name, named) in &api.named_endpoints {
            if clusters.basepath.is_empty() && clusters.prod_name.is_empty() {
                clusters.basepath = named.basepath();
            }
            let name = self.name(&named.prefix, None);
            let basepath = clusters.basepath.clone();
            match self.build_cluster(&name, named, &basepath) {
                Ok(()) => clusters.strict_basepath = true,
                Err(err) => error!(
                    api = %api.title,
                    endpoint = %endpoint_name,
                    error = %err,
                    "Error while adding x-wso2-endpoints cluster"
                ),
            }
        }

        clusters
    }

    /// Build an API level interceptor cluster; `None` when it cannot be built.
    fn api_interceptor(&mut self, interceptor: Option<&InterceptEndpoint>, prefix: &str) -> Option<InterceptEndpoint> {
        let mut interceptor = interceptor.filter(|interceptor| interceptor.enabled)?.clone();
        interceptor.cluster_name = self.name(prefix, None);
        match self.build_interceptor_cluster(&interceptor) {
            Ok(()) => Some(interceptor),
            Err(err) => {
                error!(api = %self.api.title, cluster = %interceptor.cluster_name, error = %err, "Error while adding api level interceptor cluster");
                None
            }
        }
    }

    /// Resolve and build an interceptor declared under `key` of a resource or operation.
    fn scoped_interceptor(
        &mut self,
        extensions: &crate::model::ExtensionBag,
        key: &str,
        prefix: &str,
        scope_id: &str,
    ) -> Option<InterceptEndpoint> {
        let resolved = extensions
            .resolve_interceptor(key, self.ctx.settings.cluster_timeout_seconds)
            .inspect_err(|err| {
                error!(api = %self.api.title, extension = key, scope = %scope_id, error = %err, "Invalid interceptor extension");
            })
            .ok()
            .flatten()?;
        let mut interceptor = resolved;
        interceptor.cluster_name = self.name(prefix, Some(scope_id));
        match self.build_interceptor_cluster(&interceptor) {
            Ok(()) => Some(interceptor),
            Err(err) => {
                error!(api = %self.api.title, cluster = %interceptor.cluster_name, error = %err, "Error while adding interceptor cluster");
                None
            }
        }
    }

    /// Interceptor per method of `resource`: operation level, else resource level, else API level.
    fn interceptor_flow(
        &mut self,
        resource: &Resource,
        api_level: Option<&InterceptEndpoint>,
        key: &str,
        prefix: &str,
    ) -> InterceptorFlow {
        let resource_level = self
            .scoped_interceptor(&resource.extensions, key, prefix, &resource.uuid)
            .or_else(|| api_level.cloned());

        let mut flow = InterceptorFlow::new();
        for operation in &resource.operations {
            let chosen = self
                .scoped_interceptor(&operation.extensions, key, prefix, &operation.uuid)
                .or_else(|| resource_level.clone());
            if let Some(interceptor) = chosen.filter(|interceptor| interceptor.enabled) {
                flow.insert(operation.method.clone(), interceptor);
            }
        }
        flow
    }

    fn resource_clusters(&mut self, resource: &'a Resource, api: &ApiClusters<'a>) -> ResourceClusters<'a> {
        let mut clusters = ResourceClusters {
            basepath: api.basepath.clone(),
            prod_name: api.prod_name.clone(),
            sand_name: api.sand_name.clone(),
            prod: api.prod,
            sand: api.sand,
            own_sandbox: false,
        };

        if let Some(prod) = non_empty(resource.production_endpoints.as_ref()) {
            let basepath = if api.strict_basepath { api.basepath.clone() } else { prod.basepath() };
            if is_named_reference(prod) {
                clusters.prod_name = self.name(&prod.prefix, None);
                clusters.basepath = basepath;
                clusters.prod = Some(prod);
            } else {
                let name = self.name(&prod.prefix, Some(&resource.uuid));
                match self.build_cluster(&name, prod, &basepath) {
                    Ok(()) => {
                        clusters.prod_name = name;
                        clusters.basepath = basepath;
                        clusters.prod = Some(prod);
                    }
                    Err(err) => error!(
                        error_code = codes::RESOURCE_LEVEL_CLUSTER_FAILED,
                        api = %self.api.title,
                        resource = %resource.path,
                        error = %err,
                        "Error while adding resource level production endpoints"
                    ),
                }
            }
        }
        if clusters.prod_name.is_empty() {
            warn!(api = %self.api.title, resource = %resource.path, "Production endpoints are not available for the resource");
        }

        if let Some(sand) = non_empty(resource.sandbox_endpoints.as_ref()) {
            if sand.basepath() != clusters.basepath {
                warn!(
                    api = %self.api.title,
                    resource = %resource.path,
                    production_basepath = %clusters.basepath,
                    sandbox_basepath = %sand.basepath(),
                    "Resource level sandbox endpoint basepath differs from production, sandbox endpoints skipped"
                );
            } else if !is_sandbox_cluster_required(resource.production_endpoints.as_ref(), Some(sand)) {
                clusters.sand_name = clusters.prod_name.clone();
                clusters.sand = Some(sand);
            } else if is_named_reference(sand) {
                clusters.sand_name = self.name(&sand.prefix, None);
                clusters.sand = Some(sand);
                clusters.own_sandbox = true;
            } else {
                let name = self.name(&sand.prefix, Some(&resource.uuid));
                let basepath = clusters.basepath.clone();
                match self.build_cluster(&name, sand, &basepath) {
                    Ok(()) => {
                        clusters.sand_name = name;
                        clusters.sand = Some(sand);
                        clusters.own_sandbox = true;
                    }
                    Err(err) => error!(
                        error_code = codes::RESOURCE_LEVEL_CLUSTER_FAILED,
                        api = %self.api.title,
                        resource = %resource.path,
                        error = %err,
                        "Error while adding resource level sandbox endpoints"
                    ),
                }
            }
        }

        // An API level sandbox cluster only serves resources routed on the API level basepath.
        if !clusters.own_sandbox
            && !clusters.sand_name.is_empty()
            && clusters.sand_name == api.sand_name
            && clusters.basepath != api.basepath
        {
            warn!(
                api = %self.api.title,
                resource = %resource.path,
                production_basepath = %clusters.basepath,
                sandbox_basepath = %api.basepath,
                "Sandbox endpoint basepath mismatched for the resource, sandbox routing disabled"
            );
            clusters.sand_name.clear();
            clusters.sand = None;
        }

        clusters
    }

    fn route_params<'r>(
        &self,
        resource: Option<&'r Resource>,
        basepath: &str,
        prod_name: &str,
        sand_name: &str,
    ) -> RouteCreateParams<'r> {
        RouteCreateParams {
            organization_id: self.ctx.organization_id.to_string(),
            title: self.api.title.clone(),
            version: self.api.version.clone(),
            kind: self.api.kind,
            vhost: self.ctx.vhost.to_string(),
            x_wso2_basepath: self.api.x_wso2_basepath.clone(),
            endpoint_basepath: basepath.to_string(),
            resource,
            prod_cluster_name: prod_name.to_string(),
            sand_cluster_name: sand_name.to_string(),
            cors: self.api.cors.clone(),
            pass_request_payload: self.api.pass_request_payload,
            is_default_version: self.api.is_default_version,
            ..Default::default()
        }
    }

    /// Routes of `params`, or none when they cannot be created; the failure is logged and the
    /// remaining resources are still routed.
    fn resource_routes(&mut self, params: &RouteCreateParams<'_>) {
        match create_routes(params, self.ctx.settings) {
            Ok(routes) => self.out.routes.extend(routes),
            Err(err) => error!(
                error_code = codes::ROUTE_GENERATION_FAILED,
                api = %self.api.title,
                version = %self.api.version,
                kind = %self.api.kind,
                resource = %params.resource_path(),
                sandbox = params.is_sandbox,
                error = %err,
                "Error while creating routes, resource skipped"
            ),
        }
    }

    fn api_level_routes(&mut self, api: &ApiClusters<'a>) {
        let mut timeout = api.prod.and_then(EndpointCluster::timeout_millis);
        if timeout.is_none() {
            timeout = api.sand.and_then(EndpointCluster::timeout_millis);
        }
        let retry_enabled = api.prod.and_then(EndpointCluster::retry).is_some()
            || api.sand.and_then(EndpointCluster::retry).is_some();

        let model = self.api;
        // Websocket clients may also connect on the API context itself.
        let context_root = (model.kind == ApiKind::Ws
            && !model.resources.iter().any(|resource| resource.path.trim_matches('/').is_empty()))
        .then(|| Resource::new("", vec![Operation::new(WS_UPGRADE_METHOD)], ExtensionBag::new()));

        let targets: Vec<Option<&Resource>> = match model.kind {
            ApiKind::GraphQl => vec![None],
            _ => model.resources.iter().chain(context_root.as_ref()).map(Some).collect(),
        };

        for resource in targets {
            let mut params = self.route_params(resource, &api.basepath, &api.prod_name, &api.sand_name);
            params.timeout_millis = timeout;
            params.retry_enabled = retry_enabled;
            self.resource_routes(&params);
        }
    }

    fn run(mut self) -> GeneratedResources {
        let api_clusters = self.api_clusters();

        let api_request = self.api_interceptor(self.api.request_interceptor.as_ref(), REQUEST_INTERCEPTOR_PREFIX);
        let api_response = self.api_interceptor(self.api.response_interceptor.as_ref(), RESPONSE_INTERCEPTOR_PREFIX);

        // Websocket and GraphQL APIs route on API level clusters only, without interceptors.
        if matches!(self.api.kind, ApiKind::Ws | ApiKind::GraphQl) {
            self.api_level_routes(&api_clusters);
            return self.out;
        }

        let api = self.api;
        for resource in &api.resources {
            let clusters = self.resource_clusters(resource, &api_clusters);
            let request_flow =
                self.interceptor_flow(resource, api_request.as_ref(), X_WSO2_REQUEST_INTERCEPTOR, REQUEST_INTERCEPTOR_PREFIX);
            let response_flow =
                self.interceptor_flow(resource, api_response.as_ref(), X_WSO2_RESPONSE_INTERCEPTOR, RESPONSE_INTERCEPTOR_PREFIX);

            let mut params =
                self.route_params(Some(resource), &clusters.basepath, &clusters.prod_name, &clusters.sand_name);
            params.timeout_millis = clusters.timeout_millis();
            params.retry_enabled = clusters.retry_enabled();
            params.request_interceptors = request_flow;
            params.response_interceptors = response_flow;

            // Sandbox routes go first so the cluster header match wins.
            if clusters.own_sandbox {
                self.resource_routes(&RouteCreateParams { is_sandbox: true, ..params.clone() });
            }
            self.resource_routes(&params);
        }

        self.out
    }
}

/// Generate the routes, clusters and endpoints of `api` for the context's vhost.
///
/// Cluster failures fall back to the next level up, and a resource whose routes cannot be created
/// is skipped; both are logged with their error code and the rest of the API is still generated.
pub fn create_routes_with_clusters(api: &Api, ctx: &GeneratorContext<'_>) -> Result<GeneratedResources> {
    let span = generator_span!(api.title, ctx.vhost, version = %api.version);
    let _guard = span.enter();

    let generated = Generator { api, ctx, out: GeneratedResources::default() }.run();
    debug!(
        routes = generated.routes.len(),
        clusters = generated.clusters.len(),
        "Generated resources for API"
    );
    Ok(generated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::extensions::{PRODUCTION_CLUSTER_PREFIX, SANDBOX_CLUSTER_PREFIX};
    use crate::model::{build_endpoint_cluster, EndpointConfig, EndpointStrategy, ExtensionBag, Operation};
    use crate::xds::route::CLUSTER_HEADER_NAME;
    use envoy_types::pb::envoy::config::route::v3::{route::Action, route_action::ClusterSpecifier};

    fn cluster(prefix: &str, urls: &[&str]) -> EndpointCluster {
        let urls: Vec<String> = urls.iter().map(|url| url.to_string()).collect();
        build_endpoint_cluster(prefix, &urls, EndpointStrategy::LoadBalance, ApiKind::Http, false)
            .expect("valid urls")
            .expect("cluster")
    }

    fn pet_api() -> Api {
        let mut api = Api::new(ApiKind::Http);
        api.title = "Pet Store".into();
        api.version = "1.0.0".into();
        api.x_wso2_basepath = "/petstore".into();
        api.production_endpoints = Some(cluster(PRODUCTION_CLUSTER_PREFIX, &["http://pets.prod:8080/v2"]));
        api.resources = vec![
            Resource::new("/pets", vec![Operation::new("get")], ExtensionBag::new()),
            Resource::new("/pets/{id}", vec![Operation::new("get"), Operation::new("delete")], ExtensionBag::new()),
        ];
        api
    }

    fn generate(api: &Api) -> GeneratedResources {
        let settings = EnvoySettings::default();
        let certs = UpstreamCerts::new();
        let registry = ServiceDiscoveryRegistry::new();
        let ctx = GeneratorContext {
            settings: &settings,
            vhost: "localhost",
            organization_id: "carbon.super",
            upstream_certs: &certs,
            interceptor_certs: &certs,
            registry: &registry,
        };
        create_routes_with_clusters(api, &ctx).expect("generated")
    }

    fn cluster_specifier(route: &envoy_types::pb::envoy::config::route::v3::Route) -> &ClusterSpecifier {
        match route.action.as_ref() {
            Some(Action::Route(action)) => action.cluster_specifier.as_ref().expect("cluster specifier"),
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn cluster_names_strip_spaces() {
        assert_eq!(
            cluster_name("clusterProd", "org", "localhost", "Pet Store", "1.0.0", None),
            "clusterProd_org_localhost_PetStore1.0.0"
        );
        assert_eq!(
            cluster_name("clusterSand", "org", "localhost", "Pet Store", "1.0.0", Some("res 1")),
            "clusterSand_org_localhost_PetStore1.0.0_res10"
        );
    }

    #[test]
    fn sandbox_cluster_required_only_for_distinct_upstreams() {
        let prod = cluster(PRODUCTION_CLUSTER_PREFIX, &["http://pets.prod:8080/v2"]);
        let same = cluster(SANDBOX_CLUSTER_PREFIX, &["http://pets.prod:8080/v2"]);
        let other_port = cluster(SANDBOX_CLUSTER_PREFIX, &["http://pets.prod:9090/v2"]);

        assert!(is_sandbox_cluster_required(None, Some(&same)));
        assert!(!is_sandbox_cluster_required(Some(&prod), Some(&same)));
        assert!(is_sandbox_cluster_required(Some(&prod), Some(&other_port)));
        assert!(!is_sandbox_cluster_required(Some(&prod), None));
    }

    #[test]
    fn api_level_prod_cluster_routes_every_resource() {
        let generated = generate(&pet_api());

        assert_eq!(generated.cluster_names(), vec!["clusterProd_carbon.super_localhost_PetStore1.0.0"]);
        assert_eq!(generated.routes.len(), 2);
        for route in &generated.routes {
            assert_eq!(
                cluster_specifier(route),
                &ClusterSpecifier::Cluster("clusterProd_carbon.super_localhost_PetStore1.0.0".into())
            );
        }
    }

    #[test]
    fn distinct_sandbox_routes_by_cluster_header() {
        let mut api = pet_api();
        api.sandbox_endpoints = Some(cluster(SANDBOX_CLUSTER_PREFIX, &["http://pets.sand:8080/v2"]));
        let generated = generate(&api);

        assert_eq!(generated.clusters.len(), 2);
        assert!(generated
            .routes
            .iter()
            .all(|route| cluster_specifier(route) == &ClusterSpecifier::ClusterHeader(CLUSTER_HEADER_NAME.into())));
    }

    #[test]
    fn api_sandbox_with_different_basepath_is_skipped() {
        let mut api = pet_api();
        api.sandbox_endpoints = Some(cluster(SANDBOX_CLUSTER_PREFIX, &["http://pets.sand:8080/other"]));
        let generated = generate(&api);

        assert_eq!(generated.clusters.len(), 1);
        assert!(matches!(cluster_specifier(&generated.routes[0]), ClusterSpecifier::Cluster(_)));
    }

    #[test]
    fn resource_sandbox_with_different_basepath_keeps_production_route() {
        let mut api = pet_api();
        api.resources[0].sandbox_endpoints = Some(cluster(SANDBOX_CLUSTER_PREFIX, &["http://pets.sand:8080/other"]));
        let generated = generate(&api);

        assert_eq!(generated.clusters.len(), 1);
        assert_eq!(generated.routes.len(), 2);
    }

    #[test]
    fn resource_sandbox_routes_precede_production_routes() {
        let mut api = pet_api();
        api.resources[0].sandbox_endpoints = Some(cluster(SANDBOX_CLUSTER_PREFIX, &["http://pets.sand:8080/v2"]));
        let resource_id = api.resources[0].uuid.clone();
        let generated = generate(&api);

        let sandbox_name = format!("clusterSand_carbon.super_localhost_PetStore1.0.0_{}0", resource_id);
        assert!(generated.cluster_names().contains(&sandbox_name.as_str()));
        // sandbox + production route for the first resource, one route for the second
        assert_eq!(generated.routes.len(), 3);
        let headers = &generated.routes[0].r#match.as_ref().expect("match").headers;
        assert!(headers.iter().any(|header| header.name == CLUSTER_HEADER_NAME));
        let headers = &generated.routes[1].r#match.as_ref().expect("match").headers;
        assert!(headers.iter().all(|header| header.name != CLUSTER_HEADER_NAME));
    }

    #[test]
    fn failing_resource_cluster_falls_back_to_api_cluster() {
        let mut api = pet_api();
        api.named_endpoints.insert(
            "shared".into(),
            cluster("shared_xwso2cluster", &["http://pets.shared:8080/v2"]),
        );
        // strict basepath: a resource cluster on another basepath cannot be built
        api.resources[0].production_endpoints = Some(cluster(PRODUCTION_CLUSTER_PREFIX, &["http://pets.res:8080/v3"]));
        let generated = generate(&api);

        assert_eq!(generated.clusters.len(), 2);
        assert_eq!(
            cluster_specifier(&generated.routes[0]),
            &ClusterSpecifier::Cluster("clusterProd_carbon.super_localhost_PetStore1.0.0".into())
        );
    }

    #[test]
    fn resource_cluster_overrides_api_cluster() {
        let mut api = pet_api();
        let mut resource_cluster = cluster(PRODUCTION_CLUSTER_PREFIX, &["http://pets.res:8080/v3"]);
        resource_cluster.config = Some(EndpointConfig { timeout_millis: Some(5000), ..Default::default() });
        api.resources[1].production_endpoints = Some(resource_cluster);
        let resource_id = api.resources[1].uuid.clone();
        let generated = generate(&api);

        let expected = format!("clusterProd_carbon.super_localhost_PetStore1.0.0_{}0", resource_id);
        assert_eq!(cluster_specifier(&generated.routes[1]), &ClusterSpecifier::Cluster(expected));
    }

    #[test]
    fn graphql_api_gets_single_route() {
        let mut api = pet_api();
        api.kind = ApiKind::GraphQl;
        let generated = generate(&api);
        assert_eq!(generated.routes.len(), 1);
    }

    #[test]
    fn interceptor_clusters_follow_operation_then_resource_then_api() {
        let mut api = pet_api();
        api.request_interceptor = ExtensionBag::from_vendor_keys(&serde_json::json!({
            "x-wso2-request-interceptor": {"serviceURL": "http://interceptor:9081", "includes": ["request_headers"]}
        }))
        .resolve_interceptor(X_WSO2_REQUEST_INTERCEPTOR, 20)
        .expect("interceptor");
        api.resources[0].operations[0].extensions = ExtensionBag::from_vendor_keys(&serde_json::json!({
            "x-wso2-request-interceptor": {"serviceURL": "http://op-interceptor:9082"}
        }));
        let operation_id = api.resources[0].operations[0].uuid.clone();
        let generated = generate(&api);

        let names = generated.cluster_names();
        assert!(names.contains(&"reqInterceptor_carbon.super_localhost_PetStore1.0.0"));
        let operation_cluster = format!("reqInterceptor_carbon.super_localhost_PetStore1.0.0_{}0", operation_id);
        assert!(names.contains(&operation_cluster.as_str()));
        assert_eq!(names.len(), 3);
    }
}
