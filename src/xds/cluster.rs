//! Upstream clusters and their load assignments.
//!
//! One cluster is built per endpoint cluster of the model. Each endpoint gets its own locality so
//! failover endpoints can carry increasing priorities; secure endpoints are paired with a
//! transport socket through `lb_id` metadata.

use std::collections::HashMap;

use envoy_types::pb::envoy::config::cluster::v3::circuit_breakers::Thresholds;
use envoy_types::pb::envoy::config::cluster::v3::cluster::{
    ClusterDiscoveryType, DiscoveryType, DnsLookupFamily, LbPolicy, TransportSocketMatch,
};
use envoy_types::pb::envoy::config::cluster::v3::{CircuitBreakers, Cluster};
use envoy_types::pb::envoy::config::core::v3::{
    address,
    health_check::{HealthChecker, TcpHealthCheck},
    socket_address::PortSpecifier,
    transport_socket, Address, HealthCheck, Http1ProtocolOptions, Http2ProtocolOptions, Metadata,
    SocketAddress, TransportSocket,
};
use envoy_types::pb::envoy::config::endpoint::v3::{
    lb_endpoint::HostIdentifier, ClusterLoadAssignment, Endpoint as EnvoyEndpoint, LbEndpoint,
    LocalityLbEndpoints,
};
use envoy_types::pb::envoy::extensions::upstreams::http::v3::http_protocol_options::{
    explicit_http_config::ProtocolConfig, ExplicitHttpConfig, UpstreamProtocolOptions,
};
use envoy_types::pb::envoy::extensions::upstreams::http::v3::HttpProtocolOptions;
use envoy_types::pb::google::protobuf::{value::Kind, Any, Struct, UInt32Value, Value};
use prost::Message;
use tracing::{debug, error};

use crate::config::EnvoySettings;
use crate::errors::{Error, Result};
use crate::model::{CircuitBreakers as CircuitBreakerConfig, EndpointCluster, EndpointStrategy};
use crate::xds::discovery::ServiceDiscoveryRegistry;
use crate::xds::resources::{
    millis_to_duration, seconds_to_duration, uint32, HTTP_PROTOCOL_OPTIONS_TYPE_URL,
};
use crate::xds::tls::{upstream_tls_context, TLS_TRANSPORT_SOCKET_NAME, UPSTREAM_TLS_CONTEXT_TYPE_URL};

const HTTP_PROTOCOL_OPTIONS_KEY: &str = "envoy.extensions.upstreams.http.v3.HttpProtocolOptions";
const TRANSPORT_SOCKET_MATCH_KEY: &str = "envoy.transport_socket_match";
const LB_ID: &str = "lb_id";
/// Key of the certificate trusted for endpoints without a mapped one
pub const DEFAULT_CERT_KEY: &str = "default";

/// Trusted certificates bundled with an API, keyed by endpoint URL or `default`
pub type UpstreamCerts = HashMap<String, Vec<u8>>;

/// Inputs for one upstream cluster
#[derive(Debug, Clone, Copy)]
pub struct ClusterBuild<'a> {
    pub name: &'a str,
    pub endpoints: &'a EndpointCluster,
    /// Basepath every endpoint of the cluster must share
    pub basepath: &'a str,
    pub http2: bool,
    pub connect_timeout_seconds: u64,
    pub certs: &'a UpstreamCerts,
}

fn string_value(value: impl Into<String>) -> Value {
    Value { kind: Some(Kind::StringValue(value.into())) }
}

fn lb_id_struct(index: usize) -> Struct {
    Struct { fields: HashMap::from([(LB_ID.to_string(), string_value(index.to_string()))]) }
}

fn socket_address(host: &str, port: u32) -> Address {
    Address {
        address: Some(address::Address::SocketAddress(SocketAddress {
            address: host.to_string(),
            port_specifier: Some(PortSpecifier::PortValue(port)),
            ..Default::default()
        })),
    }
}

fn trusted_cert<'a>(certs: &'a UpstreamCerts, raw_url: &str) -> Option<&'a [u8]> {
    certs.get(raw_url).or_else(|| certs.get(DEFAULT_CERT_KEY)).map(Vec::as_slice)
}

/// Upstream HTTP protocol options: HTTP/1.1 unless the API enables HTTP/2 backends.
fn http_protocol_options(http2: bool, settings: &EnvoySettings) -> HashMap<String, Any> {
    let protocol_config = if http2 {
        let http2_settings = &settings.upstream.http2;
        ProtocolConfig::Http2ProtocolOptions(Http2ProtocolOptions {
            hpack_table_size: Some(UInt32Value { value: http2_settings.hpack_table_size }),
            max_concurrent_streams: Some(UInt32Value { value: http2_settings.max_concurrent_streams }),
            ..Default::default()
        })
    } else {
        ProtocolConfig::HttpProtocolOptions(Http1ProtocolOptions::default())
    };

    let options = HttpProtocolOptions {
        upstream_protocol_options: Some(UpstreamProtocolOptions::ExplicitHttpConfig(
            ExplicitHttpConfig { protocol_config: Some(protocol_config) },
        )),
        ..Default::default()
    };

    HashMap::from([(
        HTTP_PROTOCOL_OPTIONS_KEY.to_string(),
        Any { type_url: HTTP_PROTOCOL_OPTIONS_TYPE_URL.to_string(), value: options.encode_to_vec() },
    )])
}

fn tcp_health_check(settings: &EnvoySettings) -> HealthCheck {
    let health = &settings.upstream.health;
    HealthCheck {
        timeout: Some(seconds_to_duration(health.timeout_seconds)),
        interval: Some(seconds_to_duration(health.interval_seconds)),
        unhealthy_threshold: uint32(Some(health.unhealthy_threshold)),
        healthy_threshold: uint32(Some(health.healthy_threshold)),
        health_checker: Some(HealthChecker::TcpHealthCheck(TcpHealthCheck::default())),
        ..Default::default()
    }
}

/// Circuit breaker thresholds; only positive limits are set.
fn circuit_breakers(config: &CircuitBreakerConfig) -> Option<CircuitBreakers> {
    let positive = |value: i64| u32::try_from(value).ok().filter(|value| *value > 0);
    let thresholds = Thresholds {
        max_connections: uint32(positive(config.max_connections)),
        max_requests: uint32(positive(config.max_requests)),
        max_pending_requests: uint32(positive(config.max_pending_requests)),
        max_retries: uint32(positive(config.max_retries)),
        max_connection_pools: uint32(positive(config.max_connection_pools)),
        ..Default::default()
    };

    if thresholds == Thresholds::default() {
        return None;
    }
    Some(CircuitBreakers { thresholds: vec![thresholds], ..Default::default() })
}

/// Build the cluster and load assignment for one endpoint cluster.
///
/// Every endpoint must carry `basepath`; a mismatch fails the whole cluster.
#[allow(deprecated)]
pub fn process_endpoints(
    build: &ClusterBuild<'_>,
    settings: &EnvoySettings,
    registry: &ServiceDiscoveryRegistry,
) -> Result<(Cluster, ClusterLoadAssignment)> {
    let endpoints = &build.endpoints.endpoints;
    if endpoints.is_empty() {
        return Err(Error::endpoint_resolution(build.name, "no endpoints provided"));
    }

    let mut localities = Vec::with_capacity(endpoints.len());
    let mut socket_matches = Vec::new();
    let mut priority = 0u32;
    let mut discovery_queries = Vec::new();

    for (index, endpoint) in endpoints.iter().enumerate() {
        let endpoint_basepath = endpoint.basepath.trim_end_matches('/');
        if endpoint_basepath != build.basepath.trim_end_matches('/') {
            error!(
                cluster = %build.name,
                endpoint = %endpoint.raw_url,
                expected = %build.basepath,
                found = %endpoint_basepath,
                "Endpoint basepath mismatched"
            );
            return Err(Error::endpoint_resolution(
                build.name,
                format!(
                    "endpoint basepath mismatched for {}. expected : {} but found : {}",
                    endpoint.raw_url, build.basepath, endpoint_basepath
                ),
            ));
        }

        let mut lb_endpoint = LbEndpoint {
            host_identifier: Some(HostIdentifier::Endpoint(EnvoyEndpoint {
                address: Some(socket_address(&endpoint.host, endpoint.port)),
                ..Default::default()
            })),
            ..Default::default()
        };

        if endpoint.url_type.is_secure() {
            let tls = upstream_tls_context(
                trusted_cert(build.certs, &endpoint.raw_url),
                &endpoint.host,
                build.http2,
                settings,
            );
            socket_matches.push(TransportSocketMatch {
                name: format!("ts{}", index),
                r#match: Some(lb_id_struct(index)),
                transport_socket: Some(TransportSocket {
                    name: TLS_TRANSPORT_SOCKET_NAME.to_string(),
                    config_type: Some(transport_socket::ConfigType::TypedConfig(Any {
                        type_url: UPSTREAM_TLS_CONTEXT_TYPE_URL.to_string(),
                        value: tls.encode_to_vec(),
                    })),
                }),
                ..Default::default()
            });
            lb_endpoint.metadata = Some(Metadata {
                filter_metadata: HashMap::from([(
                    TRANSPORT_SOCKET_MATCH_KEY.to_string(),
                    lb_id_struct(index),
                )]),
                ..Default::default()
            });
        }

        if let Some(query) = &endpoint.service_discovery_query {
            discovery_queries.push(query.as_str());
        }

        localities.push(LocalityLbEndpoints {
            priority,
            lb_endpoints: vec![lb_endpoint],
            ..Default::default()
        });

        if build.endpoints.strategy == EndpointStrategy::Failover {
            priority += 1;
        }
    }

    let load_assignment = ClusterLoadAssignment {
        cluster_name: build.name.to_string(),
        endpoints: localities,
        ..Default::default()
    };

    let dns = &settings.upstream.dns;
    let mut cluster = Cluster {
        name: build.name.to_string(),
        cluster_discovery_type: Some(ClusterDiscoveryType::Type(DiscoveryType::StrictDns as i32)),
        connect_timeout: Some(seconds_to_duration(build.connect_timeout_seconds)),
        dns_lookup_family: DnsLookupFamily::V4Only as i32,
        lb_policy: LbPolicy::RoundRobin as i32,
        dns_refresh_rate: Some(millis_to_duration(dns.refresh_rate_millis)),
        respect_dns_ttl: dns.respect_dns_ttl,
        load_assignment: Some(load_assignment.clone()),
        transport_socket_matches: socket_matches,
        typed_extension_protocol_options: http_protocol_options(build.http2, settings),
        ..Default::default()
    };

    if endpoints.len() > 1 {
        cluster.health_checks = vec![tcp_health_check(settings)];
    }

    if let Some(breakers) = build
        .endpoints
        .config
        .as_ref()
        .and_then(|config| config.circuit_breakers.as_ref())
        .and_then(circuit_breakers)
    {
        cluster.circuit_breakers = Some(breakers);
    }

    for query in discovery_queries {
        registry.record(build.name, query);
    }

    debug!(
        cluster = %build.name,
        endpoints = endpoints.len(),
        strategy = ?build.endpoints.strategy,
        "Processed cluster endpoints"
    );

    Ok((cluster, load_assignment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{build_endpoint_cluster, ApiKind, EndpointConfig};

    fn endpoint_cluster(urls: &[&str], strategy: EndpointStrategy) -> EndpointCluster {
        let urls: Vec<String> = urls.iter().map(|url| url.to_string()).collect();
        build_endpoint_cluster("clusterProd", &urls, strategy, ApiKind::Http, true)
            .expect("cluster builds")
            .expect("cluster resolved")
    }

    fn build<'a>(name: &'a str, endpoints: &'a EndpointCluster, certs: &'a UpstreamCerts) -> ClusterBuild<'a> {
        ClusterBuild {
            name,
            endpoints,
            basepath: "/v2",
            http2: false,
            connect_timeout_seconds: 20,
            certs,
        }
    }

    #[test]
    fn failover_endpoints_get_increasing_priority() {
        let endpoints = endpoint_cluster(
            &["http://a.example.com/v2", "https://b.example.com/v2/", "http://c.example.com/v2"],
            EndpointStrategy::Failover,
        );
        let certs = UpstreamCerts::new();
        let (cluster, assignment) =
            process_endpoints(&build("c1", &endpoints, &certs), &EnvoySettings::default(), &ServiceDiscoveryRegistry::new())
                .expect("cluster");

        let priorities: Vec<u32> = assignment.endpoints.iter().map(|locality| locality.priority).collect();
        assert_eq!(priorities, vec![0, 1, 2]);
        assert_eq!(cluster.health_checks.len(), 1);
        assert_eq!(cluster.lb_policy, LbPolicy::RoundRobin as i32);
        assert_eq!(cluster.connect_timeout, Some(seconds_to_duration(20)));

        assert_eq!(cluster.transport_socket_matches.len(), 1);
        assert_eq!(cluster.transport_socket_matches[0].name, "ts1");
        let metadata = assignment.endpoints[1].lb_endpoints[0].metadata.as_ref().expect("metadata");
        assert!(metadata.filter_metadata.contains_key(TRANSPORT_SOCKET_MATCH_KEY));
        assert!(assignment.endpoints[0].lb_endpoints[0].metadata.is_none());
    }

    #[test]
    fn load_balanced_endpoints_share_priority() {
        let endpoints = endpoint_cluster(
            &["http://a.example.com/v2", "http://b.example.com/v2"],
            EndpointStrategy::LoadBalance,
        );
        let certs = UpstreamCerts::new();
        let (_, assignment) =
            process_endpoints(&build("c1", &endpoints, &certs), &EnvoySettings::default(), &ServiceDiscoveryRegistry::new())
                .expect("cluster");
        assert!(assignment.endpoints.iter().all(|locality| locality.priority == 0));
        assert_eq!(assignment.endpoints.len(), 2);
    }

    #[test]
    fn basepath_mismatch_fails_cluster() {
        let endpoints = endpoint_cluster(
            &["http://a.example.com/v2", "http://b.example.com/v3"],
            EndpointStrategy::LoadBalance,
        );
        let certs = UpstreamCerts::new();
        let err =
            process_endpoints(&build("c1", &endpoints, &certs), &EnvoySettings::default(), &ServiceDiscoveryRegistry::new())
                .unwrap_err();
        assert!(err.to_string().contains("endpoint basepath mismatched for http://b.example.com/v3"));
    }

    #[test]
    fn single_endpoint_has_no_health_check_and_positive_breakers_only() {
        let mut endpoints = endpoint_cluster(&["http://a.example.com/v2"], EndpointStrategy::LoadBalance);
        endpoints.config = Some(EndpointConfig {
            circuit_breakers: Some(CircuitBreakerConfig {
                max_connections: 100,
                max_requests: 0,
                max_pending_requests: -1,
                max_retries: 3,
                max_connection_pools: 0,
            }),
            ..Default::default()
        });
        let certs = UpstreamCerts::new();
        let (cluster, _) =
            process_endpoints(&build("c1", &endpoints, &certs), &EnvoySettings::default(), &ServiceDiscoveryRegistry::new())
                .expect("cluster");

        assert!(cluster.health_checks.is_empty());
        let thresholds = &cluster.circuit_breakers.expect("breakers").thresholds[0];
        assert_eq!(thresholds.max_connections, Some(UInt32Value { value: 100 }));
        assert_eq!(thresholds.max_retries, Some(UInt32Value { value: 3 }));
        assert!(thresholds.max_requests.is_none());
        assert!(thresholds.max_pending_requests.is_none());
    }

    #[test]
    fn discovery_query_is_recorded() {
        let endpoints = endpoint_cluster(
            &["consul(pets.[prod],http://a.example.com/v2)"],
            EndpointStrategy::LoadBalance,
        );
        let certs = UpstreamCerts::new();
        let registry = ServiceDiscoveryRegistry::new();
        process_endpoints(&build("c1", &endpoints, &certs), &EnvoySettings::default(), &registry)
            .expect("cluster");
        assert_eq!(registry.get("c1").as_deref(), Some("pets.[prod]"));
    }

    #[test]
    fn failed_cluster_records_no_discovery_query() {
        let endpoints = endpoint_cluster(
            &["consul(pets.[prod],http://a.example.com/v2)", "http://b.example.com/v3"],
            EndpointStrategy::LoadBalance,
        );
        let certs = UpstreamCerts::new();
        let registry = ServiceDiscoveryRegistry::new();
        let err = process_endpoints(&build("c1", &endpoints, &certs), &EnvoySettings::default(), &registry)
            .expect_err("basepath mismatch");
        assert!(matches!(err, Error::EndpointResolution { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn http2_switches_protocol_options() {
        let endpoints = endpoint_cluster(&["https://a.example.com/v2"], EndpointStrategy::LoadBalance);
        let certs = UpstreamCerts::from([("default".to_string(), b"pem".to_vec())]);
        let mut params = build("c1", &endpoints, &certs);
        params.http2 = true;
        let (cluster, _) =
            process_endpoints(&params, &EnvoySettings::default(), &ServiceDiscoveryRegistry::new())
                .expect("cluster");

        let any = cluster.typed_extension_protocol_options.get(HTTP_PROTOCOL_OPTIONS_KEY).expect("options");
        let options = HttpProtocolOptions::decode(any.value.as_slice()).expect("decode");
        match options.upstream_protocol_options {
            Some(UpstreamProtocolOptions::ExplicitHttpConfig(ExplicitHttpConfig {
                protocol_config: Some(ProtocolConfig::Http2ProtocolOptions(http2)),
            })) => assert_eq!(http2.hpack_table_size, Some(UInt32Value { value: 4096 })),
            other => panic!("unexpected protocol options {:?}", other),
        }
    }
}
