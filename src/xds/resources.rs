use envoy_types::pb::google::protobuf::{Any, Duration, UInt32Value};
use prost::Message;
use tracing::info;

pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
pub const ROUTE_TYPE_URL: &str = "type.googleapis.com/envoy.config.route.v3.Route";
pub const ENDPOINT_TYPE_URL: &str =
    "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";
pub const HTTP_PROTOCOL_OPTIONS_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.upstreams.http.v3.HttpProtocolOptions";

/// Wrapper for a built Envoy resource along with its name.
#[derive(Clone, Debug, PartialEq)]
pub struct BuiltResource {
    pub name: String,
    pub resource: Any,
}

impl BuiltResource {
    /// Encode `message` under `type_url`.
    pub fn encode<M: Message>(name: impl Into<String>, type_url: &str, message: &M) -> Self {
        let name = name.into();
        let encoded = message.encode_to_vec();
        info!(resource = %name, type_url, bytes = encoded.len(), "Created resource");
        Self { name, resource: Any { type_url: type_url.to_string(), value: encoded } }
    }

    pub fn into_any(self) -> Any {
        self.resource
    }

    pub fn type_url(&self) -> &str {
        &self.resource.type_url
    }
}

pub(crate) fn seconds_to_duration(value: u64) -> Duration {
    Duration { seconds: value as i64, nanos: 0 }
}

pub(crate) fn millis_to_duration(value: u64) -> Duration {
    Duration { seconds: (value / 1000) as i64, nanos: ((value % 1000) * 1_000_000) as i32 }
}

pub(crate) fn uint32(value: Option<u32>) -> Option<UInt32Value> {
    value.map(|v| UInt32Value { value: v })
}

#[cfg(test)]
mod tests {
    use super::*;
    use envoy_types::pb::envoy::config::cluster::v3::Cluster;

    #[test]
    fn built_resource_encodes_message() {
        let cluster = Cluster { name: "clusterProd_org_localhost_Pets1.0".into(), ..Default::default() };
        let built = BuiltResource::encode(cluster.name.clone(), CLUSTER_TYPE_URL, &cluster);

        assert_eq!(built.type_url(), CLUSTER_TYPE_URL);
        let decoded = Cluster::decode(built.into_any().value.as_slice()).expect("decode cluster");
        assert_eq!(decoded.name, "clusterProd_org_localhost_Pets1.0");
    }

    #[test]
    fn millis_keep_sub_second_precision() {
        assert_eq!(millis_to_duration(2500), Duration { seconds: 2, nanos: 500_000_000 });
        assert_eq!(seconds_to_duration(86400).seconds, 86400);
        assert_eq!(uint32(Some(3)), Some(UInt32Value { value: 3 }));
    }
}
