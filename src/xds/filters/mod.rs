//! Per-route HTTP filter configuration.
//!
//! Every generated route carries typed per-filter overrides for the gateway's ext_authz, Lua and
//! CORS filters. Filter modules convert the adapter's own configuration types into Envoy
//! protobuf messages packed as `Any`.

pub mod http;

use envoy_types::pb::google::protobuf::Any;
use prost::Message;

/// A protobuf message packed with its type URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedConfig {
    pub type_url: String,
    pub value: Vec<u8>,
}

impl TypedConfig {
    pub fn from_message<M: Message>(type_url: impl Into<String>, msg: &M) -> Self {
        Self { type_url: type_url.into(), value: msg.encode_to_vec() }
    }

    pub fn to_any(&self) -> Any {
        Any { type_url: self.type_url.clone(), value: self.value.clone() }
    }
}

/// Encode a prost message into an Envoy `Any`.
pub fn any_from_message<M: Message>(type_url: impl Into<String>, msg: &M) -> Any {
    TypedConfig::from_message(type_url, msg).to_any()
}

/// Configuration error raised while building a filter override
pub fn invalid_config(msg: impl Into<String>) -> crate::Error {
    crate::Error::config(msg.into())
}
