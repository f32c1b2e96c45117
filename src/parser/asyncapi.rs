//! AsyncAPI parsing for WebSocket APIs.
//!
//! Each channel becomes a resource with a single synthetic `GET` operation, since the gateway only
//! sees the upgrade request. Operation level vendor extensions come from the channel's `publish`
//! operation, or from `subscribe` when there is no `publish`.

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Error, Result};
use crate::model::{Api, ApiKind, ExtensionBag, Operation, Resource};
use crate::parser::openapi::string_at;

const UPGRADE_METHOD: &str = "GET";

/// Parse an AsyncAPI document into a WebSocket API.
pub fn parse_asyncapi(document: &Value) -> Result<Api> {
    let mut api = Api::new(ApiKind::Ws);
    if let Some(info) = document.get("info") {
        api.title = string_at(info, "title");
        api.version = string_at(info, "version");
        api.description = string_at(info, "description");
    }
    api.extensions = ExtensionBag::from_vendor_keys(document);

    let channels = match document.get("channels") {
        None => return Ok(api),
        Some(Value::Object(channels)) => channels,
        Some(_) => return Err(Error::malformed("asyncapi", "channels must be an object")),
    };

    for (name, channel) in channels {
        let publish = channel.get("publish");
        let subscribe = channel.get("subscribe");

        let source = match (publish, subscribe) {
            (Some(publish), Some(_)) => {
                warn!(
                    api = %api.title,
                    channel = %name,
                    "Both publish and subscribe are defined, using the extensions of publish"
                );
                publish
            }
            (Some(operation), None) | (None, Some(operation)) => operation,
            (None, None) => {
                warn!(api = %api.title, channel = %name, "Channel has no publish or subscribe operation, skipping");
                continue;
            }
        };

        let operation = Operation::with_extensions(UPGRADE_METHOD, ExtensionBag::from_vendor_keys(source));
        api.resources.push(Resource::new(name.clone(), vec![operation], ExtensionBag::from_vendor_keys(channel)));
    }

    debug!(api = %api.title, channels = api.resources.len(), "Parsed AsyncAPI definition");
    Ok(api)
}
