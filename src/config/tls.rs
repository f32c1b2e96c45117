use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{errors::TlsError, Result};

const DEFAULT_CIPHERS: &str = "ECDHE-ECDSA-AES128-GCM-SHA256, ECDHE-RSA-AES128-GCM-SHA256, \
ECDHE-ECDSA-AES128-SHA, ECDHE-RSA-AES128-SHA, AES128-GCM-SHA256, AES128-SHA, \
ECDHE-ECDSA-AES256-GCM-SHA384, ECDHE-RSA-AES256-GCM-SHA384, ECDHE-ECDSA-AES256-SHA, \
ECDHE-RSA-AES256-SHA, AES256-GCM-SHA384, AES256-SHA";

/// Client certificate presented by the gateway to TLS upstreams.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct KeystoreSettings {
    pub key_path: PathBuf,
    pub cert_path: PathBuf,
}

impl Default for KeystoreSettings {
    fn default() -> Self {
        Self {
            key_path: PathBuf::from("/home/wso2/security/keystore/mg.key"),
            cert_path: PathBuf::from("/home/wso2/security/keystore/mg.pem"),
        }
    }
}

/// TLS parameters applied to every upstream TLS context.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct UpstreamTlsSettings {
    /// Minimum protocol version (`TLS1_0` to `TLS1_3`, anything else means auto)
    #[validate(length(min = 1, message = "Minimum TLS version cannot be empty"))]
    pub minimum_protocol_version: String,

    /// Maximum protocol version (`TLS1_0` to `TLS1_3`, anything else means auto)
    #[validate(length(min = 1, message = "Maximum TLS version cannot be empty"))]
    pub maximum_protocol_version: String,

    /// Comma separated cipher list
    pub ciphers: String,

    /// CA bundle used when the project does not carry its own endpoint certificate
    pub trusted_cert_path: PathBuf,

    /// Enforce an exact SAN match against the upstream host
    pub verify_host_name: bool,

    pub disable_ssl_verification: bool,
}

impl Default for UpstreamTlsSettings {
    fn default() -> Self {
        Self {
            minimum_protocol_version: "TLS1_1".to_string(),
            maximum_protocol_version: "TLS1_2".to_string(),
            ciphers: DEFAULT_CIPHERS.to_string(),
            trusted_cert_path: PathBuf::from("/etc/ssl/certs/ca-certificates.crt"),
            verify_host_name: true,
            disable_ssl_verification: false,
        }
    }
}

impl UpstreamTlsSettings {
    /// Cipher suites split on `,` with surrounding whitespace removed.
    pub fn cipher_suites(&self) -> Vec<String> {
        self.ciphers
            .split(',')
            .map(|cipher| cipher.trim().to_string())
            .filter(|cipher| !cipher.is_empty())
            .collect()
    }

    /// Reject a minimum version newer than the maximum. Auto values are never compared.
    pub fn check_protocol_range(&self) -> Result<()> {
        if let (Some(min), Some(max)) = (
            protocol_rank(&self.minimum_protocol_version),
            protocol_rank(&self.maximum_protocol_version),
        ) {
            if min > max {
                return Err(TlsError::InvalidProtocolRange {
                    min: self.minimum_protocol_version.clone(),
                    max: self.maximum_protocol_version.clone(),
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Ordering of the named TLS versions; `None` for auto.
pub fn protocol_rank(version: &str) -> Option<u8> {
    match version {
        "TLS1_0" => Some(0),
        "TLS1_1" => Some(1),
        "TLS1_2" => Some(2),
        "TLS1_3" => Some(3),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cipher_list_is_trimmed() {
        let settings = UpstreamTlsSettings {
            ciphers: " AES128-SHA ,AES256-SHA,, ".to_string(),
            ..Default::default()
        };
        assert_eq!(settings.cipher_suites(), vec!["AES128-SHA", "AES256-SHA"]);
        assert_eq!(UpstreamTlsSettings::default().cipher_suites().len(), 12);
    }

    #[test]
    fn inverted_protocol_range_is_rejected() {
        let settings = UpstreamTlsSettings {
            minimum_protocol_version: "TLS1_3".to_string(),
            maximum_protocol_version: "TLS1_1".to_string(),
            ..Default::default()
        };
        assert!(settings.check_protocol_range().is_err());

        let auto = UpstreamTlsSettings {
            minimum_protocol_version: "TLS1_3".to_string(),
            maximum_protocol_version: "AUTO".to_string(),
            ..Default::default()
        };
        assert!(auto.check_protocol_range().is_ok());
    }
}
