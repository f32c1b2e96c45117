//! Upstream TLS contexts for https / wss endpoints.

use std::net::IpAddr;

use envoy_types::pb::envoy::config::core::v3::{data_source::Specifier, DataSource};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    common_tls_context::ValidationContextType, subject_alt_name_matcher::SanType,
    tls_parameters::TlsProtocol, CertificateValidationContext, CommonTlsContext,
    SubjectAltNameMatcher, TlsCertificate, TlsParameters, UpstreamTlsContext,
};
use envoy_types::pb::envoy::r#type::matcher::v3::{string_matcher::MatchPattern, StringMatcher};
use tracing::debug;

use crate::config::EnvoySettings;

pub const UPSTREAM_TLS_CONTEXT_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.UpstreamTlsContext";
pub const TLS_TRANSPORT_SOCKET_NAME: &str = "envoy.transport_sockets.tls";

const ALPN_H2: &str = "h2";
const ALPN_HTTP_11: &str = "http/1.1";

/// Map a configured protocol name; anything but `TLS1_0` to `TLS1_3` is auto.
pub fn tls_protocol(version: &str) -> TlsProtocol {
    match version {
        "TLS1_0" => TlsProtocol::TlSv10,
        "TLS1_1" => TlsProtocol::TlSv11,
        "TLS1_2" => TlsProtocol::TlSv12,
        "TLS1_3" => TlsProtocol::TlSv13,
        _ => TlsProtocol::TlsAuto,
    }
}

fn file_source(path: &std::path::Path) -> DataSource {
    DataSource {
        specifier: Some(Specifier::Filename(path.to_string_lossy().into_owned())),
        ..Default::default()
    }
}

/// TLS context for one upstream host.
///
/// `trusted_cert` holds PEM bytes bundled with the API; without them the configured CA bundle is
/// trusted. Verification settings come from `envoy.upstream.tls`.
pub fn upstream_tls_context(
    trusted_cert: Option<&[u8]>,
    host: &str,
    http2: bool,
    settings: &EnvoySettings,
) -> UpstreamTlsContext {
    let tls = &settings.upstream.tls;
    let host_ip = host.parse::<IpAddr>().ok();

    let mut common = CommonTlsContext {
        tls_params: Some(TlsParameters {
            tls_minimum_protocol_version: tls_protocol(&tls.minimum_protocol_version) as i32,
            tls_maximum_protocol_version: tls_protocol(&tls.maximum_protocol_version) as i32,
            cipher_suites: tls.cipher_suites(),
            ..Default::default()
        }),
        tls_certificates: vec![TlsCertificate {
            certificate_chain: Some(file_source(&settings.keystore.cert_path)),
            private_key: Some(file_source(&settings.keystore.key_path)),
            ..Default::default()
        }],
        ..Default::default()
    };

    if http2 {
        common.alpn_protocols = vec![ALPN_H2.to_string(), ALPN_HTTP_11.to_string()];
    }

    if !tls.disable_ssl_verification {
        let trusted_ca = match trusted_cert {
            Some(bytes) => DataSource {
                specifier: Some(Specifier::InlineBytes(bytes.to_vec())),
                ..Default::default()
            },
            None => file_source(&tls.trusted_cert_path),
        };

        let mut validation = CertificateValidationContext {
            trusted_ca: Some(trusted_ca),
            ..Default::default()
        };

        if tls.verify_host_name {
            let san_type = if host_ip.is_some() { SanType::IpAddress } else { SanType::Dns };
            validation.match_typed_subject_alt_names = vec![SubjectAltNameMatcher {
                san_type: san_type as i32,
                matcher: Some(StringMatcher {
                    match_pattern: Some(MatchPattern::Exact(host.to_string())),
                    ..Default::default()
                }),
                ..Default::default()
            }];
        }

        common.validation_context_type = Some(ValidationContextType::ValidationContext(validation));
    } else {
        debug!(host = %host, "Upstream certificate verification disabled");
    }

    UpstreamTlsContext {
        common_tls_context: Some(common),
        sni: if host_ip.is_none() { host.to_string() } else { String::new() },
        ..Default::default()
    }
}
