use thiserror::Error;

/// Upstream certificate errors surfaced while reading project bundles and TLS settings.
#[derive(Debug, Error)]
pub enum TlsError {
    /// A certificate file bundled with a project does not contain PEM data.
    #[error("Certificate {name} is not a valid PEM file")]
    InvalidCertificatePem { name: String },

    /// The endpoint certificate mapping references a file that was not bundled.
    #[error("Certificate file {file} referenced by endpoint {endpoint} was not found in the project")]
    MissingMappedCertificate { endpoint: String, file: String },

    /// The configured TLS protocol bounds are inverted.
    #[error("Minimum TLS version {min} is newer than maximum TLS version {max}")]
    InvalidProtocolRange { min: String, max: String },
}
