//! # Error Handling
//!
//! Error taxonomy for the adapter. Parser errors abort a deployment, generator errors are
//! scoped to the cluster or operation that produced them, and policy validation failures are
//! logged and never bubble past the policy formatter.

pub mod tls;

pub use tls::TlsError;

/// Custom result type for adapter operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric codes attached to error logs, shared with the enforcer and operators' dashboards.
pub mod codes {
    pub const API_LEVEL_CLUSTER_FAILED: u32 = 2202;
    pub const RESOURCE_LEVEL_CLUSTER_FAILED: u32 = 2203;
    pub const POLICY_VALIDATION_FAILED: u32 = 2204;
    pub const POLICY_TEMPLATE_PARSE_FAILED: u32 = 2205;
    pub const POLICY_TEMPLATE_RENDER_FAILED: u32 = 2206;
    pub const POLICY_DEFINITION_YAML_FAILED: u32 = 2207;
    pub const ROUTE_GENERATION_FAILED: u32 = 2211;
    pub const INVALID_REWRITE_PATH: u32 = 2212;
}

/// Main error type for the adapter
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Unparseable bundle, definition or api.yaml content, or an unsupported API type
    #[error("Malformed input in {file}: {message}")]
    MalformedInput { file: String, message: String },

    /// An operation policy failed validation against its specification
    #[error("Policy '{policy}' is invalid: {message}")]
    PolicyValidation { policy: String, message: String },

    /// An endpoint cluster could not be resolved
    #[error("Failed to resolve endpoints for {cluster}: {message}")]
    EndpointResolution { cluster: String, message: String },

    /// A single endpoint URL is malformed
    #[error("Malformed endpoint detected ({message}): {url}")]
    MalformedEndpoint { url: String, message: String },

    /// A create-only deployment hit an existing API, or a basepath is already taken
    #[error("API {api} already exists in vhost {vhost}")]
    AlreadyExists { api: String, vhost: String },

    /// A rewrite template references a path parameter the resource does not declare
    #[error("Invalid path param \"{param}\" in rewrite path")]
    InvalidRewriteParam { param: String },

    /// A rewrite template produced characters outside the allowed substitution alphabet
    #[error("Rewrite path regex includes invalid characters, regex \"{regex}\"")]
    RegexCompilation { regex: String },

    /// Generation for one API failed; carries its identity for the caller
    #[error("Error encountered while applying API {name}:{version} ({uuid}): {source}")]
    Deployment {
        name: String,
        version: String,
        uuid: String,
        #[source]
        source: Box<Error>,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Upstream certificate errors
    #[error(transparent)]
    Tls(#[from] TlsError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a malformed input error for the given file or field
    pub fn malformed<F: Into<String>, S: Into<String>>(file: F, message: S) -> Self {
        Self::MalformedInput { file: file.into(), message: message.into() }
    }

    /// Create a malformed endpoint error carrying the offending raw URL
    pub fn malformed_endpoint<U: Into<String>, S: Into<String>>(url: U, message: S) -> Self {
        Self::MalformedEndpoint { url: url.into(), message: message.into() }
    }

    /// Create an endpoint resolution error
    pub fn endpoint_resolution<C: Into<String>, S: Into<String>>(cluster: C, message: S) -> Self {
        Self::EndpointResolution { cluster: cluster.into(), message: message.into() }
    }

    /// Create a policy validation error
    pub fn policy<P: Into<String>, S: Into<String>>(policy: P, message: S) -> Self {
        Self::PolicyValidation { policy: policy.into(), message: message.into() }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Wrap an error with the identity of the API being applied
    pub fn deployment(name: &str, version: &str, uuid: &str, source: Error) -> Self {
        Self::Deployment {
            name: name.to_string(),
            version: version.to_string(),
            uuid: uuid.to_string(),
            source: Box::new(source),
        }
    }

    /// Whether the error aborts the whole deployment request.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::PolicyValidation { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed("json", err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::malformed("yaml", err.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::config(err.to_string())
    }
}
