//! # api-adapter
//!
//! Control-plane adapter of an API gateway. It reads API projects (OpenAPI, AsyncAPI and
//! `api.yaml` bundles), compiles them into a gateway-agnostic model and emits the Envoy route,
//! cluster and endpoint resources the gateway serves, together with the descriptor its enforcer
//! authorizes requests against.
//!
//! ## Architecture
//!
//! ```text
//! Project bundle → Parsers → Unified model → Route/Cluster generator → Orchestrator → Publisher
//!                              ↓                                        ↓
//!                        Policy formatting                      Enforcer descriptor
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use api_adapter::config::AdapterConfig;
//! use api_adapter::deployer::{InMemoryPublisher, Orchestrator};
//! use api_adapter::project::ProjectApi;
//!
//! #[tokio::main]
//! async fn main() -> api_adapter::Result<()> {
//!     let config = AdapterConfig::load(None)?;
//!     let project = ProjectApi::from_zip_file("PetStore.zip".as_ref(), &config)?;
//!     let orchestrator = Orchestrator::new(Arc::new(config), Arc::new(InMemoryPublisher::new()));
//!     orchestrator.deploy_project(&project, false).await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod deployer;
pub mod enforcer;
pub mod errors;
pub mod model;
pub mod observability;
pub mod parser;
pub mod project;
pub mod xds;

// Re-export commonly used types
pub use config::AdapterConfig;
pub use errors::{Error, Result};
pub use model::{Api, ApiKind};
pub use project::ProjectApi;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
        assert_eq!(APP_NAME, "api-adapter");
    }
}
