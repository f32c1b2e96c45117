//! # Observability Infrastructure
//!
//! Structured logging for the adapter: subscriber initialisation and span macros.

pub mod logging;

pub use logging::log_config_info;

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingSettings;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Returns `false` when a subscriber was
/// already installed (tests, embedding applications), which is not an error.
pub fn init_logging(settings: &LoggingSettings) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let installed = if settings.json {
        tracing::subscriber::set_global_default(
            fmt().json().with_env_filter(filter).with_current_span(true).finish(),
        )
    } else {
        tracing::subscriber::set_global_default(fmt().with_env_filter(filter).finish())
    };

    installed.is_ok()
}
