//! signbox gateway - HTTP surface over the signer core
//!
//! `PUT /{action}` with basic auth signs the request body. Users and actions
//! come from a YAML file that is re-read on every request.

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod digest;
pub mod middleware;
pub mod settings;
pub mod state;

pub use state::AppState;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

/// Install the global subscriber. `RUST_LOG` overrides `default_filter`.
pub fn init_tracing(format: LogFormat, default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}
