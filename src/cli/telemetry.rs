//! Tracing subscriber setup.
//!
//! `TAPGATE_LOG_LEVEL` / `-v` pick the level; `TAPGATE_LOG_FORMAT=json`
//! switches to structured JSON output for log shippers.

use anyhow::{Context, Result};
use std::env::var;
use tracing::Level;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};

const ENV_LOG_FORMAT: &str = "TAPGATE_LOG_FORMAT";

/// Install the global tracing subscriber.
///
/// An explicit verbosity level wins; otherwise `RUST_LOG` applies, defaulting
/// to `error`.
///
/// # Errors
/// Returns an error if a subscriber is already installed.
pub fn init(level: Option<Level>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::new(level.to_string().to_lowercase()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error")),
    };

    let json = var(ENV_LOG_FORMAT)
        .map(|value| value.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        let subscriber = Registry::default()
            .with(filter)
            .with(fmt::layer().json().flatten_event(true));
        tracing::subscriber::set_global_default(subscriber)
            .context("Failed to install tracing subscriber")
    } else {
        let subscriber = Registry::default().with(filter).with(fmt::layer());
        tracing::subscriber::set_global_default(subscriber)
            .context("Failed to install tracing subscriber")
    }
}
