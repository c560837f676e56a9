//! Tracing subscriber initialisation.
//!
//! Workers and producers log through `tracing`; binaries embedding them call
//! [`init_tracing`] once at startup.

use crate::{TributaryError, TributaryResult};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Default filter directive, used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,

    /// Whether to include the event target in output.
    #[serde(default = "default_with_target")]
    pub with_target: bool,
}

fn default_log_level() -> String {
    "info,tributary=debug".to_string()
}

fn default_with_target() -> bool {
    true
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
            with_target: default_with_target(),
        }
    }
}

impl TelemetryConfig {
    /// Builds the env filter, preferring `RUST_LOG` over the configured level.
    fn env_filter(&self) -> TributaryResult<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.log_level).map_err(|e| {
                TributaryError::Telemetry(format!(
                    "Invalid log filter '{}': {}",
                    self.log_level, e
                ))
            }),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Fails if the filter directive cannot be parsed or a global subscriber is
/// already installed.
pub fn init_tracing(config: &TelemetryConfig) -> TributaryResult<()> {
    let filter = config.env_filter()?;

    let result = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(config.with_target),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(config.with_target))
            .try_init()
    };

    result.map_err(|e| TributaryError::Telemetry(e.to_string()))?;

    tracing::info!(
        log_level = %config.log_level,
        json = config.json,
        "Tracing initialized"
    );

    Ok(())
}
