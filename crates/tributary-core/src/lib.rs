//! # Tributary Core
//!
//! Error types and tracing initialisation shared by the Tributary crates.

pub mod error;
pub mod result;
pub mod telemetry;

pub use error::*;
pub use result::*;
pub use telemetry::{init_tracing, TelemetryConfig};
