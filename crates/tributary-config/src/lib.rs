//! # Tributary Config
//!
//! Layered configuration for producers and workers: TOML files, a `.env`
//! file, and `TRIBUTARY__`-prefixed environment variables.

mod app_config;
mod loader;

pub use app_config::*;
pub use loader::*;
