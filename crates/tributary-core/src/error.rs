//! Shared error type for configuration, validation, and runtime setup.

use thiserror::Error;

/// Error type shared by the Tributary crates.
///
/// Crate-specific errors (for instance `JobError` in `tributary-jobs`) convert
/// from this type so configuration and validation failures surface with the
/// same wording everywhere.
#[derive(Error, Debug)]
pub enum TributaryError {
    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A value failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Tracing or telemetry could not be initialised.
    #[error("Telemetry error: {0}")]
    Telemetry(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TributaryError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Telemetry(_) => "TELEMETRY_ERROR",
            Self::Internal(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration<T: Into<String>>(message: T) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation(message.into())
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal(message.into())
    }
}

impl From<serde_json::Error> for TributaryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON serialization error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(TributaryError::configuration("x").error_code(), "CONFIGURATION_ERROR");
        assert_eq!(TributaryError::validation("x").error_code(), "VALIDATION_ERROR");
        assert_eq!(TributaryError::Telemetry("x".into()).error_code(), "TELEMETRY_ERROR");
        assert_eq!(TributaryError::internal("x").error_code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_error_display() {
        let err = TributaryError::validation("concurrency must be at least 1");
        assert_eq!(
            err.to_string(),
            "Validation error: concurrency must be at least 1"
        );
    }

    #[test]
    fn test_from_anyhow() {
        let err: TributaryError = anyhow::anyhow!("boom").into();
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_from_serde_json() {
        let json_err = serde_json::from_str::<u32>("not a number").unwrap_err();
        let err = TributaryError::from(json_err);
        assert!(err.to_string().contains("JSON serialization error"));
    }
}
