//! Result type aliases for Tributary.

use crate::TributaryError;

/// A specialized `Result` type for Tributary operations.
pub type TributaryResult<T> = Result<T, TributaryError>;
