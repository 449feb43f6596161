//! Error types for pdlogger-types.

use thiserror::Error;

/// Errors raised while validating a broker configuration document.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new validation
/// rules without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The broker host name is empty.
    #[error("config invalid: server cannot be empty")]
    EmptyHost,
    /// The broker port is outside `1..=65535`.
    #[error("config invalid: port {0} is out of range (1-65535)")]
    PortOutOfRange(i64),
}

/// Result type alias using pdlogger-types' ConfigError type.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
