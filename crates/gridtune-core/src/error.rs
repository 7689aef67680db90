//! Configuration error types.

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating configuration.
///
/// A configuration update that fails validation is rejected as a whole;
/// the previously active configuration stays in effect.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for `{field}`: {reason}")]
    OutOfBounds { field: String, reason: String },
}

impl ConfigError {
    pub(crate) fn out_of_bounds(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::OutOfBounds {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
