//! Configuration error types.

use thiserror::Error;

/// Result type alias for configuration loading and validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating exporter configuration.
///
/// Every validation variant names the fully-qualified property key so the
/// operator can find the offending setting.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} is required")]
    Missing { key: String },

    #[error("{key} was '{value}' but it must be a valid URL")]
    InvalidUrl { key: String, value: String },

    #[error("{key} was '{value}' but it must be a valid duration value")]
    InvalidDuration { key: String, value: String },

    #[error("{key} was '{value}' but it must be {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },

    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}
