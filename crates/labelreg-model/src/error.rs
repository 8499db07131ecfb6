//! Error types for model construction.

use thiserror::Error;

/// Errors raised by the network factory, losses and resampler configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// No network is registered under the requested name.
    #[error("Unknown network '{name}', available: {available}")]
    UnknownNetwork { name: String, available: String },

    /// No regression loss is registered under the requested name.
    #[error("Unknown loss type '{0}'")]
    UnknownLossType(String),

    /// Unrecognised interpolation or boundary option.
    #[error("Unknown resampler option '{0}'")]
    UnknownResamplerOption(String),

    /// Invalid network configuration.
    #[error("Invalid network configuration: {0}")]
    InvalidConfiguration(String),
}

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;
