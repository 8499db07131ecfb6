//! Error types for the training engine.

use labelreg_model::ModelError;
use thiserror::Error;

use crate::collector::Collection;

/// Errors raised while configuring or running a training application.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A guarded lifecycle operation was called outside training mode.
    #[error("'{stage}' is only supported in training mode")]
    UnsupportedMode { stage: &'static str },

    /// Invalid or incomplete configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// No optimiser is registered under the requested name.
    #[error("Unknown optimiser '{name}', available: {available}")]
    UnknownOptimiser { name: String, available: String },

    /// Network, loss or resampler construction failed.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Input data could not be found or read.
    #[error("Data error: {0}")]
    Data(String),

    /// The configuration file is not valid TOML or has mistyped values.
    #[error("Failed to parse configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// Tensor shape mismatch.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// An output name was registered twice in one collection.
    #[error("Output '{name}' is already registered in the {collection} collection")]
    DuplicateOutput { name: String, collection: Collection },

    /// A lifecycle stage was skipped.
    #[error("{0} has not been initialised")]
    NotInitialised(&'static str),

    /// Saving or loading network weights failed.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_mode_display() {
        let err = EngineError::UnsupportedMode {
            stage: "initialise_sampler",
        };
        assert_eq!(
            err.to_string(),
            "'initialise_sampler' is only supported in training mode"
        );
    }

    #[test]
    fn test_model_error_is_transparent() {
        let err: EngineError = ModelError::UnknownLossType("Dice".to_string()).into();
        assert!(matches!(err, EngineError::Model(_)));
        assert_eq!(err.to_string(), "Unknown loss type 'Dice'");
    }

    #[test]
    fn test_duplicate_output_display() {
        let err = EngineError::DuplicateOutput {
            name: "label_loss".to_string(),
            collection: Collection::Console,
        };
        assert!(err.to_string().contains("label_loss"));
        assert!(err.to_string().contains("console"));
    }
}
