//! Error types for volume and geometry handling.

use thiserror::Error;

/// Errors raised while building images, geometries or windows.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// A window extent was zero or the rank was not 3.
    #[error("Invalid window shape: {0}")]
    InvalidWindow(String),

    /// Direction matrix cannot be inverted.
    #[error("Degenerate geometry: {0}")]
    DegenerateGeometry(String),

    /// Tensor shape does not match what the caller expected.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Create an invalid window error.
    pub fn invalid_window(msg: impl Into<String>) -> Self {
        Self::InvalidWindow(msg.into())
    }

    /// Create a degenerate geometry error.
    pub fn degenerate_geometry(msg: impl Into<String>) -> Self {
        Self::DegenerateGeometry(msg.into())
    }
}
