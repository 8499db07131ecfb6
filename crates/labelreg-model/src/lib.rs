pub mod error;
pub mod field;
pub mod interpolation;
pub mod losses;
pub mod network;
pub mod resampler;

pub use error::{ModelError, Result};
pub use field::FieldPrediction;
pub use interpolation::Boundary;
pub use losses::{LossFunction, RegressionLossType};
pub use network::{ApplicationNetFactory, NetworkKind, RegistrationNet, RegistrationNetConfig};
pub use resampler::{Interpolation, ResamplerLayer};
