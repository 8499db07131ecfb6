//! Warping of volumes by dense displacement fields.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ModelError;
use crate::interpolation::{
    displacement_to_grid, nearest_interpolation, trilinear_interpolation, Boundary,
};

/// Interpolation scheme used when sampling between voxels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    #[default]
    Linear,
    Nearest,
}

impl FromStr for Interpolation {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "nearest" => Ok(Self::Nearest),
            _ => Err(ModelError::UnknownResamplerOption(s.to_string())),
        }
    }
}

/// Resamples `values` at `voxel index + displacement`.
///
/// Fields are `[B, 3, D, H, W]` in voxel units ordered `(z, y, x)`, sharing the
/// spatial shape of the volume being warped. A zero field returns the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResamplerLayer {
    interpolation: Interpolation,
    boundary: Boundary,
}

impl ResamplerLayer {
    pub fn new(interpolation: Interpolation, boundary: Boundary) -> Self {
        Self {
            interpolation,
            boundary,
        }
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    pub fn boundary(&self) -> Boundary {
        self.boundary
    }

    /// Warp `values` `[B, C, D, H, W]` with `field` `[B, 3, D, H, W]`.
    pub fn forward<B: Backend>(&self, values: Tensor<B, 5>, field: Tensor<B, 5>) -> Tensor<B, 5> {
        let grid = displacement_to_grid(field);
        match self.interpolation {
            Interpolation::Linear => trilinear_interpolation(values, grid, self.boundary),
            Interpolation::Nearest => nearest_interpolation(values, grid, self.boundary),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_zero_field_is_identity() {
        let device = Default::default();
        let resampler = ResamplerLayer::new(Interpolation::Linear, Boundary::Replicate);
        let values = Tensor::<TestBackend, 5>::random([2, 1, 4, 4, 4], Distribution::Default, &device);
        let field = Tensor::<TestBackend, 5>::zeros([2, 3, 4, 4, 4], &device);

        let warped = resampler.forward(values.clone(), field);
        let diff = (warped - values).abs().max().into_scalar();
        assert!(diff < 1e-6);
    }

    #[test]
    fn test_integer_shift_moves_content() {
        let device = Default::default();
        let resampler = ResamplerLayer::new(Interpolation::Linear, Boundary::Zero);
        let values = Tensor::<TestBackend, 1>::from_floats([1.0, 2.0, 3.0, 4.0], &device)
            .reshape([1, 1, 4, 1, 1]);
        let dz = Tensor::<TestBackend, 5>::ones([1, 1, 4, 1, 1], &device);
        let rest = Tensor::<TestBackend, 5>::zeros([1, 2, 4, 1, 1], &device);
        let field = Tensor::cat(vec![dz, rest], 1);

        let warped = resampler.forward(values, field);
        let out = warped.into_data().to_vec::<f32>().unwrap();
        assert_eq!(out, vec![2.0, 3.0, 4.0, 0.0]);
    }

    #[test]
    fn test_option_parsing() {
        assert_eq!("LINEAR".parse::<Interpolation>().unwrap(), Interpolation::Linear);
        assert_eq!("nearest".parse::<Interpolation>().unwrap(), Interpolation::Nearest);
        assert!(matches!(
            "cubic".parse::<Interpolation>(),
            Err(ModelError::UnknownResamplerOption(_))
        ));
    }
}
