//! Network outputs describing a deformation.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Displacement prediction of a registration network.
///
/// All fields are `[B, 3, D, H, W]` in voxel units.
#[derive(Debug, Clone)]
pub enum FieldPrediction<B: Backend> {
    /// A single dense displacement field.
    Single(Tensor<B, 5>),
    /// A global affine component and a local component predicted separately.
    Composite {
        affine: Tensor<B, 5>,
        local: Tensor<B, 5>,
    },
}

impl<B: Backend> FieldPrediction<B> {
    /// Collapse the prediction into one dense displacement field.
    ///
    /// Composite predictions are summed elementwise.
    pub fn into_dense_field(self) -> Tensor<B, 5> {
        match self {
            Self::Single(field) => field,
            Self::Composite { affine, local } => affine + local,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Self::Composite { .. })
    }

    pub fn dims(&self) -> [usize; 5] {
        match self {
            Self::Single(field) => field.dims(),
            Self::Composite { affine, .. } => affine.dims(),
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
    fn test_single_passes_through() {
        let device = Default::default();
        let field = Tensor::<TestBackend, 5>::random([1, 3, 2, 2, 2], Distribution::Default, &device);
        let prediction = FieldPrediction::Single(field.clone());
        assert!(!prediction.is_composite());

        let dense = prediction.into_dense_field();
        assert_eq!(
            dense.into_data().to_vec::<f32>().unwrap(),
            field.into_data().to_vec::<f32>().unwrap()
        );
    }

    #[test]
    fn test_composite_is_summed() {
        let device = Default::default();
        let affine = Tensor::<TestBackend, 5>::ones([1, 3, 2, 2, 2], &device);
        let local = Tensor::<TestBackend, 5>::ones([1, 3, 2, 2, 2], &device).mul_scalar(0.25);
        let prediction = FieldPrediction::Composite { affine, local };
        assert!(prediction.is_composite());
        assert_eq!(prediction.dims(), [1, 3, 2, 2, 2]);

        let dense = prediction.into_dense_field().into_data().to_vec::<f32>().unwrap();
        assert!(dense.iter().all(|v| (*v - 1.25).abs() < 1e-6));
    }
}
