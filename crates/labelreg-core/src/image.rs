//! Volume type with physical geometry.
//!
//! An [`Image`] couples a `[D, H, W]` tensor (possibly on GPU) with the
//! [`ImageGeometry`] read from its source file.

use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Shape, Tensor, TensorData};

use crate::error::{CoreError, Result};
use crate::geometry::ImageGeometry;

/// A single-channel 3D volume.
///
/// # Examples
/// ```rust
/// use labelreg_core::{Image, ImageGeometry};
/// use burn::tensor::Tensor;
/// use burn_ndarray::NdArray;
///
/// type Backend = NdArray<f32>;
///
/// let device = Default::default();
/// let data = Tensor::<Backend, 3>::zeros([4, 5, 6], &device);
/// let image = Image::new(data, ImageGeometry::identity());
/// assert_eq!(image.shape(), [4, 5, 6]);
/// ```
#[derive(Debug, Clone)]
pub struct Image<B: Backend> {
    data: Tensor<B, 3>,
    geometry: ImageGeometry,
}

impl<B: Backend> Image<B> {
    /// Create a new image from voxel data and geometry.
    pub fn new(data: Tensor<B, 3>, geometry: ImageGeometry) -> Self {
        Self { data, geometry }
    }

    /// Build an image from a flat voxel buffer in `[D, H, W]` order.
    pub fn from_voxels(
        voxels: Vec<f32>,
        shape: [usize; 3],
        geometry: ImageGeometry,
        device: &B::Device,
    ) -> Result<Self> {
        let expected = shape.iter().product::<usize>();
        if voxels.len() != expected {
            return Err(CoreError::ShapeMismatch {
                expected: vec![expected],
                actual: vec![voxels.len()],
            });
        }
        let data = Tensor::<B, 3>::from_data(TensorData::new(voxels, Shape::new(shape)), device);
        Ok(Self::new(data, geometry))
    }

    /// Voxel data tensor `[D, H, W]`.
    pub fn data(&self) -> &Tensor<B, 3> {
        &self.data
    }

    /// Consume the image and return its voxel data.
    pub fn into_data(self) -> Tensor<B, 3> {
        self.data
    }

    pub fn geometry(&self) -> &ImageGeometry {
        &self.geometry
    }

    /// Spatial shape `[D, H, W]`.
    pub fn shape(&self) -> [usize; 3] {
        self.data.dims()
    }

    /// Number of voxels.
    pub fn num_voxels(&self) -> usize {
        self.shape().iter().product()
    }

    /// The volume as a model input `[1, 1, D, H, W]`.
    pub fn to_batch_tensor(&self) -> Tensor<B, 5> {
        let [d, h, w] = self.shape();
        self.data.clone().reshape([1, 1, d, h, w])
    }

    /// Rescale intensities to zero mean and unit variance.
    ///
    /// Constant volumes are only centred.
    pub fn normalised(&self) -> Self {
        let mean = self.data.clone().mean().into_scalar().elem::<f32>();
        let centred = self.data.clone().sub_scalar(mean);
        let var = centred
            .clone()
            .powf_scalar(2.0)
            .mean()
            .into_scalar()
            .elem::<f32>();
        let data = if var > f32::EPSILON {
            centred.div_scalar(var.sqrt())
        } else {
            centred
        };
        Self::new(data, self.geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type Backend = NdArray<f32>;

    #[test]
    fn test_image_creation() {
        let device = Default::default();
        let data = Tensor::<Backend, 3>::zeros([10, 10, 10], &device);
        let image = Image::new(data, ImageGeometry::identity());

        assert_eq!(image.shape(), [10, 10, 10]);
        assert_eq!(image.num_voxels(), 1000);
        assert_eq!(image.geometry(), &ImageGeometry::identity());
    }

    #[test]
    fn test_from_voxels_rejects_wrong_length() {
        let device = Default::default();
        let result =
            Image::<Backend>::from_voxels(vec![0.0; 7], [2, 2, 2], ImageGeometry::identity(), &device);
        assert!(matches!(result, Err(CoreError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_batch_tensor_shape() {
        let device = Default::default();
        let image = Image::<Backend>::from_voxels(
            (0..24).map(|v| v as f32).collect(),
            [2, 3, 4],
            ImageGeometry::identity(),
            &device,
        )
        .unwrap();
        assert_eq!(image.to_batch_tensor().dims(), [1, 1, 2, 3, 4]);
    }

    #[test]
    fn test_normalised_statistics() {
        let device = Default::default();
        let image = Image::<Backend>::from_voxels(
            (0..8).map(|v| v as f32).collect(),
            [2, 2, 2],
            ImageGeometry::identity(),
            &device,
        )
        .unwrap();
        let normalised = image.normalised();
        let mean = normalised.data().clone().mean().into_scalar();
        let var = normalised.data().clone().powf_scalar(2.0).mean().into_scalar();
        assert!(mean.abs() < 1e-5);
        assert!((var - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_normalised_constant_volume() {
        let device = Default::default();
        let data = Tensor::<Backend, 3>::ones([2, 2, 2], &device).mul_scalar(3.0);
        let image = Image::new(data, ImageGeometry::identity()).normalised();
        let max = image.data().clone().abs().max().into_scalar();
        assert!(max < 1e-6);
    }
}
