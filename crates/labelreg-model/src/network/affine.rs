use burn::{
    module::Module,
    nn::{
        conv::{Conv3d, Conv3dConfig},
        BatchNorm, BatchNormConfig, Initializer, Linear, LinearConfig, PaddingConfig3d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::interpolation::grid_to_displacement;

/// Row-major 3x4 identity.
const IDENTITY_AFFINE: [f32; 12] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0,
];

/// Global affine registration network.
///
/// Strided convolutions with batch norm reduce the `(fixed, moving)` pair to a
/// feature vector; a linear head regresses the 12 affine parameters, which are
/// turned into a dense displacement field.
#[derive(Module, Debug)]
pub struct INetAffine<B: Backend> {
    convs: Vec<Conv3d<B>>,
    norms: Vec<BatchNorm<B, 3>>,
    fc: Linear<B>,
    activation: Relu,
}

impl<B: Backend> INetAffine<B> {
    /// `features` holds the output channels of each stride-2 level.
    pub fn new(features: &[usize], device: &B::Device) -> Self {
        let mut convs = Vec::with_capacity(features.len());
        let mut norms = Vec::with_capacity(features.len());
        let mut in_channels = 2;
        for &out_channels in features {
            convs.push(
                Conv3dConfig::new([in_channels, out_channels], [3, 3, 3])
                    .with_stride([2, 2, 2])
                    .with_padding(PaddingConfig3d::Explicit(1, 1, 1))
                    .init(device),
            );
            norms.push(BatchNormConfig::new(out_channels).init(device));
            in_channels = out_channels;
        }

        // Zero head: training starts from the identity transform.
        let fc = LinearConfig::new(in_channels, 12)
            .with_initializer(Initializer::Zeros)
            .init(device);

        Self {
            convs,
            norms,
            fc,
            activation: Relu::new(),
        }
    }

    /// Affine parameters `[B, 12]`, row-major 3x4 over normalised `(z, y, x, 1)`.
    pub fn parameters(&self, fixed: Tensor<B, 5>, moving: Tensor<B, 5>) -> Tensor<B, 2> {
        let mut x = Tensor::cat(vec![fixed, moving], 1);
        for (conv, norm) in self.convs.iter().zip(&self.norms) {
            x = self.activation.forward(norm.forward(conv.forward(x)));
        }

        // Global average pooling: [B, C, D, H, W] -> [B, C]
        let x = x.flatten::<3>(2, 4).mean_dim(2).squeeze::<2>(2);
        let theta = self.fc.forward(x);

        let batch_size = theta.dims()[0];
        let identity = Tensor::<B, 1>::from_floats(IDENTITY_AFFINE, &theta.device()).reshape([1, 12]);
        theta + identity.repeat(&[batch_size, 1])
    }

    /// Dense displacement field `[B, 3, D, H, W]` of the predicted affine.
    pub fn forward(&self, fixed: Tensor<B, 5>, moving: Tensor<B, 5>) -> Tensor<B, 5> {
        let [_, _, d, h, w] = fixed.dims();
        let theta = self.parameters(fixed, moving);
        affine_field(theta, [d, h, w])
    }
}

/// Coordinates of one axis mapped onto `[-1, 1]`; a single voxel maps to 0.
fn normalised_axis<B: Backend>(size: usize, device: &B::Device) -> Tensor<B, 1> {
    let coords = Tensor::arange(0..size as i64, device).float();
    if size > 1 {
        coords.mul_scalar(2.0 / (size - 1) as f32).sub_scalar(1.0)
    } else {
        coords
    }
}

/// Displacement field `[B, 3, D, H, W]` in voxels for affine parameters `[B, 12]`.
///
/// The affine acts on normalised coordinates, so the same parameters describe
/// the same deformation at any resolution.
pub fn affine_field<B: Backend>(theta: Tensor<B, 2>, shape: [usize; 3]) -> Tensor<B, 5> {
    let [b, _] = theta.dims();
    let [d, h, w] = shape;
    let device = theta.device();
    let theta = theta.reshape([b, 3, 4]);

    // Homogeneous normalised grid [B, 4, D*H*W]
    let z = normalised_axis::<B>(d, &device).reshape([1, 1, d, 1, 1]).repeat(&[b, 1, 1, h, w]);
    let y = normalised_axis::<B>(h, &device).reshape([1, 1, 1, h, 1]).repeat(&[b, 1, d, 1, w]);
    let x = normalised_axis::<B>(w, &device).reshape([1, 1, 1, 1, w]).repeat(&[b, 1, d, h, 1]);
    let ones = Tensor::ones([b, 1, d, h, w], &device);
    let grid = Tensor::cat(vec![z, y, x, ones], 1).reshape([b, 4, d * h * w]);

    let warped = theta.matmul(grid).reshape([b, 3, d, h, w]);

    // Back to voxel coordinates
    let z = warped.clone().narrow(1, 0, 1).add_scalar(1.0).mul_scalar((d - 1) as f32 / 2.0);
    let y = warped.clone().narrow(1, 1, 1).add_scalar(1.0).mul_scalar((h - 1) as f32 / 2.0);
    let x = warped.narrow(1, 2, 1).add_scalar(1.0).mul_scalar((w - 1) as f32 / 2.0);

    grid_to_displacement(Tensor::cat(vec![z, y, x], 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_identity_parameters_give_zero_field() {
        let device = Default::default();
        let theta = Tensor::<TestBackend, 1>::from_floats(IDENTITY_AFFINE, &device).reshape([1, 12]);
        let field = affine_field(theta, [4, 5, 6]);

        assert_eq!(field.dims(), [1, 3, 4, 5, 6]);
        let max = field.abs().max().into_scalar();
        assert!(max < 1e-5);
    }

    #[test]
    fn test_translation_parameters() {
        let device = Default::default();
        // Shift of one normalised unit along x: half the extent of a 5-voxel axis.
        let theta = Tensor::<TestBackend, 1>::from_floats(
            [
                1.0, 0.0, 0.0, 0.0, //
                0.0, 1.0, 0.0, 0.0, //
                0.0, 0.0, 1.0, 1.0,
            ],
            &device,
        )
        .reshape([1, 12]);
        let field = affine_field(theta, [3, 3, 5]);

        let dx = field.clone().narrow(1, 2, 1);
        let dz = field.narrow(1, 0, 1);
        assert!((dx.mean().into_scalar() - 2.0).abs() < 1e-5);
        assert!(dz.abs().max().into_scalar() < 1e-5);
    }

    #[test]
    fn test_fresh_network_predicts_identity() {
        let device = Default::default();
        let net = INetAffine::<TestBackend>::new(&[4, 8], &device);
        let fixed = Tensor::<TestBackend, 5>::random(
            [2, 1, 8, 8, 8],
            burn::tensor::Distribution::Default,
            &device,
        );
        let moving = fixed.clone();

        let theta = net.parameters(fixed.clone(), moving.clone());
        assert_eq!(theta.dims(), [2, 12]);

        let field = net.forward(fixed, moving);
        assert_eq!(field.dims(), [2, 3, 8, 8, 8]);
        assert!(field.abs().max().into_scalar() < 1e-5);
    }
}
