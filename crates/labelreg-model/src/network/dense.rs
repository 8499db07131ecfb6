use burn::{
    module::Module,
    nn::{
        conv::{Conv3d, Conv3dConfig, ConvTranspose3d, ConvTranspose3dConfig},
        Initializer, PaddingConfig3d,
    },
    tensor::{backend::Backend, Tensor},
};

use super::blocks::ConvBlock;

/// Dense displacement network.
///
/// A U-shaped encoder/decoder over the `(fixed, moving)` pair. Each level
/// halves the resolution with a stride-2 convolution; the decoder upsamples
/// with transposed convolutions and concatenates the matching encoder output.
/// The flow head starts at zero so an untrained network predicts no motion.
#[derive(Module, Debug)]
pub struct INetDense<B: Backend> {
    encoders: Vec<ConvBlock<B>>,
    downs: Vec<Conv3d<B>>,
    ups: Vec<ConvTranspose3d<B>>,
    decoders: Vec<ConvBlock<B>>,
    head: Conv3d<B>,
}

impl<B: Backend> INetDense<B> {
    /// `features` holds the channel count of each resolution level, finest first.
    pub fn new(features: &[usize], device: &B::Device) -> Self {
        let mut encoders = Vec::with_capacity(features.len());
        let mut downs = Vec::new();
        let mut ups = Vec::new();
        let mut decoders = Vec::new();

        encoders.push(ConvBlock::new(2, features[0], device));
        for pair in features.windows(2) {
            let [coarse_in, fine] = [pair[1], pair[0]];
            downs.push(
                Conv3dConfig::new([fine, coarse_in], [2, 2, 2])
                    .with_stride([2, 2, 2])
                    .init(device),
            );
            encoders.push(ConvBlock::new(coarse_in, coarse_in, device));
            ups.push(
                ConvTranspose3dConfig::new([coarse_in, fine], [2, 2, 2])
                    .with_stride([2, 2, 2])
                    .init(device),
            );
            decoders.push(ConvBlock::new(2 * fine, fine, device));
        }

        let head = Conv3dConfig::new([features[0], 3], [3, 3, 3])
            .with_padding(PaddingConfig3d::Explicit(1, 1, 1))
            .with_initializer(Initializer::Zeros)
            .init(device);

        Self {
            encoders,
            downs,
            ups,
            decoders,
            head,
        }
    }

    /// Window extents must be multiples of this value.
    pub fn spatial_divisor(&self) -> usize {
        1 << self.downs.len()
    }

    /// Displacement field `[B, 3, D, H, W]`.
    pub fn forward(&self, fixed: Tensor<B, 5>, moving: Tensor<B, 5>) -> Tensor<B, 5> {
        let mut x = Tensor::cat(vec![fixed, moving], 1);
        let mut skips = Vec::with_capacity(self.encoders.len());

        for (level, encoder) in self.encoders.iter().enumerate() {
            if level > 0 {
                x = self.downs[level - 1].forward(x);
            }
            x = encoder.forward(x);
            skips.push(x.clone());
        }

        for level in (0..self.decoders.len()).rev() {
            let up = self.ups[level].forward(x);
            x = self.decoders[level].forward(Tensor::cat(vec![up, skips[level].clone()], 1));
        }

        self.head.forward(x)
    }
}
