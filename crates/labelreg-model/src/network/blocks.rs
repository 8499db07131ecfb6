use burn::{
    module::Module,
    nn::{
        conv::{Conv3d, Conv3dConfig},
        PaddingConfig3d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// Two 3x3x3 convolutions, each followed by ReLU; spatial size is preserved.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv1: Conv3d<B>,
    conv2: Conv3d<B>,
    activation: Relu,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = |channels: [usize; 2]| {
            Conv3dConfig::new(channels, [3, 3, 3])
                .with_padding(PaddingConfig3d::Explicit(1, 1, 1))
                .init(device)
        };
        Self {
            conv1: conv([in_channels, out_channels]),
            conv2: conv([out_channels, out_channels]),
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let x = self.activation.forward(self.conv1.forward(x));
        self.activation.forward(self.conv2.forward(x))
    }
}
