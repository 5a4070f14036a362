use burn::nn::conv::{ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Initializer, Relu, Tanh};
use burn::prelude::*;

/// EBGAN generator: noise vector to 64x64 RGB image in [-1, 1].
///
/// ```text
/// Input:    [batch, noise]           viewed as [batch, noise, 1, 1]
/// Project:  ConvT 1x1 noise -> 16*8f  =>  [batch, 8f, 4, 4]
/// Up1:      ConvT 8f -> 4f, BN, ReLU  =>  [batch, 4f, 8, 8]
/// Up2:      ConvT 4f -> 2f, BN, ReLU  =>  [batch, 2f, 16, 16]
/// Up3:      ConvT 2f -> f,  BN, ReLU  =>  [batch, f, 32, 32]
/// Out:      ConvT f -> 3, Tanh        =>  [batch, 3, 64, 64]
/// ```
/// Up and Out convolutions are 4x4, stride 2, padding 1.
#[derive(Module, Debug)]
pub struct Generator<B: Backend> {
    project: ConvTranspose2d<B>,
    up1: ConvTranspose2d<B>,
    bn1: BatchNorm<B, 2>,
    up2: ConvTranspose2d<B>,
    bn2: BatchNorm<B, 2>,
    up3: ConvTranspose2d<B>,
    bn3: BatchNorm<B, 2>,
    out: ConvTranspose2d<B>,
    relu: Relu,
    tanh: Tanh,
    noise_dim: usize,
    base_channels: usize,
}

#[derive(Config, Debug)]
pub struct GeneratorConfig {
    #[config(default = 100)]
    pub noise_dim: usize,
    /// `f` in the layer table; the projection has `8f` channels.
    #[config(default = 128)]
    pub features: usize,
    #[config(default = 0.02)]
    pub init_std: f64,
}

impl GeneratorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Generator<B> {
        let f = self.features;
        let init = Initializer::Normal {
            mean: 0.0,
            std: self.init_std,
        };
        let up = |channels: [usize; 2]| {
            ConvTranspose2dConfig::new(channels, [4, 4])
                .with_stride([2, 2])
                .with_padding([1, 1])
                .with_initializer(init.clone())
                .init(device)
        };

        Generator {
            project: ConvTranspose2dConfig::new([self.noise_dim, 16 * 8 * f], [1, 1])
                .with_initializer(init.clone())
                .init(device),
            up1: up([8 * f, 4 * f]),
            bn1: BatchNormConfig::new(4 * f).init(device),
            up2: up([4 * f, 2 * f]),
            bn2: BatchNormConfig::new(2 * f).init(device),
            up3: up([2 * f, f]),
            bn3: BatchNormConfig::new(f).init(device),
            out: up([f, 3]),
            relu: Relu::new(),
            tanh: Tanh::new(),
            noise_dim: self.noise_dim,
            base_channels: 8 * f,
        }
    }
}

impl<B: Backend> Generator<B> {
    /// Forward pass: noise [batch, noise_dim] -> images [batch, 3, 64, 64].
    pub fn forward(&self, noise: Tensor<B, 2>) -> Tensor<B, 4> {
        let batch_size = noise.dims()[0];

        let x = noise.reshape([batch_size as i32, self.noise_dim as i32, 1, 1]);
        let x = self.project.forward(x);
        let x = x.reshape([batch_size as i32, self.base_channels as i32, 4, 4]);
        let x = self.relu.forward(self.bn1.forward(self.up1.forward(x)));
        let x = self.relu.forward(self.bn2.forward(self.up2.forward(x)));
        let x = self.relu.forward(self.bn3.forward(self.up3.forward(x)));
        self.tanh.forward(self.out.forward(x))
    }
}
