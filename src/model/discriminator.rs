use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::{
    BatchNorm, BatchNormConfig, Initializer, LeakyRelu, LeakyReluConfig, PaddingConfig2d, Tanh,
};
use burn::prelude::*;

/// EBGAN discriminator: a convolutional autoencoder whose reconstruction
/// error is the energy of its input.
///
/// ```text
/// Input:  [batch, 3, 64, 64]
/// Enc1:   Conv 3 -> f, LeakyReLU            =>  [batch, f, 32, 32]
/// Enc2:   Conv f -> 2f, BN, LeakyReLU       =>  [batch, 2f, 16, 16]
/// Enc3:   Conv 2f -> hidden, BN, LeakyReLU  =>  [batch, hidden, 8, 8]  (latent)
/// Dec1:   ConvT hidden -> 2f, BN, LeakyReLU =>  [batch, 2f, 16, 16]
/// Dec2:   ConvT 2f -> f, BN, LeakyReLU      =>  [batch, f, 32, 32]
/// Dec3:   ConvT f -> 3, BN, Tanh            =>  [batch, 3, 64, 64]
/// ```
/// All convolutions are 4x4, stride 2, padding 1. LeakyReLU slope is 0.2.
#[derive(Module, Debug)]
pub struct Discriminator<B: Backend> {
    enc1: Conv2d<B>,
    enc2: Conv2d<B>,
    enc_bn2: BatchNorm<B, 2>,
    enc3: Conv2d<B>,
    enc_bn3: BatchNorm<B, 2>,
    dec1: ConvTranspose2d<B>,
    dec_bn1: BatchNorm<B, 2>,
    dec2: ConvTranspose2d<B>,
    dec_bn2: BatchNorm<B, 2>,
    dec3: ConvTranspose2d<B>,
    dec_bn3: BatchNorm<B, 2>,
    leaky: LeakyRelu,
    tanh: Tanh,
}

#[derive(Config, Debug)]
pub struct DiscriminatorConfig {
    #[config(default = 64)]
    pub features: usize,
    /// Channels of the latent code.
    #[config(default = 256)]
    pub hidden_dim: usize,
    #[config(default = 0.02)]
    pub init_std: f64,
}

impl DiscriminatorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Discriminator<B> {
        let f = self.features;
        let init = Initializer::Normal {
            mean: 0.0,
            std: self.init_std,
        };
        let down = |channels: [usize; 2]| {
            Conv2dConfig::new(channels, [4, 4])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_initializer(init.clone())
                .init(device)
        };
        let up = |channels: [usize; 2]| {
            ConvTranspose2dConfig::new(channels, [4, 4])
                .with_stride([2, 2])
                .with_padding([1, 1])
                .with_initializer(init.clone())
                .init(device)
        };

        Discriminator {
            enc1: down([3, f]),
            enc2: down([f, 2 * f]),
            enc_bn2: BatchNormConfig::new(2 * f).init(device),
            enc3: down([2 * f, self.hidden_dim]),
            enc_bn3: BatchNormConfig::new(self.hidden_dim).init(device),
            dec1: up([self.hidden_dim, 2 * f]),
            dec_bn1: BatchNormConfig::new(2 * f).init(device),
            dec2: up([2 * f, f]),
            dec_bn2: BatchNormConfig::new(f).init(device),
            dec3: up([f, 3]),
            dec_bn3: BatchNormConfig::new(3).init(device),
            leaky: LeakyReluConfig::new().with_negative_slope(0.2).init(),
            tanh: Tanh::new(),
        }
    }
}

impl<B: Backend> Discriminator<B> {
    /// Forward pass: images [batch, 3, 64, 64] -> (reconstruction
    /// [batch, 3, 64, 64], latent [batch, hidden * 8 * 8]).
    pub fn forward(&self, images: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 2>) {
        let latent = self.encode(images);
        let [batch_size, channels, height, width] = latent.dims();

        let x = self.leaky.forward(self.dec_bn1.forward(self.dec1.forward(latent.clone())));
        let x = self.leaky.forward(self.dec_bn2.forward(self.dec2.forward(x)));
        let reconstruction = self.tanh.forward(self.dec_bn3.forward(self.dec3.forward(x)));

        let flat = latent.reshape([batch_size as i32, (channels * height * width) as i32]);
        (reconstruction, flat)
    }

    fn encode(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.leaky.forward(self.enc1.forward(images));
        let x = self.leaky.forward(self.enc_bn2.forward(self.enc2.forward(x)));
        self.leaky.forward(self.enc_bn3.forward(self.enc3.forward(x)))
    }
}
