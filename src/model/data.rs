use burn::prelude::*;
use burn::tensor::Distribution;

use crate::config::DataSection;
use crate::error::ConfigError;

/// Side length of the square RGB images the EBGAN models work on.
pub const IMAGE_SIZE: usize = 64;

/// Supplies image batches `[batch, 3, IMAGE_SIZE, IMAGE_SIZE]` scaled to
/// [-1, 1]. Dataset loaders plug in here.
pub trait BatchSource<B: Backend> {
    fn train_batches(&self) -> usize;

    /// 0 disables validation.
    fn valid_batches(&self) -> usize;

    fn train_batch(&mut self, epoch: usize, index: usize, device: &B::Device) -> Tensor<B, 4>;

    fn valid_batch(&mut self, index: usize, device: &B::Device) -> Tensor<B, 4>;
}

/// Uniform noise images. Lets a run exercise the whole loop without a
/// dataset on disk.
#[derive(Debug, Clone)]
pub struct SyntheticImages {
    batch_size: usize,
    train_batches: usize,
    valid_batches: usize,
}

impl SyntheticImages {
    pub fn new(batch_size: usize, train_batches: usize, valid_batches: usize) -> Self {
        SyntheticImages {
            batch_size,
            train_batches,
            valid_batches,
        }
    }

    fn batch<B: Backend>(&self, device: &B::Device) -> Tensor<B, 4> {
        Tensor::random(
            [self.batch_size, 3, IMAGE_SIZE, IMAGE_SIZE],
            Distribution::Uniform(-1.0, 1.0),
            device,
        )
    }
}

impl<B: Backend> BatchSource<B> for SyntheticImages {
    fn train_batches(&self) -> usize {
        self.train_batches
    }

    fn valid_batches(&self) -> usize {
        self.valid_batches
    }

    fn train_batch(&mut self, _epoch: usize, _index: usize, device: &B::Device) -> Tensor<B, 4> {
        self.batch(device)
    }

    fn valid_batch(&mut self, _index: usize, device: &B::Device) -> Tensor<B, 4> {
        self.batch(device)
    }
}

/// Build the batch source named by `data.source` and seed the backend RNG.
pub fn build_source<B: Backend>(data: &DataSection) -> Result<Box<dyn BatchSource<B>>, ConfigError> {
    match data.source.as_str() {
        "synthetic" => {
            B::seed(data.seed);
            Ok(Box::new(SyntheticImages::new(
                data.batch_size,
                data.train_batches,
                data.valid_batches,
            )))
        }
        other => Err(ConfigError::Validation(format!(
            "unknown data.source '{other}' (available: synthetic)"
        ))),
    }
}
