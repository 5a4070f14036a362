use std::time::Instant;

use burn::module::AutodiffModule;
use burn::nn::loss::{MseLoss, Reduction};
use burn::optim::GradientsParams;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{Distribution, ElementConversion};
use tracing::debug;

use crate::config::AppConfig;
use crate::error::ConfigError;
use crate::model::data::{build_source, BatchSource};
use crate::model::discriminator::{Discriminator, DiscriminatorConfig};
use crate::model::generator::{Generator, GeneratorConfig};
use crate::model::unit::{AdamSlot, BurnUnit, ADAM};
use crate::training::metrics::{EpochResult, MetricSet};
use crate::training::session::{TrainingSession, TrainingUnit, UnitOptimizer};

/// Mean energies over an epoch (or its validation pass).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnergyStats {
    /// Reconstruction error of real images.
    pub real: f64,
    /// Reconstruction error of generated images.
    pub fake: f64,
}

/// Metrics reported by [`EbganSession`], in log order.
pub fn energy_metrics() -> MetricSet<EnergyStats> {
    MetricSet::new()
        .register("energy_real", |s: &EnergyStats| s.real)
        .register("energy_fake", |s: &EnergyStats| s.fake)
        .register("energy_gap", |s: &EnergyStats| s.fake - s.real)
}

/// Energy of `images`: mean squared reconstruction error.
fn energy<B: Backend>(reconstruction: Tensor<B, 4>, images: Tensor<B, 4>) -> Tensor<B, 1> {
    MseLoss::new().forward(reconstruction, images, Reduction::Mean)
}

/// Pull-away term: mean squared cosine similarity between distinct latent
/// codes of a batch. Zero for batches of one.
pub fn pull_away<B: Backend>(latent: Tensor<B, 2>) -> Tensor<B, 1> {
    let [n, _] = latent.dims();
    let device = latent.device();
    if n < 2 {
        return Tensor::zeros([1], &device);
    }
    let norm = latent.clone().powf_scalar(2.0).sum_dim(1).sqrt().add_scalar(1e-8);
    let normalized = latent / norm;
    let similarity = normalized.clone().matmul(normalized.transpose());
    similarity
        .powf_scalar(2.0)
        .sum()
        .sub_scalar(n as f64)
        .div_scalar((n * (n - 1)) as f64)
}

fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    tensor.into_scalar().elem::<f64>()
}

/// Two-unit EBGAN: unit 0 is the generator, unit 1 the discriminator.
///
/// Each batch updates the discriminator on
/// `E(x) + max(0, margin - E(G(z)))` and then the generator on
/// `E(G(z)) + pt_weight * PT(latent)`, where `E` is the discriminator's
/// reconstruction error.
pub struct EbganSession<B: AutodiffBackend> {
    generator: BurnUnit<B, Generator<B>>,
    discriminator: BurnUnit<B, Discriminator<B>>,
    optim_g: AdamSlot<B, Generator<B>>,
    optim_d: AdamSlot<B, Discriminator<B>>,
    source: Box<dyn BatchSource<B>>,
    metrics: MetricSet<EnergyStats>,
    noise_dim: usize,
    margin: f64,
    pt_weight: f64,
    device: B::Device,
}

impl<B: AutodiffBackend> EbganSession<B> {
    /// Build models, optimizers and the configured batch source.
    pub fn from_config(config: &AppConfig, device: B::Device) -> Result<Self, ConfigError> {
        let source = build_source::<B>(&config.data)?;
        Self::new(config, source, device)
    }

    pub fn new(
        config: &AppConfig,
        source: Box<dyn BatchSource<B>>,
        device: B::Device,
    ) -> Result<Self, ConfigError> {
        let [opt_g, opt_d] = config.optimizers.as_slice() else {
            return Err(ConfigError::Validation(format!(
                "EBGAN trains 2 units (generator, discriminator) but {} optimizers are configured",
                config.optimizers.len()
            )));
        };
        for (i, opt) in [opt_g, opt_d].into_iter().enumerate() {
            if opt.kind != ADAM {
                return Err(ConfigError::Validation(format!(
                    "optimizers[{i}].type '{}' is not supported (available: {ADAM})",
                    opt.kind
                )));
            }
        }

        let arch = &config.arch;
        let generator = GeneratorConfig::new()
            .with_noise_dim(arch.noise_dim)
            .with_features(arch.generator_features)
            .with_init_std(arch.init_std)
            .init(&device);
        let discriminator = DiscriminatorConfig::new()
            .with_features(arch.discriminator_features)
            .with_hidden_dim(arch.hidden_dim)
            .with_init_std(arch.init_std)
            .init(&device);

        Ok(EbganSession {
            generator: BurnUnit::new("Generator", generator, device.clone()),
            discriminator: BurnUnit::new("Discriminator", discriminator, device.clone()),
            optim_g: AdamSlot::new(opt_g, device.clone()),
            optim_d: AdamSlot::new(opt_d, device.clone()),
            source,
            metrics: energy_metrics(),
            noise_dim: arch.noise_dim,
            margin: config.ebgan.margin,
            pt_weight: config.ebgan.pt_weight,
            device,
        })
    }

    pub fn generator(&self) -> &Generator<B> {
        &self.generator.model
    }

    pub fn discriminator(&self) -> &Discriminator<B> {
        &self.discriminator.model
    }

    fn noise(&self, batch_size: usize) -> Tensor<B, 2> {
        Tensor::random(
            [batch_size, self.noise_dim],
            Distribution::Normal(0.0, 1.0),
            &self.device,
        )
    }

    /// One discriminator update and one generator update on `real`.
    /// Returns (loss_d, loss_g, energies seen by the discriminator step).
    fn train_batch(&mut self, real: Tensor<B, 4>) -> (f64, f64, EnergyStats) {
        let batch_size = real.dims()[0];

        let fake = self.generator.model.forward(self.noise(batch_size)).detach();
        let (recon_real, _) = self.discriminator.model.forward(real.clone());
        let energy_real = energy(recon_real, real);
        let (recon_fake, _) = self.discriminator.model.forward(fake.clone());
        let energy_fake = energy(recon_fake, fake);
        let hinge = energy_fake.clone().neg().add_scalar(self.margin).clamp_min(0.0);
        let loss_d = energy_real.clone() + hinge;

        let stats = EnergyStats {
            real: scalar(energy_real.detach()),
            fake: scalar(energy_fake.detach()),
        };
        let loss_d_value = scalar(loss_d.clone().detach());

        let grads = GradientsParams::from_grads(loss_d.backward(), &self.discriminator.model);
        self.discriminator.model = self
            .optim_d
            .step(self.discriminator.model.clone(), grads);

        let fake = self.generator.model.forward(self.noise(batch_size));
        let (recon, latent) = self.discriminator.model.forward(fake.clone());
        let loss_g = energy(recon, fake) + pull_away(latent).mul_scalar(self.pt_weight);
        let loss_g_value = scalar(loss_g.clone().detach());

        let grads = GradientsParams::from_grads(loss_g.backward(), &self.generator.model);
        self.generator.model = self.optim_g.step(self.generator.model.clone(), grads);

        (loss_d_value, loss_g_value, stats)
    }

    /// Mean energies on the validation batches, without gradients.
    fn validate(&mut self) -> Option<EnergyStats> {
        let batches = self.source.valid_batches();
        if batches == 0 {
            return None;
        }
        let generator = self.generator.model.valid();
        let discriminator = self.discriminator.model.valid();

        let mut total = EnergyStats::default();
        for index in 0..batches {
            let real = self.source.valid_batch(index, &self.device).inner();
            let batch_size = real.dims()[0];
            let fake = generator.forward(self.noise(batch_size).inner());

            let (recon_real, _) = discriminator.forward(real.clone());
            let (recon_fake, _) = discriminator.forward(fake.clone());
            total.real += scalar(energy(recon_real, real));
            total.fake += scalar(energy(recon_fake, fake));
        }
        Some(EnergyStats {
            real: total.real / batches as f64,
            fake: total.fake / batches as f64,
        })
    }
}

impl<B: AutodiffBackend> TrainingSession for EbganSession<B> {
    fn units(&self) -> Vec<&dyn TrainingUnit> {
        vec![&self.generator, &self.discriminator]
    }

    fn units_mut(&mut self) -> Vec<&mut dyn TrainingUnit> {
        vec![&mut self.generator, &mut self.discriminator]
    }

    fn optimizers(&self) -> Vec<&dyn UnitOptimizer> {
        vec![&self.optim_g, &self.optim_d]
    }

    fn optimizers_mut(&mut self) -> Vec<&mut dyn UnitOptimizer> {
        vec![&mut self.optim_g, &mut self.optim_d]
    }

    fn metric_names(&self) -> Vec<String> {
        self.metrics.names()
    }

    fn train_epoch(&mut self, epoch: usize) -> anyhow::Result<EpochResult> {
        let started = Instant::now();
        let batches = self.source.train_batches();
        if batches == 0 {
            anyhow::bail!("batch source yielded no training batches");
        }

        let (mut loss_d, mut loss_g) = (0.0, 0.0);
        let mut energies = EnergyStats::default();
        for index in 0..batches {
            let real = self.source.train_batch(epoch, index, &self.device);
            let (d, g, stats) = self.train_batch(real);
            if !d.is_finite() || !g.is_finite() {
                debug!(epoch, index, loss_d = d, loss_g = g, "non-finite loss");
            }
            loss_d += d;
            loss_g += g;
            energies.real += stats.real;
            energies.fake += stats.fake;
        }
        let n = batches as f64;
        let (loss_d, loss_g) = (loss_d / n, loss_g / n);
        let energies = EnergyStats {
            real: energies.real / n,
            fake: energies.fake / n,
        };

        let mut result = EpochResult::new()
            .with_scalar("loss", loss_d + loss_g)
            .with_scalar("loss_d", loss_d)
            .with_scalar("loss_g", loss_g)
            .with_metrics(self.metrics.evaluate(&energies));
        if let Some(valid) = self.validate() {
            result = result.with_val_metrics(self.metrics.evaluate(&valid));
        }
        Ok(result.with_scalar("duration", started.elapsed().as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    use crate::model::data::SyntheticImages;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn tiny_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.arch.noise_dim = 4;
        config.arch.generator_features = 2;
        config.arch.discriminator_features = 2;
        config.arch.hidden_dim = 4;
        config
    }

    fn session(valid_batches: usize) -> EbganSession<TestBackend> {
        EbganSession::new(
            &tiny_config(),
            Box::new(SyntheticImages::new(2, 2, valid_batches)),
            Default::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_pull_away_of_orthogonal_codes_is_zero() {
        let device = Default::default();
        let latent = Tensor::<NdArray<f32>, 2>::from_floats([[1.0, 0.0], [0.0, 2.0]], &device);
        let pt = scalar(pull_away(latent));
        assert!(pt.abs() < 1e-5, "pt = {pt}");
    }

    #[test]
    fn test_pull_away_of_parallel_codes_is_one() {
        let device = Default::default();
        let latent = Tensor::<NdArray<f32>, 2>::from_floats([[1.0, 1.0], [2.0, 2.0]], &device);
        let pt = scalar(pull_away(latent));
        assert!((pt - 1.0).abs() < 1e-4, "pt = {pt}");
    }

    #[test]
    fn test_pull_away_single_sample() {
        let device = Default::default();
        let latent = Tensor::<NdArray<f32>, 2>::ones([1, 3], &device);
        assert_eq!(scalar(pull_away(latent)), 0.0);
    }

    #[test]
    fn test_session_exposes_two_units() {
        let session = session(0);
        let archs: Vec<String> = session.units().iter().map(|u| u.arch().to_string()).collect();
        assert_eq!(archs, vec!["Generator", "Discriminator"]);
        let kinds: Vec<String> = session.optimizers().iter().map(|o| o.kind().to_string()).collect();
        assert_eq!(kinds, vec!["Adam", "Adam"]);
        assert_eq!(
            session.metric_names(),
            vec!["energy_real", "energy_fake", "energy_gap"]
        );
    }

    #[test]
    fn test_train_epoch_reports_scalars_and_metrics() {
        let mut session = session(1);
        let result = session.train_epoch(1).unwrap();
        for key in ["loss", "loss_d", "loss_g", "duration"] {
            assert!(result.scalars.contains_key(key), "missing {key}");
        }
        assert_eq!(result.metrics.len(), 3);
        let val = result.val_metrics.expect("validation ran");
        assert_eq!(val.len(), 3);
        assert!((val[2] - (val[1] - val[0])).abs() < 1e-9);
        assert!(result.scalars["loss_d"] >= 0.0);
    }

    #[test]
    fn test_no_validation_without_valid_batches() {
        let mut session = session(0);
        let result = session.train_epoch(1).unwrap();
        assert!(result.val_metrics.is_none());
    }

    #[test]
    fn test_rejects_non_adam_optimizer() {
        let mut config = tiny_config();
        config.optimizers[1].kind = "SGD".to_string();
        let result = EbganSession::<TestBackend>::new(
            &config,
            Box::new(SyntheticImages::new(1, 1, 0)),
            Default::default(),
        );
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_rejects_wrong_optimizer_count() {
        let mut config = tiny_config();
        config.optimizers.truncate(1);
        let result = EbganSession::<TestBackend>::from_config(&config, Default::default());
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }
}
