use std::path::{Path, PathBuf};

use burn::module::{AutodiffModule, ModuleVisitor, ParamId};
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::backend::AutodiffBackend;

use crate::config::OptimizerSection;
use crate::training::session::{TrainingUnit, UnitOptimizer, UnitResult};

/// Extension the named MessagePack recorder appends to every file.
const RECORD_EXTENSION: &str = "mpk";

/// Type tag of [`AdamSlot`] in checkpoints.
pub const ADAM: &str = "Adam";

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

/// Float parameter shapes of a module, in visiting order.
#[derive(Default)]
struct ParamShapes(Vec<Vec<usize>>);

impl<B: Backend> ModuleVisitor<B> for ParamShapes {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        self.0.push(tensor.dims().to_vec());
    }
}

fn param_shapes<B: Backend, M: Module<B>>(module: &M) -> Vec<Vec<usize>> {
    let mut shapes = ParamShapes::default();
    module.visit(&mut shapes);
    shapes.0
}

/// A burn module exposed to the trainer as a checkpointable unit.
pub struct BurnUnit<B: AutodiffBackend, M: AutodiffModule<B>> {
    arch: String,
    pub model: M,
    device: B::Device,
}

impl<B: AutodiffBackend, M: AutodiffModule<B>> BurnUnit<B, M> {
    pub fn new(arch: impl Into<String>, model: M, device: B::Device) -> Self {
        BurnUnit {
            arch: arch.into(),
            model,
            device,
        }
    }

}

impl<B: AutodiffBackend, M: AutodiffModule<B>> TrainingUnit for BurnUnit<B, M> {
    fn arch(&self) -> &str {
        &self.arch
    }

    fn save_state(&self, stem: &Path) -> UnitResult<PathBuf> {
        self.model.clone().save_file(stem.to_path_buf(), &recorder())?;
        Ok(stem.with_extension(RECORD_EXTENSION))
    }

    fn load_state(&mut self, path: &Path) -> UnitResult<()> {
        let loaded = self
            .model
            .clone()
            .load_file(path.to_path_buf(), &recorder(), &self.device)?;
        let (expected, got) = (param_shapes(&self.model), param_shapes(&loaded));
        if expected.len() != got.len() {
            return Err(format!(
                "saved weights hold {} tensors, {} expects {}",
                got.len(),
                self.arch,
                expected.len()
            )
            .into());
        }
        if let Some((i, (want, have))) = expected
            .iter()
            .zip(&got)
            .enumerate()
            .find(|(_, (want, have))| want != have)
        {
            return Err(format!(
                "saved tensor {i} has shape {have:?}, {} expects {want:?}",
                self.arch
            )
            .into());
        }
        self.model = loaded;
        Ok(())
    }
}

/// Adam optimizer bound to the unit of the same index.
pub struct AdamSlot<B: AutodiffBackend, M: AutodiffModule<B>> {
    config: AdamConfig,
    optimizer: OptimizerAdaptor<Adam, M, B>,
    lr: f64,
    device: B::Device,
}

impl<B: AutodiffBackend, M: AutodiffModule<B>> AdamSlot<B, M> {
    pub fn new(section: &OptimizerSection, device: B::Device) -> Self {
        let mut config = AdamConfig::new()
            .with_beta_1(section.beta1)
            .with_beta_2(section.beta2);
        if section.weight_decay > 0.0 {
            config = config.with_weight_decay(Some(WeightDecayConfig::new(section.weight_decay)));
        }
        let optimizer = config.init();
        AdamSlot {
            config,
            optimizer,
            lr: section.lr,
            device,
        }
    }

    /// Apply one update to `module` and return the updated module.
    pub fn step(&mut self, module: M, grads: GradientsParams) -> M {
        self.optimizer.step(self.lr, module, grads)
    }
}

impl<B: AutodiffBackend, M: AutodiffModule<B>> UnitOptimizer for AdamSlot<B, M> {
    fn kind(&self) -> &str {
        ADAM
    }

    fn save_state(&self, stem: &Path) -> UnitResult<PathBuf> {
        recorder().record(self.optimizer.to_record(), stem.to_path_buf())?;
        Ok(stem.with_extension(RECORD_EXTENSION))
    }

    fn load_state(&mut self, path: &Path) -> UnitResult<()> {
        let record = recorder().load(path.to_path_buf(), &self.device)?;
        let fresh: OptimizerAdaptor<Adam, M, B> = self.config.init();
        self.optimizer = fresh.load_record(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Discriminator, DiscriminatorConfig, Generator, GeneratorConfig};
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray<f32>>;

    fn unit(features: usize) -> BurnUnit<TestBackend, Generator<TestBackend>> {
        let device = Default::default();
        let model = GeneratorConfig::new()
            .with_noise_dim(4)
            .with_features(features)
            .init(&device);
        BurnUnit::new("Generator", model, device)
    }

    #[test]
    fn test_unit_state_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let saved = unit(2);
        let written = saved.save_state(&dir.path().join("unit-0")).unwrap();
        assert_eq!(written, dir.path().join("unit-0.mpk"));
        assert!(written.exists());

        let mut restored = unit(2);
        restored.load_state(&written).unwrap();
        assert_eq!(restored.model.num_params(), saved.model.num_params());
    }

    #[test]
    fn test_unit_rejects_other_architecture() {
        let dir = tempfile::tempdir().unwrap();
        let written = unit(2).save_state(&dir.path().join("unit-0")).unwrap();

        let device = Default::default();
        let model = DiscriminatorConfig::new()
            .with_features(2)
            .with_hidden_dim(4)
            .init(&device);
        let mut other: BurnUnit<TestBackend, Discriminator<TestBackend>> =
            BurnUnit::new("Discriminator", model, device);
        let before = other.model.num_params();
        assert!(other.load_state(&written).is_err());
        assert_eq!(other.model.num_params(), before);
    }

    #[test]
    fn test_unit_rejects_other_width() {
        let dir = tempfile::tempdir().unwrap();
        let written = unit(2).save_state(&dir.path().join("unit-0")).unwrap();

        let mut wider = unit(4);
        let before = param_shapes(&wider.model);
        let err = wider.load_state(&written).unwrap_err();
        assert!(err.to_string().contains("Generator expects"), "{err}");
        assert_eq!(param_shapes(&wider.model), before);
    }

    #[test]
    fn test_param_shapes_follow_config() {
        let narrow = param_shapes(&unit(2).model);
        let wide = param_shapes(&unit(4).model);
        assert_eq!(narrow.len(), wide.len());
        assert_ne!(narrow, wide);
        let total: usize = narrow.iter().map(|s| s.iter().product::<usize>()).sum();
        assert_eq!(total, unit(2).model.num_params());
    }

    #[test]
    fn test_adam_state_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let slot: AdamSlot<TestBackend, Generator<TestBackend>> =
            AdamSlot::new(&OptimizerSection::default(), device);
        assert_eq!(slot.kind(), "Adam");

        let written = slot.save_state(&dir.path().join("optimizer-0")).unwrap();
        assert!(written.ends_with("optimizer-0.mpk"));

        let mut restored: AdamSlot<TestBackend, Generator<TestBackend>> =
            AdamSlot::new(&OptimizerSection::default(), Default::default());
        restored.load_state(&written).unwrap();
    }
}
