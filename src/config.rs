use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::training::monitor::MonitorMode;

/// Top-level run configuration, loadable from TOML or JSON.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Experiment name. Groups runs under `save_dir/<name>/`.
    pub name: String,
    /// Requested accelerator count. Clamped to what the machine has.
    pub n_gpu: usize,
    pub trainer: TrainerSection,
    pub visualization: VisualizationSection,
    /// One entry per training unit, index-aligned.
    pub optimizers: Vec<OptimizerSection>,
    pub arch: ArchSection,
    pub ebgan: EbganSection,
    pub data: DataSection,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            name: "EBGAN".to_string(),
            n_gpu: 0,
            trainer: TrainerSection::default(),
            visualization: VisualizationSection::default(),
            optimizers: vec![OptimizerSection::default(), OptimizerSection::default()],
            arch: ArchSection::default(),
            ebgan: EbganSection::default(),
            data: DataSection::default(),
        }
    }
}

/// Epoch loop, checkpoint cadence and best-model tracking.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TrainerSection {
    pub epochs: usize,
    /// Checkpoint every `save_freq` epochs.
    pub save_freq: usize,
    /// 0 = warnings only, 1 = per-epoch lines, 2 = debug detail.
    pub verbosity: u8,
    /// Log key tracked for `model_best`.
    pub monitor: String,
    pub monitor_mode: MonitorMode,
    pub save_dir: PathBuf,
    /// Epoch checkpoints to keep per run. 0 keeps all.
    pub keep_last: usize,
}

impl Default for TrainerSection {
    fn default() -> Self {
        TrainerSection {
            epochs: 100,
            save_freq: 1,
            verbosity: 2,
            monitor: "loss".to_string(),
            monitor_mode: MonitorMode::Min,
            save_dir: PathBuf::from("saved"),
            keep_last: 0,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct VisualizationSection {
    pub log_dir: PathBuf,
    /// Write per-epoch scalar events under `log_dir/<name>/<run_id>/`.
    #[serde(rename = "tensorboardX")]
    pub tensorboard: bool,
}

impl Default for VisualizationSection {
    fn default() -> Self {
        VisualizationSection {
            log_dir: PathBuf::from("saved/runs"),
            tensorboard: true,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct OptimizerSection {
    /// Optimizer type tag, stored in checkpoints.
    #[serde(rename = "type")]
    pub kind: String,
    pub lr: f64,
    pub beta1: f32,
    pub beta2: f32,
    pub weight_decay: f32,
}

impl Default for OptimizerSection {
    fn default() -> Self {
        OptimizerSection {
            kind: "Adam".to_string(),
            lr: 2e-4,
            beta1: 0.5,
            beta2: 0.999,
            weight_decay: 0.0,
        }
    }
}

/// Layer widths of the generator and discriminator.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ArchSection {
    pub noise_dim: usize,
    pub generator_features: usize,
    pub discriminator_features: usize,
    /// Channels of the discriminator's bottleneck.
    pub hidden_dim: usize,
    /// Standard deviation of the normal weight initializer.
    pub init_std: f64,
}

impl Default for ArchSection {
    fn default() -> Self {
        ArchSection {
            noise_dim: 100,
            generator_features: 128,
            discriminator_features: 64,
            hidden_dim: 256,
            init_std: 0.02,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EbganSection {
    /// Energy margin of the discriminator hinge.
    pub margin: f64,
    /// Weight of the pull-away term in the generator loss.
    pub pt_weight: f64,
}

impl Default for EbganSection {
    fn default() -> Self {
        EbganSection {
            margin: 1.0,
            pt_weight: 0.1,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DataSection {
    /// Batch source name. Only `synthetic` is built in.
    pub source: String,
    pub batch_size: usize,
    pub train_batches: usize,
    /// 0 disables validation.
    pub valid_batches: usize,
    pub seed: u64,
}

impl Default for DataSection {
    fn default() -> Self {
        DataSection {
            source: "synthetic".to_string(),
            batch_size: 64,
            train_batches: 8,
            valid_batches: 2,
            seed: 42,
        }
    }
}

impl AppConfig {
    /// Load configuration from a file. `.json` files are parsed as JSON,
    /// everything else as TOML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config: AppConfig = if is_json {
            serde_json::from_str(&content)?
        } else {
            toml::from_str(&content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, falling back to defaults if the file
    /// does not exist. Runs before logging is set up, so reporting the
    /// fallback is left to the caller.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Validation("name must not be empty".into()));
        }
        if self.trainer.epochs == 0 {
            return Err(ConfigError::Validation(
                "trainer.epochs must be > 0".into(),
            ));
        }
        if self.trainer.save_freq == 0 {
            return Err(ConfigError::Validation(
                "trainer.save_freq must be > 0".into(),
            ));
        }
        if self.trainer.monitor_mode != MonitorMode::Off && self.trainer.monitor.trim().is_empty()
        {
            return Err(ConfigError::Validation(
                "trainer.monitor must name a metric unless monitor_mode is off".into(),
            ));
        }

        if self.optimizers.is_empty() {
            return Err(ConfigError::Validation(
                "at least one [[optimizers]] entry is required".into(),
            ));
        }
        for (i, opt) in self.optimizers.iter().enumerate() {
            if opt.kind.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "optimizers[{i}].type must not be empty"
                )));
            }
            if opt.lr <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "optimizers[{i}].lr must be > 0"
                )));
            }
            if !(0.0..1.0).contains(&opt.beta1) || !(0.0..1.0).contains(&opt.beta2) {
                return Err(ConfigError::Validation(format!(
                    "optimizers[{i}].beta1 and beta2 must be in [0, 1)"
                )));
            }
            if opt.weight_decay < 0.0 {
                return Err(ConfigError::Validation(format!(
                    "optimizers[{i}].weight_decay must be >= 0"
                )));
            }
        }

        if self.arch.noise_dim == 0
            || self.arch.generator_features == 0
            || self.arch.discriminator_features == 0
            || self.arch.hidden_dim == 0
        {
            return Err(ConfigError::Validation(
                "arch dimensions must be > 0".into(),
            ));
        }
        if self.arch.init_std <= 0.0 {
            return Err(ConfigError::Validation(
                "arch.init_std must be > 0".into(),
            ));
        }
        if self.ebgan.margin <= 0.0 {
            return Err(ConfigError::Validation(
                "ebgan.margin must be > 0".into(),
            ));
        }
        if self.ebgan.pt_weight < 0.0 {
            return Err(ConfigError::Validation(
                "ebgan.pt_weight must be >= 0".into(),
            ));
        }
        if self.data.batch_size == 0 {
            return Err(ConfigError::Validation(
                "data.batch_size must be > 0".into(),
            ));
        }
        if self.data.train_batches == 0 {
            return Err(ConfigError::Validation(
                "data.train_batches must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Logging filter directive for `trainer.verbosity`.
    pub fn log_level(&self) -> &'static str {
        match self.trainer.verbosity {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }

    /// Generate a TOML string with all default values (useful for creating
    /// example config files).
    pub fn default_toml() -> Result<String, ConfigError> {
        toml::to_string_pretty(&AppConfig::default())
            .map_err(|e| ConfigError::Validation(format!("default config does not serialize: {e}")))
    }
}
