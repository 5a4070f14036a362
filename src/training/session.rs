use std::path::{Path, PathBuf};

use crate::device::DeviceSelection;
use crate::training::metrics::EpochResult;

/// Error type at the persistence seam. Units and optimizers wrap whatever
/// their backend's recorder reports.
pub type UnitResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// One trainable module owned by a session.
pub trait TrainingUnit {
    /// Stable architecture name stored in checkpoints ("Generator", ...).
    fn arch(&self) -> &str;

    /// Persist weights next to `stem`. Implementations pick the extension and
    /// return the path actually written, which must share `stem`'s directory.
    fn save_state(&self, stem: &Path) -> UnitResult<PathBuf>;

    /// Replace weights with those stored at `path`. On error the current
    /// weights must be left untouched.
    fn load_state(&mut self, path: &Path) -> UnitResult<()>;
}

/// Optimizer state paired 1:1 with a unit at the same index.
pub trait UnitOptimizer {
    /// Declared optimizer type ("Adam"). Saved state is only applied to an
    /// optimizer of the same type.
    fn kind(&self) -> &str;

    fn save_state(&self, stem: &Path) -> UnitResult<PathBuf>;

    fn load_state(&mut self, path: &Path) -> UnitResult<()>;
}

/// The pluggable part of a run: owns units and optimizers and knows how to
/// train them for one epoch. The trainer drives everything else.
pub trait TrainingSession {
    /// Units in a fixed order. Single-unit sessions return one element.
    fn units(&self) -> Vec<&dyn TrainingUnit>;

    fn units_mut(&mut self) -> Vec<&mut dyn TrainingUnit>;

    /// Optimizers, index-aligned with [`TrainingSession::units`].
    fn optimizers(&self) -> Vec<&dyn UnitOptimizer>;

    fn optimizers_mut(&mut self) -> Vec<&mut dyn UnitOptimizer>;

    /// Registered metric names. `EpochResult::metrics` is positional against
    /// this list.
    fn metric_names(&self) -> Vec<String>;

    /// Move or replicate units onto the selected devices. Called once before
    /// any checkpoint is restored.
    fn place(&mut self, _devices: &DeviceSelection) {}

    /// Train (and optionally validate) for one epoch.
    fn train_epoch(&mut self, epoch: usize) -> anyhow::Result<EpochResult>;
}
