use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointStore, SavedCheckpoint, Snapshot};
use crate::config::{AppConfig, TrainerSection};
use crate::device::{select_devices, DeviceSelection};
use crate::error::{CheckpointError, ConfigError, RunWarning, TrainingError};
use crate::training::metrics::{LogEntry, MetricLog};
use crate::training::monitor::{BestTracker, MonitorMode, Observation};
use crate::training::session::{TrainingSession, TrainingUnit, UnitOptimizer};
use crate::training::visualization::ScalarWriter;

/// Per-run facts the trainer does not derive itself.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Names the run directory `save_dir/<name>/<run_id>/`.
    pub run_id: String,
    /// Accelerators visible to the backend.
    pub available_accelerators: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Initializing,
    Resuming,
    Running { epoch: usize },
    Completed,
}

/// What a finished `train` call did.
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub first_epoch: usize,
    /// `None` when the resumed checkpoint was already at the final epoch.
    pub last_epoch: Option<usize>,
    pub monitor_best: f64,
    /// Epochs this call flagged as best, in order.
    pub best_epochs: Vec<usize>,
    pub checkpoints: Vec<PathBuf>,
    /// Latest `model_best` write, if any happened in this call.
    pub best_checkpoint: Option<PathBuf>,
}

/// Drives the epoch loop of a [`TrainingSession`]: runs each epoch, logs the
/// results, tracks the monitored metric and writes checkpoints on cadence.
pub struct Trainer<S: TrainingSession> {
    session: S,
    settings: TrainerSection,
    config: serde_json::Value,
    store: CheckpointStore,
    writer: ScalarWriter,
    devices: DeviceSelection,
    metric_names: Vec<String>,
    log: MetricLog,
    tracker: BestTracker,
    start_epoch: usize,
    state: TrainerState,
    warnings: Vec<RunWarning>,
}

impl<S: TrainingSession> Trainer<S> {
    /// Validate the config, place the session on the selected devices and
    /// prepare the run directory.
    pub fn new(mut session: S, config: &AppConfig, context: RunContext) -> Result<Self, TrainingError> {
        config.validate()?;

        let unit_count = session.units().len();
        if unit_count == 0 {
            return Err(TrainingError::NoUnits);
        }
        let optimizer_count = session.optimizers().len();
        if optimizer_count != unit_count {
            return Err(ConfigError::Validation(format!(
                "session has {unit_count} units but {optimizer_count} optimizers"
            ))
            .into());
        }

        let devices = select_devices(config.n_gpu, context.available_accelerators);
        session.place(&devices);
        debug!(
            devices = ?devices.device_ids,
            "training on {}",
            devices.primary()
        );

        let run_dir = config.trainer.save_dir.join(&config.name).join(&context.run_id);
        let store = CheckpointStore::new(&run_dir, config.trainer.keep_last)?;
        let config_json = serde_json::to_value(config).map_err(CheckpointError::from)?;
        store.write_config(&config_json)?;

        let writer_dir = config
            .visualization
            .log_dir
            .join(&config.name)
            .join(&context.run_id);
        let writer = ScalarWriter::create(&writer_dir, config.visualization.tensorboard)?;

        let settings = config.trainer.clone();
        let tracker = BestTracker::new(settings.monitor_mode, settings.monitor.clone());
        let warnings = devices.warnings.clone();
        let metric_names = session.metric_names();

        Ok(Trainer {
            session,
            settings,
            config: config_json,
            store,
            writer,
            devices,
            metric_names,
            log: MetricLog::new(),
            tracker,
            start_epoch: 1,
            state: TrainerState::Initializing,
            warnings,
        })
    }

    /// Continue from the checkpoint at `path`. Must be called before `train`.
    ///
    /// A corrupt checkpoint is fatal. State that does not fit the session is
    /// skipped with a warning and the affected unit or optimizer stays fresh.
    pub fn resume(&mut self, path: &Path) -> Result<(), TrainingError> {
        if self.state != TrainerState::Initializing {
            return Err(TrainingError::AlreadyStarted);
        }
        info!("Loading checkpoint: {} ...", path.display());
        let loaded = CheckpointStore::load(path)?;
        self.state = TrainerState::Resuming;

        let unit_warnings = loaded.restore_units(self.session.units_mut());
        let optimizer_warnings = loaded.restore_optimizers(self.session.optimizers_mut());
        self.warnings.extend(unit_warnings);
        self.warnings.extend(optimizer_warnings);

        self.start_epoch = loaded.epoch() + 1;
        self.restore_best(&loaded.record.config, loaded.record.monitor_best);
        self.log = loaded.record.log;

        info!(
            "Checkpoint '{}' (epoch {}) loaded. Resume training from epoch {}",
            loaded.path.display(),
            loaded.record.epoch,
            self.start_epoch
        );
        Ok(())
    }

    /// Carry the saved best forward only when it was tracked for the same
    /// metric and direction as this run.
    fn restore_best(&mut self, saved_config: &serde_json::Value, best: f64) {
        let trainer = &saved_config["trainer"];
        let (Some(metric), Some(mode)) = (trainer["monitor"].as_str(), trainer["monitor_mode"].as_str())
        else {
            self.tracker.restore(best);
            return;
        };
        let current_mode = self.tracker.mode();
        let changed = mode != current_mode.as_str()
            || (current_mode != MonitorMode::Off && metric != self.tracker.metric());
        if !changed {
            self.tracker.restore(best);
            return;
        }
        let warning = RunWarning::MonitorChanged {
            saved: format!("{mode} {metric}"),
            current: format!("{} {}", current_mode.as_str(), self.tracker.metric()),
        };
        warn!("{warning}");
        self.warnings.push(warning);
    }

    /// Run epochs `start_epoch..=epochs`.
    pub fn train(&mut self) -> Result<TrainingSummary, TrainingError> {
        if !matches!(self.state, TrainerState::Initializing | TrainerState::Resuming) {
            return Err(TrainingError::AlreadyStarted);
        }
        let first_epoch = self.start_epoch;
        let mut summary = TrainingSummary {
            first_epoch,
            last_epoch: None,
            monitor_best: self.tracker.best(),
            best_epochs: Vec::new(),
            checkpoints: Vec::new(),
            best_checkpoint: None,
        };

        for epoch in first_epoch..=self.settings.epochs {
            self.state = TrainerState::Running { epoch };

            let result = self
                .session
                .train_epoch(epoch)
                .map_err(|source| TrainingError::Step { epoch, source })?;
            let entry = result.into_entry(epoch, &self.metric_names)?;
            self.log.append(entry.clone())?;
            self.report(&entry);

            let is_best = self.observe(&entry, epoch == 1);
            if is_best {
                summary.best_epochs.push(epoch);
            }

            if epoch % self.settings.save_freq == 0 {
                let saved = self.save_checkpoint(epoch, is_best)?;
                if let Some(best) = saved.best_path {
                    summary.best_checkpoint = Some(best);
                }
                summary.checkpoints.push(saved.path);
            }
            summary.last_epoch = Some(epoch);
        }

        if summary.last_epoch.is_none() {
            info!(
                "nothing to train: start epoch {} is past the final epoch {}",
                first_epoch, self.settings.epochs
            );
        }
        summary.monitor_best = self.tracker.best();
        self.state = TrainerState::Completed;
        Ok(summary)
    }

    fn report(&mut self, entry: &LogEntry) {
        if self.settings.verbosity >= 1 {
            info!("    {:15}: {}", "epoch", entry.epoch);
            for (key, value) in &entry.values {
                info!("    {:15}: {}", key, value);
            }
        }
        self.writer.log_entry(entry);
    }

    fn observe(&mut self, entry: &LogEntry, first_epoch: bool) -> bool {
        match self.tracker.observe(entry, first_epoch) {
            Observation::Improved { previous, value } => {
                debug!(
                    epoch = entry.epoch,
                    "{} improved from {previous} to {value}",
                    self.tracker.metric()
                );
                true
            }
            Observation::Missing { warning } => {
                if let Some(warning) = warning {
                    warn!("{warning}");
                    self.warnings.push(warning);
                }
                false
            }
            Observation::NotImproved { .. } | Observation::Disabled => false,
        }
    }

    fn save_checkpoint(&self, epoch: usize, is_best: bool) -> Result<SavedCheckpoint, TrainingError> {
        let units: Vec<&dyn TrainingUnit> = self.session.units();
        let optimizers: Vec<&dyn UnitOptimizer> = self.session.optimizers();
        let snapshot = Snapshot {
            epoch,
            monitor_best: self.tracker.best(),
            units: &units,
            optimizers: &optimizers,
            config: &self.config,
            log: &self.log,
            is_best,
        };
        Ok(self.store.save(&snapshot)?)
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    pub fn start_epoch(&self) -> usize {
        self.start_epoch
    }

    pub fn monitor_best(&self) -> f64 {
        self.tracker.best()
    }

    pub fn monitor_mode(&self) -> MonitorMode {
        self.tracker.mode()
    }

    pub fn log(&self) -> &MetricLog {
        &self.log
    }

    /// Every non-fatal condition raised so far, in order.
    pub fn warnings(&self) -> &[RunWarning] {
        &self.warnings
    }

    pub fn devices(&self) -> &DeviceSelection {
        &self.devices
    }

    pub fn run_dir(&self) -> &Path {
        self.store.run_dir()
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn into_session(self) -> S {
        self.session
    }
}
