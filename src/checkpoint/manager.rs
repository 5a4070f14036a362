use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::checkpoint::record::{
    CheckpointRecord, OptimizerEntry, UnitEntry, CHECKPOINT_VERSION, MANIFEST_FILE,
};
use crate::error::{CheckpointError, Component, RunWarning};
use crate::training::metrics::MetricLog;
use crate::training::session::{TrainingUnit, UnitOptimizer};

/// Directory holding the copy of the most recent best-flagged checkpoint.
pub const BEST_DIR: &str = "model_best";

/// Resolved run configuration, written once per run directory.
pub const CONFIG_FILE: &str = "config.json";

const EPOCH_DIR_PREFIX: &str = "checkpoint-epoch";
const TMP_SUFFIX: &str = ".tmp";

/// Borrowed view of the state to persist at one epoch.
pub struct Snapshot<'a> {
    pub epoch: usize,
    pub monitor_best: f64,
    pub units: &'a [&'a dyn TrainingUnit],
    pub optimizers: &'a [&'a dyn UnitOptimizer],
    pub config: &'a serde_json::Value,
    pub log: &'a MetricLog,
    pub is_best: bool,
}

/// Where a save landed.
#[derive(Debug, Clone)]
pub struct SavedCheckpoint {
    pub path: PathBuf,
    pub best_path: Option<PathBuf>,
    pub record: CheckpointRecord,
}

/// A parsed and validated checkpoint, ready to be applied to a session.
#[derive(Debug, Clone)]
pub struct LoadedCheckpoint {
    pub path: PathBuf,
    pub record: CheckpointRecord,
}

/// Writes checkpoints of one run into `<run_dir>/checkpoint-epoch<E>/`.
pub struct CheckpointStore {
    run_dir: PathBuf,
    keep_last: usize,
}

impl CheckpointStore {
    /// `keep_last == 0` keeps every epoch checkpoint.
    pub fn new(run_dir: impl Into<PathBuf>, keep_last: usize) -> Result<Self, CheckpointError> {
        let run_dir = run_dir.into();
        fs::create_dir_all(&run_dir).map_err(|e| CheckpointError::io(&run_dir, e))?;
        Ok(CheckpointStore { run_dir, keep_last })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn best_dir(&self) -> PathBuf {
        self.run_dir.join(BEST_DIR)
    }

    /// Write the resolved run config to `<run_dir>/config.json`.
    pub fn write_config(&self, config: &serde_json::Value) -> Result<PathBuf, CheckpointError> {
        let path = self.run_dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(config)?;
        fs::write(&path, json).map_err(|e| CheckpointError::io(&path, e))?;
        Ok(path)
    }

    /// Persist `snapshot`. The checkpoint is assembled in a `.tmp` sibling and
    /// renamed into place, so a crash never leaves a half-written epoch
    /// directory behind.
    pub fn save(&self, snapshot: &Snapshot<'_>) -> Result<SavedCheckpoint, CheckpointError> {
        let dir_name = format!("{EPOCH_DIR_PREFIX}{}", snapshot.epoch);
        let tmp_dir = self.run_dir.join(format!("{dir_name}{TMP_SUFFIX}"));
        let final_dir = self.run_dir.join(&dir_name);

        fresh_dir(&tmp_dir)?;
        let record = write_snapshot(&tmp_dir, snapshot)?;
        replace_dir(&tmp_dir, &final_dir)?;
        info!("Saving checkpoint: {} ...", final_dir.display());

        let best_path = if snapshot.is_best {
            let best_dir = self.best_dir();
            let best_tmp = self.run_dir.join(format!("{BEST_DIR}{TMP_SUFFIX}"));
            fresh_dir(&best_tmp)?;
            copy_files(&final_dir, &best_tmp)?;
            replace_dir(&best_tmp, &best_dir)?;
            info!("Saving current best: {BEST_DIR} ...");
            Some(best_dir)
        } else {
            None
        };

        self.prune()?;

        Ok(SavedCheckpoint {
            path: final_dir,
            best_path,
            record,
        })
    }

    /// Read a checkpoint from its directory or its manifest file.
    pub fn load(path: &Path) -> Result<LoadedCheckpoint, CheckpointError> {
        let dir = if path.is_file() {
            path.parent().unwrap_or(Path::new(".")).to_path_buf()
        } else {
            path.to_path_buf()
        };
        let manifest = dir.join(MANIFEST_FILE);

        let json = match fs::read_to_string(&manifest) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CheckpointError::corrupt(&dir, format!("{MANIFEST_FILE} not found")));
            }
            Err(e) => return Err(CheckpointError::io(&manifest, e)),
        };
        let record: CheckpointRecord =
            serde_json::from_str(&json).map_err(|e| CheckpointError::corrupt(&dir, e.to_string()))?;
        record.validate(&dir)?;

        debug!(
            epoch = record.epoch,
            units = record.units.len(),
            "checkpoint manifest parsed"
        );
        Ok(LoadedCheckpoint { path: dir, record })
    }

    /// Epoch checkpoints in the run directory, ascending by epoch.
    pub fn list_checkpoints(&self) -> Result<Vec<(usize, PathBuf)>, CheckpointError> {
        list_checkpoints(&self.run_dir)
    }

    /// Drop the oldest epoch checkpoints beyond `keep_last`. `model_best`
    /// is never touched.
    pub fn prune(&self) -> Result<usize, CheckpointError> {
        if self.keep_last == 0 {
            return Ok(0);
        }
        let checkpoints = self.list_checkpoints()?;
        let excess = checkpoints.len().saturating_sub(self.keep_last);
        for (epoch, path) in checkpoints.iter().take(excess) {
            debug!(epoch, "pruning checkpoint {}", path.display());
            fs::remove_dir_all(path).map_err(|e| CheckpointError::io(path, e))?;
        }
        Ok(excess)
    }
}

/// Epoch checkpoints under `run_dir`, ascending by epoch. Unfinished `.tmp`
/// directories are ignored.
pub fn list_checkpoints(run_dir: &Path) -> Result<Vec<(usize, PathBuf)>, CheckpointError> {
    let entries = match fs::read_dir(run_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CheckpointError::io(run_dir, e)),
    };
    let mut results = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| CheckpointError::io(run_dir, e))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let epoch = name
            .to_str()
            .and_then(|n| n.strip_prefix(EPOCH_DIR_PREFIX))
            .and_then(|n| n.parse::<usize>().ok());
        if let Some(epoch) = epoch {
            results.push((epoch, path));
        }
    }
    results.sort_by_key(|(epoch, _)| *epoch);
    Ok(results)
}

/// Highest-epoch checkpoint under `run_dir`, if any.
pub fn latest_checkpoint(run_dir: &Path) -> Result<Option<PathBuf>, CheckpointError> {
    Ok(list_checkpoints(run_dir)?.pop().map(|(_, path)| path))
}

impl LoadedCheckpoint {
    pub fn epoch(&self) -> usize {
        self.record.epoch
    }

    /// Apply saved weights unit by unit. A unit that cannot take its saved
    /// state keeps its fresh weights and produces a warning.
    pub fn restore_units(&self, units: Vec<&mut dyn TrainingUnit>) -> Vec<RunWarning> {
        let mut warnings = Vec::new();
        let count = units.len();
        for (index, unit) in units.into_iter().enumerate() {
            let Some(entry) = self.record.units.get(index) else {
                emit(
                    &mut warnings,
                    RunWarning::StateMismatch {
                        component: Component::Unit,
                        index,
                        reason: "checkpoint has no entry for this unit".to_string(),
                    },
                );
                continue;
            };
            if entry.arch != unit.arch() {
                emit(
                    &mut warnings,
                    RunWarning::ArchitectureMismatch {
                        index,
                        saved: entry.arch.clone(),
                        current: unit.arch().to_string(),
                    },
                );
            }
            if let Err(e) = unit.load_state(&self.path.join(&entry.file)) {
                emit(
                    &mut warnings,
                    RunWarning::StateMismatch {
                        component: Component::Unit,
                        index,
                        reason: e.to_string(),
                    },
                );
            }
        }
        for entry in self.record.units.iter().skip(count) {
            emit(
                &mut warnings,
                RunWarning::StateMismatch {
                    component: Component::Unit,
                    index: entry.index,
                    reason: "session has no unit at this index".to_string(),
                },
            );
        }
        warnings
    }

    /// Apply saved optimizer state. Only slots whose saved type matches the
    /// configured type are touched.
    pub fn restore_optimizers(&self, optimizers: Vec<&mut dyn UnitOptimizer>) -> Vec<RunWarning> {
        let mut warnings = Vec::new();
        for (index, optimizer) in optimizers.into_iter().enumerate() {
            let Some(entry) = self.record.optimizers.get(index) else {
                emit(
                    &mut warnings,
                    RunWarning::StateMismatch {
                        component: Component::Optimizer,
                        index,
                        reason: "checkpoint has no entry for this optimizer".to_string(),
                    },
                );
                continue;
            };
            if entry.kind != optimizer.kind() {
                emit(
                    &mut warnings,
                    RunWarning::OptimizerTypeMismatch {
                        index,
                        saved: entry.kind.clone(),
                        configured: optimizer.kind().to_string(),
                    },
                );
                continue;
            }
            if let Err(e) = optimizer.load_state(&self.path.join(&entry.file)) {
                emit(
                    &mut warnings,
                    RunWarning::StateMismatch {
                        component: Component::Optimizer,
                        index,
                        reason: e.to_string(),
                    },
                );
            }
        }
        warnings
    }
}

fn emit(warnings: &mut Vec<RunWarning>, warning: RunWarning) {
    warn!("{warning}");
    warnings.push(warning);
}

fn write_snapshot(dir: &Path, snapshot: &Snapshot<'_>) -> Result<CheckpointRecord, CheckpointError> {
    let mut units = Vec::with_capacity(snapshot.units.len());
    for (index, unit) in snapshot.units.iter().enumerate() {
        let written = unit
            .save_state(&dir.join(format!("unit-{index}")))
            .map_err(|e| state_save(Component::Unit, index, e.to_string()))?;
        units.push(UnitEntry {
            index,
            arch: unit.arch().to_string(),
            file: written_name(dir, &written, Component::Unit, index)?,
        });
    }

    let mut optimizers = Vec::with_capacity(snapshot.optimizers.len());
    for (index, optimizer) in snapshot.optimizers.iter().enumerate() {
        let written = optimizer
            .save_state(&dir.join(format!("optimizer-{index}")))
            .map_err(|e| state_save(Component::Optimizer, index, e.to_string()))?;
        optimizers.push(OptimizerEntry {
            index,
            kind: optimizer.kind().to_string(),
            file: written_name(dir, &written, Component::Optimizer, index)?,
        });
    }

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let record = CheckpointRecord {
        version: CHECKPOINT_VERSION,
        epoch: snapshot.epoch,
        monitor_best: snapshot.monitor_best,
        timestamp,
        units,
        optimizers,
        config: snapshot.config.clone(),
        log: snapshot.log.clone(),
    };
    let manifest = dir.join(MANIFEST_FILE);
    let json = serde_json::to_string_pretty(&record)?;
    fs::write(&manifest, json).map_err(|e| CheckpointError::io(&manifest, e))?;
    Ok(record)
}

fn state_save(component: Component, index: usize, message: String) -> CheckpointError {
    CheckpointError::StateSave {
        component,
        index,
        message,
    }
}

/// File name of a written state file, which must sit directly in `dir`.
fn written_name(
    dir: &Path,
    written: &Path,
    component: Component,
    index: usize,
) -> Result<String, CheckpointError> {
    let name = written
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|_| written.parent() == Some(dir) && written.is_file());
    match name {
        Some(name) => Ok(name.to_string()),
        None => Err(state_save(
            component,
            index,
            format!("state was not written inside {}", dir.display()),
        )),
    }
}

fn fresh_dir(dir: &Path) -> Result<(), CheckpointError> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(|e| CheckpointError::io(dir, e))?;
    }
    fs::create_dir_all(dir).map_err(|e| CheckpointError::io(dir, e))
}

fn replace_dir(from: &Path, to: &Path) -> Result<(), CheckpointError> {
    if to.exists() {
        fs::remove_dir_all(to).map_err(|e| CheckpointError::io(to, e))?;
    }
    fs::rename(from, to).map_err(|e| CheckpointError::io(to, e))
}

fn copy_files(from: &Path, to: &Path) -> Result<(), CheckpointError> {
    for entry in fs::read_dir(from).map_err(|e| CheckpointError::io(from, e))? {
        let entry = entry.map_err(|e| CheckpointError::io(from, e))?;
        let source = entry.path();
        if source.is_file() {
            let target = to.join(entry.file_name());
            fs::copy(&source, &target).map_err(|e| CheckpointError::io(&target, e))?;
        }
    }
    Ok(())
}
