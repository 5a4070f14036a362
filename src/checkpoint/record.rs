use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CheckpointError;
use crate::training::metrics::MetricLog;

/// Manifest format version. Bumped when the manifest layout changes.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Manifest file inside every checkpoint directory.
pub const MANIFEST_FILE: &str = "checkpoint.json";

/// Weights of one unit, by position in the session's unit list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitEntry {
    pub index: usize,
    pub arch: String,
    /// File name relative to the checkpoint directory.
    pub file: String,
}

/// State of one optimizer, index-aligned with the units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerEntry {
    pub index: usize,
    #[serde(rename = "type")]
    pub kind: String,
    pub file: String,
}

/// Everything `checkpoint.json` holds. Written once, never modified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub version: u32,
    pub epoch: usize,
    #[serde(with = "crate::serde_float")]
    pub monitor_best: f64,
    pub timestamp: u64,
    pub units: Vec<UnitEntry>,
    pub optimizers: Vec<OptimizerEntry>,
    /// Resolved run configuration, stored as written.
    pub config: serde_json::Value,
    #[serde(rename = "logger")]
    pub log: MetricLog,
}

impl CheckpointRecord {
    /// Structural checks that serde cannot express. `dir` is the checkpoint
    /// directory the referenced files must live in.
    pub fn validate(&self, dir: &Path) -> Result<(), CheckpointError> {
        if self.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::corrupt(
                dir,
                format!(
                    "unsupported checkpoint version {} (expected {CHECKPOINT_VERSION})",
                    self.version
                ),
            ));
        }
        for (position, unit) in self.units.iter().enumerate() {
            if unit.index != position {
                return Err(CheckpointError::corrupt(
                    dir,
                    format!("unit entry {position} is labelled index {}", unit.index),
                ));
            }
            require_file(dir, &unit.file)?;
        }
        for (position, optimizer) in self.optimizers.iter().enumerate() {
            if optimizer.index != position {
                return Err(CheckpointError::corrupt(
                    dir,
                    format!("optimizer entry {position} is labelled index {}", optimizer.index),
                ));
            }
            require_file(dir, &optimizer.file)?;
        }
        if let Some(last) = self.log.last() {
            if last.epoch > self.epoch {
                return Err(CheckpointError::corrupt(
                    dir,
                    format!(
                        "log runs to epoch {} but checkpoint is for epoch {}",
                        last.epoch, self.epoch
                    ),
                ));
            }
        }
        Ok(())
    }
}

fn require_file(dir: &Path, file: &str) -> Result<(), CheckpointError> {
    let path = dir.join(file);
    if Path::new(file).components().count() != 1 || !path.is_file() {
        return Err(CheckpointError::corrupt(
            dir,
            format!("referenced state file '{file}' is missing"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn record() -> CheckpointRecord {
        CheckpointRecord {
            version: CHECKPOINT_VERSION,
            epoch: 4,
            monitor_best: f64::INFINITY,
            timestamp: 1_700_000_000,
            units: vec![UnitEntry {
                index: 0,
                arch: "Generator".to_string(),
                file: "unit-0.mpk".to_string(),
            }],
            optimizers: vec![OptimizerEntry {
                index: 0,
                kind: "Adam".to_string(),
                file: "optimizer-0.mpk".to_string(),
            }],
            config: serde_json::json!({ "name": "EBGAN" }),
            log: MetricLog::new(),
        }
    }

    #[test]
    fn test_manifest_json_shape() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["monitor_best"], "inf");
        assert_eq!(json["optimizers"][0]["type"], "Adam");
        assert!(json["logger"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_validate_requires_state_files() {
        let dir = tempfile::tempdir().unwrap();
        let err = record().validate(dir.path()).unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt { .. }));

        fs::write(dir.path().join("unit-0.mpk"), b"w").unwrap();
        fs::write(dir.path().join("optimizer-0.mpk"), b"o").unwrap();
        record().validate(dir.path()).unwrap();
    }

    #[test]
    fn test_validate_rejects_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = record();
        rec.units.clear();
        rec.optimizers.clear();
        rec.version = 99;
        let err = rec.validate(dir.path()).unwrap_err();
        assert!(err.to_string().contains("unsupported checkpoint version 99"));
    }

    #[test]
    fn test_validate_rejects_paths_outside_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = record();
        rec.optimizers.clear();
        rec.units[0].file = "../unit-0.mpk".to_string();
        assert!(rec.validate(dir.path()).is_err());
    }
}
