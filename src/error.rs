use std::path::PathBuf;

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("corrupt checkpoint at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("failed to save state of {component}-{index}: {message}")]
    StateSave {
        component: Component,
        index: usize,
        message: String,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CheckpointError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CheckpointError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        CheckpointError::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Errors that abort a training run.
#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("session exposes no training units")]
    NoUnits,

    #[error("training step failed at epoch {epoch}: {source}")]
    Step {
        epoch: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("epoch {epoch} reported {got} {group} metric values, {expected} metrics are registered")]
    MetricArity {
        epoch: usize,
        group: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("epoch {epoch} reports '{key}' twice, a metric name clashes with another value")]
    MetricCollision { epoch: usize, key: String },

    #[error("log entry for epoch {epoch} does not follow epoch {last}")]
    LogOrder { epoch: usize, last: usize },

    #[error("trainer already left the initializing state")]
    AlreadyStarted,

    #[error("failed to open scalar event file {path}: {source}")]
    Visualization {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("config validation error: {0}")]
    Validation(String),
}

/// Which half of a checkpoint a piece of state belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Unit,
    Optimizer,
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Component::Unit => f.write_str("unit"),
            Component::Optimizer => f.write_str("optimizer"),
        }
    }
}

/// Recoverable conditions. The run continues with a safe default and the
/// warning is logged and kept for inspection.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RunWarning {
    #[error("no accelerator available on this machine ({requested} requested), training will run on CPU")]
    NoAccelerator { requested: usize },

    #[error("{requested} devices configured but only {available} available, using {available}")]
    DevicesClamped { requested: usize, available: usize },

    #[error("cannot recognize metric named '{metric}' for performance monitoring, model_best checkpoint won't be updated")]
    UnrecognizedMonitorMetric { metric: String },

    #[error("{component}-{index} state could not be restored, keeping fresh state: {reason}")]
    StateMismatch {
        component: Component,
        index: usize,
        reason: String,
    },

    #[error("unit-{index} architecture differs from checkpoint (saved '{saved}', current '{current}')")]
    ArchitectureMismatch {
        index: usize,
        saved: String,
        current: String,
    },

    #[error("checkpoint monitored '{saved}' but this run monitors '{current}', best value reset")]
    MonitorChanged { saved: String, current: String },

    #[error("optimizer-{index} type differs from checkpoint (saved '{saved}', configured '{configured}'), optimizer state not resumed")]
    OptimizerTypeMismatch {
        index: usize,
        saved: String,
        configured: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_checkpoint_display() {
        let err = CheckpointError::corrupt("saved/run/checkpoint-epoch5", "missing field `epoch`");
        assert_eq!(
            err.to_string(),
            "corrupt checkpoint at saved/run/checkpoint-epoch5: missing field `epoch`"
        );
    }

    #[test]
    fn test_metric_arity_display() {
        let err = TrainingError::MetricArity {
            epoch: 3,
            group: "validation",
            expected: 2,
            got: 1,
        };
        assert_eq!(
            err.to_string(),
            "epoch 3 reported 1 validation metric values, 2 metrics are registered"
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Validation("trainer.epochs must be > 0".to_string());
        assert_eq!(
            err.to_string(),
            "config validation error: trainer.epochs must be > 0"
        );
    }

    #[test]
    fn test_optimizer_mismatch_warning_display() {
        let warning = RunWarning::OptimizerTypeMismatch {
            index: 1,
            saved: "Adam".into(),
            configured: "SGD".into(),
        };
        assert_eq!(
            warning.to_string(),
            "optimizer-1 type differs from checkpoint (saved 'Adam', configured 'SGD'), optimizer state not resumed"
        );
    }

    #[test]
    fn test_step_error_keeps_source() {
        use std::error::Error as _;
        let err = TrainingError::Step {
            epoch: 7,
            source: anyhow::anyhow!("loss diverged to NaN"),
        };
        assert_eq!(err.to_string(), "training step failed at epoch 7: loss diverged to NaN");
        assert!(err.source().is_some());
    }
}
