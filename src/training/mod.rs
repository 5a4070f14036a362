//! Training infrastructure: the session seam, the epoch-loop trainer, metric
//! log, best-model monitor and scalar event output.

pub mod metrics;
pub mod monitor;
pub mod session;
pub mod trainer;
pub mod visualization;

pub use metrics::{EpochResult, LogEntry, MetricLog, MetricSet};
pub use monitor::{BestTracker, MonitorMode};
pub use session::{TrainingSession, TrainingUnit, UnitOptimizer, UnitResult};
pub use trainer::{RunContext, Trainer, TrainerState, TrainingSummary};
