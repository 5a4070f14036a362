//! Checkpoint persistence: epoch directories with a JSON manifest, per-unit
//! and per-optimizer state files, and a `model_best` mirror.

mod manager;
mod record;

pub use manager::{
    latest_checkpoint, list_checkpoints, CheckpointStore, LoadedCheckpoint, SavedCheckpoint,
    Snapshot, BEST_DIR, CONFIG_FILE,
};
pub use record::{CheckpointRecord, OptimizerEntry, UnitEntry, CHECKPOINT_VERSION, MANIFEST_FILE};
