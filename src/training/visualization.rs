use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::error::TrainingError;
use crate::training::metrics::LogEntry;

/// File the scalar events of one run are appended to.
pub const EVENTS_FILE: &str = "scalars.jsonl";

#[derive(Serialize)]
struct ScalarEvent<'a> {
    step: usize,
    tag: &'a str,
    #[serde(with = "crate::serde_float")]
    value: f64,
    wall_time: f64,
}

/// Per-run scalar event log, one JSON object per line. A disabled writer
/// accepts every call and writes nothing.
pub struct ScalarWriter {
    events: Option<(PathBuf, BufWriter<File>)>,
}

impl ScalarWriter {
    fn disabled() -> Self {
        ScalarWriter { events: None }
    }

    pub fn create(dir: &Path, enabled: bool) -> Result<Self, TrainingError> {
        if !enabled {
            return Ok(Self::disabled());
        }
        fs::create_dir_all(dir).map_err(|source| TrainingError::Visualization {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(EVENTS_FILE);
        let file = File::options()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| TrainingError::Visualization {
                path: path.clone(),
                source,
            })?;
        tracing::debug!("writing scalar events to {}", path.display());
        Ok(ScalarWriter {
            events: Some((path, BufWriter::new(file))),
        })
    }

    /// Append every value of `entry` at step `entry.epoch`. Write failures
    /// are logged and do not stop training.
    pub fn log_entry(&mut self, entry: &LogEntry) {
        let Some((path, writer)) = self.events.as_mut() else {
            return;
        };
        let wall_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        for (tag, value) in &entry.values {
            let event = ScalarEvent {
                step: entry.epoch,
                tag,
                value: *value,
                wall_time,
            };
            let written = serde_json::to_writer(&mut *writer, &event)
                .map_err(std::io::Error::from)
                .and_then(|()| writer.write_all(b"\n"));
            if let Err(e) = written {
                tracing::warn!("failed to write scalar event to {}: {e}", path.display());
                return;
            }
        }
        if let Err(e) = writer.flush() {
            tracing::warn!("failed to flush scalar events to {}: {e}", path.display());
        }
    }
}
