use serde::{Deserialize, Serialize};

use crate::error::RunWarning;
use crate::training::metrics::LogEntry;

/// Direction in which the monitored metric improves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorMode {
    #[default]
    Min,
    Max,
    Off,
}

impl MonitorMode {
    /// Starting value of the running best. `Off` never compares, so its value
    /// only matters for what ends up in the checkpoint.
    pub fn initial_best(self) -> f64 {
        match self {
            MonitorMode::Min => f64::INFINITY,
            MonitorMode::Max | MonitorMode::Off => f64::NEG_INFINITY,
        }
    }

    /// Name as written in the config.
    pub fn as_str(self) -> &'static str {
        match self {
            MonitorMode::Min => "min",
            MonitorMode::Max => "max",
            MonitorMode::Off => "off",
        }
    }

    /// Strict comparison. Ties and NaN never improve.
    pub fn improves(self, value: f64, best: f64) -> bool {
        match self {
            MonitorMode::Min => value < best,
            MonitorMode::Max => value > best,
            MonitorMode::Off => false,
        }
    }
}

/// Outcome of checking one log entry against the running best.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Improved { previous: f64, value: f64 },
    NotImproved { value: f64 },
    /// The monitored key is not in the entry. Carries the warning the first
    /// time this happens on the first epoch of the run.
    Missing { warning: Option<RunWarning> },
    Disabled,
}

/// Tracks the best value of one metric across epochs.
#[derive(Debug, Clone)]
pub struct BestTracker {
    mode: MonitorMode,
    metric: String,
    best: f64,
    warned: bool,
}

impl BestTracker {
    pub fn new(mode: MonitorMode, metric: impl Into<String>) -> Self {
        BestTracker {
            mode,
            metric: metric.into(),
            best: mode.initial_best(),
            warned: false,
        }
    }

    /// Continue from a best value read out of a checkpoint.
    pub fn restore(&mut self, best: f64) {
        self.best = best;
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn mode(&self) -> MonitorMode {
        self.mode
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// Check `entry`. `first_epoch` is true only for epoch 1 of the run,
    /// the only epoch that may report a missing key.
    pub fn observe(&mut self, entry: &LogEntry, first_epoch: bool) -> Observation {
        if self.mode == MonitorMode::Off {
            return Observation::Disabled;
        }
        let Some(value) = entry.get(&self.metric) else {
            let warning = if first_epoch && !self.warned {
                self.warned = true;
                Some(RunWarning::UnrecognizedMonitorMetric {
                    metric: self.metric.clone(),
                })
            } else {
                None
            };
            return Observation::Missing { warning };
        };
        if self.mode.improves(value, self.best) {
            let previous = self.best;
            self.best = value;
            Observation::Improved { previous, value }
        } else {
            Observation::NotImproved { value }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn entry(epoch: usize, key: &str, value: f64) -> LogEntry {
        let mut values = BTreeMap::new();
        values.insert(key.to_string(), value);
        LogEntry { epoch, values }
    }

    fn run(mode: MonitorMode, series: &[f64]) -> (Vec<f64>, Vec<usize>) {
        let mut tracker = BestTracker::new(mode, "val_loss");
        let mut bests = Vec::new();
        let mut flagged = Vec::new();
        for (i, value) in series.iter().enumerate() {
            let observation = tracker.observe(&entry(i + 1, "val_loss", *value), i == 0);
            if matches!(observation, Observation::Improved { .. }) {
                flagged.push(i);
            }
            bests.push(tracker.best());
        }
        (bests, flagged)
    }

    #[test]
    fn test_min_mode_running_best() {
        let (bests, flagged) = run(MonitorMode::Min, &[5.0, 3.0, 3.0, 4.0, 2.0]);
        assert_eq!(bests, vec![5.0, 3.0, 3.0, 3.0, 2.0]);
        assert_eq!(flagged, vec![0, 1, 4]);
    }

    #[test]
    fn test_max_mode_mirrors_min() {
        let (bests, flagged) = run(MonitorMode::Max, &[-5.0, -3.0, -3.0, -4.0, -2.0]);
        assert_eq!(bests, vec![-5.0, -3.0, -3.0, -3.0, -2.0]);
        assert_eq!(flagged, vec![0, 1, 4]);
    }

    #[test]
    fn test_nan_never_improves() {
        let (bests, flagged) = run(MonitorMode::Min, &[f64::NAN, 1.0, f64::NAN]);
        assert!(bests[0].is_infinite());
        assert_eq!(bests[2], 1.0);
        assert_eq!(flagged, vec![1]);
    }

    #[test]
    fn test_missing_metric_warns_once() {
        let mut tracker = BestTracker::new(MonitorMode::Min, "val_accuracy");
        let first = tracker.observe(&entry(1, "loss", 1.0), true);
        assert_eq!(
            first,
            Observation::Missing {
                warning: Some(RunWarning::UnrecognizedMonitorMetric {
                    metric: "val_accuracy".to_string()
                })
            }
        );
        let second = tracker.observe(&entry(2, "loss", 0.5), false);
        assert_eq!(second, Observation::Missing { warning: None });
        assert_eq!(tracker.best(), f64::INFINITY);
    }

    #[test]
    fn test_off_mode_is_disabled() {
        let mut tracker = BestTracker::new(MonitorMode::Off, "loss");
        assert_eq!(tracker.observe(&entry(1, "loss", 1.0), true), Observation::Disabled);
    }

    #[test]
    fn test_mode_parses_lowercase() {
        #[derive(Deserialize)]
        struct Holder {
            mode: MonitorMode,
        }
        let holder: Holder = toml::from_str("mode = \"max\"").unwrap();
        assert_eq!(holder.mode, MonitorMode::Max);
        assert!(toml::from_str::<Holder>("mode = \"sideways\"").is_err());
    }
}
