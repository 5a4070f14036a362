use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::TrainingError;

/// Prefix that distinguishes a validation-phase metric from the training
/// value of the same metric.
pub const VALIDATION_PREFIX: &str = "val_";

/// What one call of the training step produced.
///
/// `metrics` and `val_metrics` are positional: value `i` belongs to the
/// `i`-th registered metric name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochResult {
    pub scalars: BTreeMap<String, f64>,
    pub metrics: Vec<f64>,
    pub val_metrics: Option<Vec<f64>>,
}

impl EpochResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scalar(mut self, name: impl Into<String>, value: f64) -> Self {
        self.scalars.insert(name.into(), value);
        self
    }

    pub fn with_metrics(mut self, values: Vec<f64>) -> Self {
        self.metrics = values;
        self
    }

    pub fn with_val_metrics(mut self, values: Vec<f64>) -> Self {
        self.val_metrics = Some(values);
        self
    }

    /// Flatten into a log entry keyed by metric name. Free scalars keep their
    /// own names.
    pub fn into_entry(self, epoch: usize, names: &[String]) -> Result<LogEntry, TrainingError> {
        if self.metrics.len() != names.len() {
            return Err(TrainingError::MetricArity {
                epoch,
                group: "training",
                expected: names.len(),
                got: self.metrics.len(),
            });
        }
        let mut values = self.scalars;
        for (name, value) in names.iter().zip(self.metrics) {
            if values.insert(name.clone(), value).is_some() {
                return Err(TrainingError::MetricCollision {
                    epoch,
                    key: name.clone(),
                });
            }
        }
        if let Some(val_metrics) = self.val_metrics {
            if val_metrics.len() != names.len() {
                return Err(TrainingError::MetricArity {
                    epoch,
                    group: "validation",
                    expected: names.len(),
                    got: val_metrics.len(),
                });
            }
            for (name, value) in names.iter().zip(val_metrics) {
                let key = format!("{VALIDATION_PREFIX}{name}");
                if values.contains_key(&key) {
                    return Err(TrainingError::MetricCollision { epoch, key });
                }
                values.insert(key, value);
            }
        }
        Ok(LogEntry { epoch, values })
    }
}

/// One epoch of the metric log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub epoch: usize,
    #[serde(with = "crate::serde_float::map")]
    pub values: BTreeMap<String, f64>,
}

impl LogEntry {
    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }
}

/// Append-only history of epoch results. Epochs are strictly increasing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<LogEntry>", into = "Vec<LogEntry>")]
pub struct MetricLog {
    entries: Vec<LogEntry>,
}

impl MetricLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: LogEntry) -> Result<(), TrainingError> {
        if let Some(last) = self.entries.last() {
            if entry.epoch <= last.epoch {
                return Err(TrainingError::LogOrder {
                    epoch: entry.epoch,
                    last: last.epoch,
                });
            }
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn get(&self, epoch: usize) -> Option<&LogEntry> {
        self.entries
            .binary_search_by_key(&epoch, |e| e.epoch)
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Values of `key` in epoch order, skipping epochs without it.
    pub fn series(&self, key: &str) -> Vec<(usize, f64)> {
        self.entries
            .iter()
            .filter_map(|e| e.get(key).map(|v| (e.epoch, v)))
            .collect()
    }
}

impl TryFrom<Vec<LogEntry>> for MetricLog {
    type Error = String;

    fn try_from(entries: Vec<LogEntry>) -> Result<Self, Self::Error> {
        if let Some(pair) = entries.windows(2).find(|w| w[1].epoch <= w[0].epoch) {
            return Err(format!(
                "log epochs out of order ({} after {})",
                pair[1].epoch, pair[0].epoch
            ));
        }
        Ok(MetricLog { entries })
    }
}

impl From<MetricLog> for Vec<LogEntry> {
    fn from(log: MetricLog) -> Self {
        log.entries
    }
}

type Evaluator<I> = Box<dyn Fn(&I) -> f64 + Send + Sync>;

/// A named metric. The name is the log key.
pub struct Metric<I> {
    name: String,
    evaluator: Evaluator<I>,
}

impl<I> Metric<I> {
    pub fn new(name: impl Into<String>, evaluator: impl Fn(&I) -> f64 + Send + Sync + 'static) -> Self {
        Metric {
            name: name.into(),
            evaluator: Box::new(evaluator),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn evaluate(&self, input: &I) -> f64 {
        (self.evaluator)(input)
    }
}

/// Ordered metric registry. Names must be unique.
pub struct MetricSet<I> {
    metrics: Vec<Metric<I>>,
}

impl<I> MetricSet<I> {
    pub fn new() -> Self {
        MetricSet {
            metrics: Vec::new(),
        }
    }

    /// Register a metric. A repeated name replaces the earlier evaluator in
    /// place so positions stay stable.
    pub fn register(
        mut self,
        name: impl Into<String>,
        evaluator: impl Fn(&I) -> f64 + Send + Sync + 'static,
    ) -> Self {
        let metric = Metric::new(name, evaluator);
        match self.metrics.iter().position(|m| m.name == metric.name) {
            Some(i) => self.metrics[i] = metric,
            None => self.metrics.push(metric),
        }
        self
    }

    pub fn names(&self) -> Vec<String> {
        self.metrics.iter().map(|m| m.name.clone()).collect()
    }

    pub fn evaluate(&self, input: &I) -> Vec<f64> {
        self.metrics.iter().map(|m| m.evaluate(input)).collect()
    }
}

impl<I> Default for MetricSet<I> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["accuracy".to_string(), "top_k".to_string()]
    }

    #[test]
    fn test_flatten_prefixes_validation_metrics() {
        let entry = EpochResult::new()
            .with_scalar("loss", 0.5)
            .with_metrics(vec![0.8, 0.9])
            .with_val_metrics(vec![0.7, 0.85])
            .into_entry(4, &names())
            .unwrap();

        assert_eq!(entry.epoch, 4);
        assert_eq!(entry.get("loss"), Some(0.5));
        assert_eq!(entry.get("accuracy"), Some(0.8));
        assert_eq!(entry.get("val_accuracy"), Some(0.7));
        assert_eq!(entry.get("val_top_k"), Some(0.85));
        assert_eq!(entry.values.len(), 5);
    }

    #[test]
    fn test_flatten_rejects_wrong_arity() {
        let err = EpochResult::new()
            .with_metrics(vec![0.8])
            .into_entry(1, &names())
            .unwrap_err();
        assert!(matches!(
            err,
            TrainingError::MetricArity {
                group: "training",
                expected: 2,
                got: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_flatten_rejects_metric_shadowing_scalar() {
        let err = EpochResult::new()
            .with_scalar("accuracy", 1.0)
            .with_metrics(vec![0.8, 0.9])
            .into_entry(3, &names())
            .unwrap_err();
        assert!(matches!(
            err,
            TrainingError::MetricCollision { epoch: 3, ref key } if key == "accuracy"
        ));
    }

    #[test]
    fn test_flatten_rejects_validation_key_clash() {
        let err = EpochResult::new()
            .with_scalar("val_top_k", 1.0)
            .with_metrics(vec![0.8, 0.9])
            .with_val_metrics(vec![0.7, 0.85])
            .into_entry(1, &names())
            .unwrap_err();
        assert!(matches!(
            err,
            TrainingError::MetricCollision { ref key, .. } if key == "val_top_k"
        ));
    }

    #[test]
    fn test_log_rejects_out_of_order_epochs() {
        let mut log = MetricLog::new();
        log.append(LogEntry {
            epoch: 2,
            values: BTreeMap::new(),
        })
        .unwrap();
        let err = log
            .append(LogEntry {
                epoch: 2,
                values: BTreeMap::new(),
            })
            .unwrap_err();
        assert!(matches!(err, TrainingError::LogOrder { epoch: 2, last: 2 }));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_log_series_and_lookup() {
        let mut log = MetricLog::new();
        for (epoch, loss) in [(1, 3.0), (2, 2.0), (3, 1.5)] {
            let entry = EpochResult::new()
                .with_scalar("loss", loss)
                .into_entry(epoch, &[])
                .unwrap();
            log.append(entry).unwrap();
        }
        assert_eq!(log.series("loss"), vec![(1, 3.0), (2, 2.0), (3, 1.5)]);
        assert_eq!(log.get(2).and_then(|e| e.get("loss")), Some(2.0));
        assert!(log.get(9).is_none());
    }

    #[test]
    fn test_log_json_rejects_unordered_history() {
        let json = r#"[{"epoch": 3, "values": {}}, {"epoch": 1, "values": {}}]"#;
        assert!(serde_json::from_str::<MetricLog>(json).is_err());
    }

    #[test]
    fn test_metric_set_keeps_registration_order() {
        let set = MetricSet::<(f64, f64)>::new()
            .register("sum", |(a, b)| a + b)
            .register("diff", |(a, b)| a - b)
            .register("sum", |(a, b)| 2.0 * (a + b));
        assert_eq!(set.names(), vec!["sum".to_string(), "diff".to_string()]);
        assert_eq!(set.evaluate(&(3.0, 1.0)), vec![8.0, 2.0]);
    }
}
