//! Resolves the configured device budget (`n_gpu`) against what the machine
//! actually has. Asking for more than is available is never an error.

use crate::error::RunWarning;

/// Reports how many accelerators the compute backend can see.
pub trait AcceleratorProbe {
    fn accelerator_count(&self) -> usize;
}

/// Probe for CPU-only backends such as burn's `NdArray`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuOnly;

impl AcceleratorProbe for CpuOnly {
    fn accelerator_count(&self) -> usize {
        0
    }
}

/// Effective device set for a run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceSelection {
    /// Accelerator ids `0..effective`. Empty means CPU execution.
    pub device_ids: Vec<usize>,
    pub warnings: Vec<RunWarning>,
}

impl DeviceSelection {
    pub fn is_cpu(&self) -> bool {
        self.device_ids.is_empty()
    }

    /// More than one device: units may be replicated data-parallel.
    pub fn is_data_parallel(&self) -> bool {
        self.device_ids.len() > 1
    }

    /// Primary device label, `cuda:0` style, or `cpu`.
    pub fn primary(&self) -> String {
        match self.device_ids.first() {
            Some(id) => format!("cuda:{id}"),
            None => "cpu".to_string(),
        }
    }
}

/// Clamp `requested` devices to `available`, emitting a warning for every
/// downgrade.
pub fn select_devices(requested: usize, available: usize) -> DeviceSelection {
    let mut warnings = Vec::new();
    let mut effective = requested;

    if effective > 0 && available == 0 {
        warnings.push(RunWarning::NoAccelerator { requested });
        effective = 0;
    }
    if effective > available {
        warnings.push(RunWarning::DevicesClamped {
            requested,
            available,
        });
        effective = available;
    }

    for warning in &warnings {
        tracing::warn!("{warning}");
    }

    DeviceSelection {
        device_ids: (0..effective).collect(),
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_to_available() {
        let selection = select_devices(4, 1);
        assert_eq!(selection.device_ids, vec![0]);
        assert_eq!(selection.warnings.len(), 1);
        assert!(matches!(
            selection.warnings[0],
            RunWarning::DevicesClamped {
                requested: 4,
                available: 1
            }
        ));
        assert!(!selection.is_data_parallel());
        assert_eq!(selection.primary(), "cuda:0");
    }

    #[test]
    fn test_zero_requested_is_silent_cpu() {
        let selection = select_devices(0, 0);
        assert!(selection.device_ids.is_empty());
        assert!(selection.warnings.is_empty());
        assert!(selection.is_cpu());
        assert_eq!(selection.primary(), "cpu");

        let selection = select_devices(0, 8);
        assert!(selection.device_ids.is_empty());
        assert!(selection.warnings.is_empty());
    }

    #[test]
    fn test_no_accelerator_falls_back_with_single_warning() {
        let selection = select_devices(2, CpuOnly.accelerator_count());
        assert!(selection.is_cpu());
        assert_eq!(
            selection.warnings,
            vec![RunWarning::NoAccelerator { requested: 2 }]
        );
    }

    #[test]
    fn test_request_within_budget() {
        let selection = select_devices(2, 4);
        assert_eq!(selection.device_ids, vec![0, 1]);
        assert!(selection.warnings.is_empty());
        assert!(selection.is_data_parallel());
    }
}
