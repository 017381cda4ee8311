//! Shared value and state vocabulary used across the parameter mirror, spectrum
//! definer, acquisition orchestrator, and published-state adapter.
//!
//! Grounded on the teacher's `ParameterValue`/`InstrumentState` enums in `core.rs`,
//! narrowed to the types the Prodigy protocol actually carries.

use serde::{Deserialize, Serialize};

/// The type an analyzer parameter was declared with at connect time. Fixed for the
/// lifetime of the session; `ParameterMirror` rejects type changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterType {
    Double,
    Integer,
    String,
    Bool,
}

impl ParameterType {
    pub fn label(self) -> &'static str {
        match self {
            ParameterType::Double => "double",
            ParameterType::Integer => "integer",
            ParameterType::String => "string",
            ParameterType::Bool => "bool",
        }
    }
}

/// A typed analyzer parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    Double(f64),
    Integer(i64),
    String(String),
    Bool(bool),
}

impl ParameterValue {
    pub fn value_type(&self) -> ParameterType {
        match self {
            ParameterValue::Double(_) => ParameterType::Double,
            ParameterValue::Integer(_) => ParameterType::Integer,
            ParameterValue::String(_) => ParameterType::String,
            ParameterValue::Bool(_) => ParameterType::Bool,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParameterValue::Double(v) => Some(*v),
            ParameterValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParameterValue::Integer(v) => Some(*v),
            ParameterValue::Double(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParameterValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            ParameterValue::String(v) => Some(v),
            _ => None,
        }
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        ParameterValue::Double(v)
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        ParameterValue::Integer(v)
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        ParameterValue::Bool(v)
    }
}

impl From<String> for ParameterValue {
    fn from(v: String) -> Self {
        ParameterValue::String(v)
    }
}

/// The acquisition controller state machine (§4.7 of the design doc).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerState {
    Idle,
    Disconnected,
    Initializing,
    Ready,
    Running,
    Paused,
    Finished,
    Aborted,
    Error,
}

impl ControllerState {
    /// Whether a parameter `set` must be rejected with `AcquisitionBusy`.
    pub fn is_busy(self) -> bool {
        matches!(self, ControllerState::Running | ControllerState::Paused)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ControllerState::Finished | ControllerState::Aborted | ControllerState::Error
        )
    }
}

/// The five spectrum acquisition run modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    Fat,
    Sfat,
    Frr,
    Fe,
    Lvs,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Fat => "FAT",
            RunMode::Sfat => "SFAT",
            RunMode::Frr => "FRR",
            RunMode::Fe => "FE",
            RunMode::Lvs => "LVS",
        }
    }

    pub fn define_command(self) -> &'static str {
        match self {
            RunMode::Fat => "DefineSpectrumFAT",
            RunMode::Sfat => "DefineSpectrumSFAT",
            RunMode::Frr => "DefineSpectrumFRR",
            RunMode::Fe => "DefineSpectrumFE",
            RunMode::Lvs => "DefineSpectrumLVS",
        }
    }

    pub const ALL: [RunMode; 5] = [
        RunMode::Fat,
        RunMode::Sfat,
        RunMode::Frr,
        RunMode::Fe,
        RunMode::Lvs,
    ];
}

/// The three operating modes reported by `GetAnalyzerParameterInfo`-style enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatingMode {
    Spectroscopy,
    Momentum,
    Peem,
}

impl OperatingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            OperatingMode::Spectroscopy => "Spectroscopy",
            OperatingMode::Momentum => "Momentum",
            OperatingMode::Peem => "PEEM",
        }
    }
}

/// Validated spectrum shape: samples per iteration, values per sample, number of
/// slices. Fixes the layout of the accumulators for the next acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpectrumShape {
    pub samples: usize,
    pub values_per_sample: usize,
    pub num_slices: usize,
}

impl SpectrumShape {
    pub fn ndims(&self) -> usize {
        if self.values_per_sample > 1 && self.num_slices > 1 {
            3
        } else if self.values_per_sample > 1 {
            2
        } else {
            1
        }
    }

    pub fn total_len(&self) -> usize {
        self.samples * self.values_per_sample * self.num_slices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_state_busy() {
        assert!(ControllerState::Running.is_busy());
        assert!(ControllerState::Paused.is_busy());
        assert!(!ControllerState::Idle.is_busy());
    }

    #[test]
    fn test_spectrum_shape_ndims() {
        assert_eq!(
            SpectrumShape {
                samples: 21,
                values_per_sample: 1,
                num_slices: 1
            }
            .ndims(),
            1
        );
        assert_eq!(
            SpectrumShape {
                samples: 11,
                values_per_sample: 128,
                num_slices: 1
            }
            .ndims(),
            2
        );
        assert_eq!(
            SpectrumShape {
                samples: 11,
                values_per_sample: 128,
                num_slices: 5
            }
            .ndims(),
            3
        );
    }
}
