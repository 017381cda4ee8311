//! C5: the Spectrum Definer. Composes `DefineSpectrum<Mode>` from the current
//! scalar inputs for one of the five run modes, then validates it and records the
//! resulting (S, V, N) shape.

use tracing::instrument;

use crate::broker::ProdigyEndpoint;
use crate::error::{DriverResult, ProdigyError};
use crate::model::{RunMode, SpectrumShape};
use crate::protocol::Value;

/// Mode-relevant scalar inputs, snapshotted from the published-state adapter
/// before each `defineAndValidate` call. Fields irrelevant to the current run mode
/// are ignored rather than validated, since §4.5 requires mode-specific keys to
/// never appear for other modes.
#[derive(Debug, Clone, Default)]
pub struct SpectrumInputs {
    pub start_energy: f64,
    pub end_energy: f64,
    pub step_width: f64,
    pub pass_energy: f64,
    pub kinetic_energy: f64,
    pub retarding_ratio: f64,
    pub dwell_time: f64,
    pub sample_count: i64,
    pub lens_mode: String,
    pub scan_range: String,
}

impl SpectrumDefiner {
    pub fn new(endpoint: std::sync::Arc<dyn ProdigyEndpoint>) -> Self {
        Self { endpoint }
    }

    #[instrument(skip(self, inputs))]
    pub async fn define_and_validate(
        &self,
        mode: RunMode,
        inputs: &SpectrumInputs,
    ) -> DriverResult<SpectrumShape> {
        let args = self.mode_args(mode, inputs);
        self.endpoint.exchange(mode.define_command(), args).await?;

        let validated = self.endpoint.exchange("ValidateSpectrum", vec![]).await?;

        let mut samples = validated
            .get("Samples")
            .and_then(|v| v.as_str().parse::<usize>().ok())
            .ok_or_else(|| ProdigyError::ValidationFailed {
                message: "ValidateSpectrum OK reply missing Samples".to_string(),
            })?;
        let values_per_sample = validated
            .get("ValuesPerSample")
            .and_then(|v| v.as_str().parse::<usize>().ok())
            .unwrap_or(1);
        let num_slices = validated
            .get("NumberOfSlices")
            .and_then(|v| v.as_str().parse::<usize>().ok())
            .unwrap_or(1);

        if mode == RunMode::Sfat {
            samples = sfat_sample_count(inputs.start_energy, inputs.end_energy, inputs.step_width);
        }

        if samples < 1 || values_per_sample < 1 || num_slices < 1 {
            return Err(ProdigyError::ValidationFailed {
                message: format!(
                    "invalid validated shape S={samples} V={values_per_sample} N={num_slices}"
                ),
            });
        }

        Ok(SpectrumShape {
            samples,
            values_per_sample,
            num_slices,
        })
    }

    fn mode_args(&self, mode: RunMode, inputs: &SpectrumInputs) -> Vec<(String, Value)> {
        let lens = ("LensMode".to_string(), Value::Token(inputs.lens_mode.clone()));
        let range = ("ScanRange".to_string(), Value::Token(inputs.scan_range.clone()));
        let dwell = ("DwellTime".to_string(), Value::Number(inputs.dwell_time));

        match mode {
            RunMode::Fat | RunMode::Sfat => vec![
                ("StartEnergy".to_string(), Value::Number(inputs.start_energy)),
                ("EndEnergy".to_string(), Value::Number(inputs.end_energy)),
                ("StepWidth".to_string(), Value::Number(inputs.step_width)),
                ("PassEnergy".to_string(), Value::Number(inputs.pass_energy)),
                dwell,
                lens,
                range,
            ],
            RunMode::Frr => vec![
                ("StartEnergy".to_string(), Value::Number(inputs.start_energy)),
                ("EndEnergy".to_string(), Value::Number(inputs.end_energy)),
                ("StepWidth".to_string(), Value::Number(inputs.step_width)),
                (
                    "RetardingRatio".to_string(),
                    Value::Number(inputs.retarding_ratio),
                ),
                dwell,
                lens,
                range,
            ],
            RunMode::Fe => vec![
                (
                    "KineticEnergy".to_string(),
                    Value::Number(inputs.kinetic_energy),
                ),
                ("PassEnergy".to_string(), Value::Number(inputs.pass_energy)),
                dwell,
                ("SampleCount".to_string(), Value::Integer(inputs.sample_count)),
                lens,
                range,
            ],
            RunMode::Lvs => vec![dwell, lens, range],
        }
    }
}

pub struct SpectrumDefiner {
    endpoint: std::sync::Arc<dyn ProdigyEndpoint>,
}

/// §3's SFAT override: `floor((end-start)/step + 0.5) + 1`, computed locally
/// regardless of what the server's `ValidateSpectrum` reports.
pub fn sfat_sample_count(start: f64, end: f64, step: f64) -> usize {
    (((end - start) / step + 0.5).floor() + 1.0) as usize
}
