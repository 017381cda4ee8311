//! C8: the Published-State Adapter. A minimal typed parameter/array store standing
//! in for the areaDetector parameter/callback framework, which is an external
//! collaborator out of scope for this core (§1). Real integrations implement
//! `DetectorFrameSink` against their own NDArray pool; this module only needs to
//! know the shape of what it publishes.
//!
//! Grounded on the teacher's `ParameterValue`/`InstrumentState` vocabulary
//! (`src/core.rs`) and the narrow-trait external-boundary pattern used for
//! `Instrument`/`HardwareAdapter`.

use std::sync::Arc;

use tokio::sync::watch;

use crate::model::{ControllerState, OperatingMode, RunMode, SpectrumShape};

/// One completed N-D detector frame, emitted once per acquisition on clean
/// completion (§4.7 step 6).
#[derive(Debug, Clone)]
pub struct DetectorFrame {
    pub ndims: usize,
    pub dims: Vec<usize>,
    pub data: Arc<Vec<f64>>,
}

/// The boundary the areaDetector NDArray pool would implement against.
pub trait DetectorFrameSink: Send + Sync {
    fn publish_frame(&self, frame: DetectorFrame);
}

/// A sink that just remembers the last frame, useful for tests and for a
/// dry-run/demo mode that has no real areaDetector framework behind it.
#[derive(Default)]
pub struct LoggingFrameSink {
    last: std::sync::Mutex<Option<DetectorFrame>>,
}

impl DetectorFrameSink for LoggingFrameSink {
    fn publish_frame(&self, frame: DetectorFrame) {
        tracing::info!(ndims = frame.ndims, dims = ?frame.dims, "published detector frame");
        *self.last.lock().unwrap() = Some(frame);
    }
}

impl LoggingFrameSink {
    pub fn last_frame(&self) -> Option<DetectorFrame> {
        self.last.lock().unwrap().clone()
    }
}

/// Progress readback published during a session.
#[derive(Debug, Clone, Copy, Default)]
pub struct Progress {
    pub current_sample: usize,
    pub current_sample_overall: usize,
    pub percent_iteration: f64,
    pub percent_overall: f64,
    pub remaining_time_s: f64,
}

/// The typed store described in §4.8.
pub struct PublishedState {
    pub connected: watch::Sender<bool>,
    pub server_name: watch::Sender<String>,
    pub protocol_version: watch::Sender<(u32, u32)>,

    pub run_mode: watch::Sender<RunMode>,
    pub operating_mode: watch::Sender<OperatingMode>,
    pub num_exposures: watch::Sender<i64>,
    pub safe_state: watch::Sender<bool>,
    pub data_delay_max_s: watch::Sender<f64>,

    pub ad_status: watch::Sender<ControllerState>,
    pub status_text: watch::Sender<String>,
    pub progress: watch::Sender<Progress>,

    /// Validated Spectrum Shape readback (§4.5 step 5, §4.7 step 4): samples per
    /// iteration (S), non-energy channels per sample (V), number of slices (N),
    /// and their product.
    pub samples_per_iteration: watch::Sender<usize>,
    pub values_per_sample: watch::Sender<usize>,
    pub number_of_slices: watch::Sender<usize>,
    pub total_samples: watch::Sender<usize>,

    pub spectrum: watch::Sender<Arc<Vec<f64>>>,
    pub image: watch::Sender<Option<Arc<Vec<f64>>>>,
    pub volume: watch::Sender<Option<Arc<Vec<f64>>>>,

    frame_sink: Arc<dyn DetectorFrameSink>,
}

impl PublishedState {
    pub fn new(frame_sink: Arc<dyn DetectorFrameSink>) -> Self {
        Self {
            connected: watch::channel(false).0,
            server_name: watch::channel(String::new()).0,
            protocol_version: watch::channel((0, 0)).0,
            run_mode: watch::channel(RunMode::Fat).0,
            operating_mode: watch::channel(OperatingMode::Spectroscopy).0,
            num_exposures: watch::channel(1).0,
            safe_state: watch::channel(true).0,
            data_delay_max_s: watch::channel(5.0).0,
            ad_status: watch::channel(ControllerState::Disconnected).0,
            status_text: watch::channel(String::new()).0,
            progress: watch::channel(Progress::default()).0,
            samples_per_iteration: watch::channel(0).0,
            values_per_sample: watch::channel(0).0,
            number_of_slices: watch::channel(0).0,
            total_samples: watch::channel(0).0,
            spectrum: watch::channel(Arc::new(Vec::new())).0,
            image: watch::channel(None).0,
            volume: watch::channel(None).0,
            frame_sink,
        }
    }

    pub fn publish_status(&self, state: ControllerState, message: impl Into<String>) {
        self.ad_status.send_replace(state);
        self.status_text.send_replace(message.into());
    }

    pub fn publish_progress(&self, progress: Progress) {
        self.progress.send_replace(progress);
    }

    /// Publish the Validated Spectrum Shape after `defineAndValidate` (§4.5 step 5).
    pub fn publish_shape(&self, shape: SpectrumShape) {
        self.samples_per_iteration.send_replace(shape.samples);
        self.values_per_sample.send_replace(shape.values_per_sample);
        self.number_of_slices.send_replace(shape.num_slices);
        self.total_samples.send_replace(shape.total_len());
    }

    pub fn publish_partial_arrays(
        &self,
        spectrum: Arc<Vec<f64>>,
        image: Option<Arc<Vec<f64>>>,
        volume: Option<Arc<Vec<f64>>>,
    ) {
        self.spectrum.send_replace(spectrum);
        if image.is_some() {
            self.image.send_replace(image);
        }
        if volume.is_some() {
            self.volume.send_replace(volume);
        }
    }

    pub fn publish_frame(&self, frame: DetectorFrame) {
        self.frame_sink.publish_frame(frame);
    }

    pub fn run_mode_options() -> [&'static str; 5] {
        ["FAT", "SFAT", "FRR", "FE", "LVS"]
    }

    pub fn operating_mode_options() -> [&'static str; 3] {
        ["Spectroscopy", "Momentum", "PEEM"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_status_updates_both_channels() {
        let state = PublishedState::new(Arc::new(LoggingFrameSink::default()));
        state.publish_status(ControllerState::Running, "acquiring");
        assert_eq!(*state.ad_status.borrow(), ControllerState::Running);
        assert_eq!(*state.status_text.borrow(), "acquiring");
    }

    #[test]
    fn test_publish_shape_updates_all_channels() {
        let state = PublishedState::new(Arc::new(LoggingFrameSink::default()));
        state.publish_shape(SpectrumShape {
            samples: 11,
            values_per_sample: 128,
            num_slices: 1,
        });
        assert_eq!(*state.samples_per_iteration.borrow(), 11);
        assert_eq!(*state.values_per_sample.borrow(), 128);
        assert_eq!(*state.number_of_slices.borrow(), 1);
        assert_eq!(*state.total_samples.borrow(), 11 * 128);
    }

    #[test]
    fn test_publish_frame_reaches_sink() {
        let sink = Arc::new(LoggingFrameSink::default());
        let state = PublishedState::new(sink.clone());
        state.publish_frame(DetectorFrame {
            ndims: 1,
            dims: vec![21],
            data: Arc::new(vec![0.0; 21]),
        });
        let frame = sink.last_frame().unwrap();
        assert_eq!(frame.ndims, 1);
        assert_eq!(frame.dims, vec![21]);
    }
}
