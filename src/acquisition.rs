//! C7: the Acquisition Orchestrator. A long-running worker, implemented as a
//! `kameo` actor, that executes one acquisition session at a time per §4.7.
//!
//! Grounded on the teacher's `DaqManagerActor::spawn_instrument` task loop
//! (`src/app_actor.rs`): the actor's message handler spawns a dedicated `tokio`
//! task running a `tokio::select!` loop, and cooperative cancellation is carried
//! by a `watch` channel rather than forcing the task to poll a shared atomic —
//! the same shape as the teacher's `stop_instrument`/`try_send(Shutdown)` pattern,
//! specialized here to Prodigy's Abort/Pause/Resume verbs.

use std::sync::Arc;

use kameo::message::{Context, Message};
use kameo::Actor;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::broker::ProdigyEndpoint;
use crate::data_reader::{max_samples_per_read, DataReader};
use crate::error::{DriverResult, ProdigyError};
use crate::model::{ControllerState, RunMode, SpectrumShape};
use crate::parameters::ParameterMirror;
use crate::published_state::{DetectorFrame, Progress, PublishedState};
use crate::spectrum::{SpectrumDefiner, SpectrumInputs};

/// Plain contiguous accumulators — one `Vec<f64>` per dimensionality, never a
/// nested structure, per the design note in §9.
pub struct AccumulatorSet {
    pub shape: SpectrumShape,
    pub spectrum: Vec<f64>,
    pub image: Option<Vec<f64>>,
    pub volume: Option<Vec<f64>>,
}

impl AccumulatorSet {
    pub fn new(shape: SpectrumShape) -> Self {
        let has_image = shape.values_per_sample > 1 && shape.num_slices == 1;
        let has_volume = shape.values_per_sample > 1 && shape.num_slices > 1;
        Self {
            shape,
            spectrum: vec![0.0; shape.samples],
            image: has_image.then(|| vec![0.0; shape.samples * shape.values_per_sample]),
            volume: has_volume
                .then(|| vec![0.0; shape.samples * shape.values_per_sample * shape.num_slices]),
        }
    }

    /// Write `values`, the server's flat reply starting at `flat_offset` within the
    /// current iteration, per the flat-index contract in §3. Each cell is
    /// accumulated with `+=`; since a cell is visited at most once per iteration
    /// (chunks never overlap) and starts at zero, this is equivalent to "assign on
    /// iteration 0, sum thereafter" while requiring no iteration-number branch.
    pub fn apply_chunk(&mut self, values: &[f64], flat_offset: usize) {
        let (s_dim, v_dim) = (self.shape.samples, self.shape.values_per_sample);
        let sv = s_dim * v_dim;
        for (i, &value) in values.iter().enumerate() {
            let flat = flat_offset + i;
            let n = flat / sv;
            let rem = flat % sv;
            let s = rem / v_dim;
            let p = rem % v_dim;

            if s < s_dim {
                self.spectrum[s] += value;
            }
            if let Some(image) = &mut self.image {
                let idx = s * v_dim + p;
                if idx < image.len() {
                    image[idx] += value;
                }
            }
            if let Some(volume) = &mut self.volume {
                let idx = n * sv + s * v_dim + p;
                if idx < volume.len() {
                    volume[idx] += value;
                }
            }
        }
    }

    pub fn ndims(&self) -> usize {
        self.shape.ndims()
    }

    pub fn dims(&self) -> Vec<usize> {
        match self.ndims() {
            1 => vec![self.shape.samples],
            2 => vec![self.shape.samples, self.shape.values_per_sample],
            _ => vec![self.shape.samples, self.shape.values_per_sample, self.shape.num_slices],
        }
    }

    /// Full, completed frame: first iteration's assignments plus subsequent sums,
    /// already folded into the accumulators by `apply_chunk`.
    pub fn frame_data(&self) -> Vec<f64> {
        if let Some(volume) = &self.volume {
            volume.clone()
        } else if let Some(image) = &self.image {
            image.clone()
        } else {
            self.spectrum.clone()
        }
    }
}

/// §4.7 step 1: cross-check the previously-published V against the `NumNonEnergyChannels`
/// analyzer parameter before a new spectrum is defined. Purely diagnostic — the
/// shape that actually governs the session always comes from `ValidateSpectrum`.
async fn reconcile_non_energy_channels(parameters: &ParameterMirror, state: &PublishedState) {
    let published_v = *state.values_per_sample.borrow();
    if let Ok(value) = parameters.get("NumNonEnergyChannels").await {
        if let Some(expected_v) = value.as_i64() {
            if expected_v as usize != published_v {
                warn!(
                    expected = expected_v,
                    published = published_v,
                    "NumNonEnergyChannels disagrees with the last published ValuesPerSample; \
                     the upcoming ValidateSpectrum result will be trusted regardless"
                );
            }
        }
    }
}

fn parse_wire_state(raw: &str) -> Option<ControllerState> {
    match raw {
        "Idle" => Some(ControllerState::Idle),
        "Initializing" => Some(ControllerState::Initializing),
        "Ready" => Some(ControllerState::Ready),
        "Running" => Some(ControllerState::Running),
        "Paused" => Some(ControllerState::Paused),
        "Finished" => Some(ControllerState::Finished),
        "Aborted" => Some(ControllerState::Aborted),
        "Error" => Some(ControllerState::Error),
        _ => None,
    }
}

/// Dependencies the session algorithm needs, bundled so the actor can hand a
/// cheap `Arc` clone to each spawned session task.
pub struct AcquisitionDeps {
    pub endpoint: Arc<dyn ProdigyEndpoint>,
    pub spectrum_definer: SpectrumDefiner,
    pub data_reader: DataReader,
    pub parameters: Arc<ParameterMirror>,
    pub published_state: Arc<PublishedState>,
    pub poll_interval: std::time::Duration,
    pub max_values_per_read: usize,
}

struct SessionHandle {
    stop_tx: watch::Sender<bool>,
    pause_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// The `kameo` actor driving one acquisition session at a time.
pub struct AcquisitionActor {
    deps: Arc<AcquisitionDeps>,
    current: Option<SessionHandle>,
}

impl AcquisitionActor {
    pub fn new(deps: Arc<AcquisitionDeps>) -> Self {
        Self {
            deps,
            current: None,
        }
    }

    fn is_busy(&self) -> bool {
        self.current
            .as_ref()
            .map(|h| !h.task.is_finished())
            .unwrap_or(false)
    }
}

impl Actor for AcquisitionActor {
    type Args = Self;
    type Error = ProdigyError;

    async fn on_start(args: Self::Args, _actor_ref: kameo::actor::ActorRef<Self>) -> Result<Self, Self::Error> {
        Ok(args)
    }
}

/// Start a new acquisition session using the given run mode and scalar snapshot.
/// A no-op if a session is already active.
#[derive(Debug, Clone)]
pub struct StartAcquisition {
    pub run_mode: RunMode,
    pub iterations_requested: usize,
    pub safe_after: bool,
    pub inputs: SpectrumInputs,
}

#[derive(Debug, Clone)]
pub struct StopAcquisition;

#[derive(Debug, Clone)]
pub struct PauseAcquisition;

#[derive(Debug, Clone)]
pub struct ResumeAcquisition;

impl Message<StartAcquisition> for AcquisitionActor {
    type Reply = DriverResult<()>;

    #[instrument(skip(self, _ctx, msg))]
    async fn handle(&mut self, msg: StartAcquisition, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        if self.is_busy() {
            info!("startAcquisition: already running, ignoring");
            return Ok(());
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let (pause_tx, pause_rx) = watch::channel(false);
        let deps = self.deps.clone();

        let task = tokio::spawn(async move {
            run_session(deps, msg, stop_rx, pause_rx).await;
        });

        self.current = Some(SessionHandle {
            stop_tx,
            pause_tx,
            task,
        });
        Ok(())
    }
}

impl Message<StopAcquisition> for AcquisitionActor {
    type Reply = ();

    async fn handle(&mut self, _msg: StopAcquisition, _ctx: &mut Context<Self, Self::Reply>) {
        if let Some(handle) = &self.current {
            handle.stop_tx.send_replace(true);
        }
    }
}

impl Message<PauseAcquisition> for AcquisitionActor {
    type Reply = ();

    async fn handle(&mut self, _msg: PauseAcquisition, _ctx: &mut Context<Self, Self::Reply>) {
        if let Some(handle) = &self.current {
            handle.pause_tx.send_replace(true);
        }
    }
}

impl Message<ResumeAcquisition> for AcquisitionActor {
    type Reply = ();

    async fn handle(&mut self, _msg: ResumeAcquisition, _ctx: &mut Context<Self, Self::Reply>) {
        if let Some(handle) = &self.current {
            handle.pause_tx.send_replace(false);
        }
    }
}

/// The session algorithm from §4.7, run to completion on its own task.
#[instrument(skip(deps, stop_rx, pause_rx), fields(run_mode = msg.run_mode.as_str()))]
async fn run_session(
    deps: Arc<AcquisitionDeps>,
    msg: StartAcquisition,
    mut stop_rx: watch::Receiver<bool>,
    mut pause_rx: watch::Receiver<bool>,
) {
    let state = &deps.published_state;
    state.publish_status(ControllerState::Initializing, "initializing acquisition");
    reconcile_non_energy_channels(&deps.parameters, state).await;

    if let Err(err) = deps.endpoint.exchange("ClearSpectrum", vec![]).await {
        state.publish_status(ControllerState::Error, err.to_string());
        return;
    }

    let shape = match deps
        .spectrum_definer
        .define_and_validate(msg.run_mode, &msg.inputs)
        .await
    {
        Ok(shape) => shape,
        Err(err) => {
            state.publish_status(ControllerState::Error, err.to_string());
            return;
        }
    };

    state.publish_shape(shape);
    let mut accumulators = AccumulatorSet::new(shape);
    let samples_per_read = max_samples_per_read(deps.max_values_per_read, shape.values_per_sample);
    let iterations = msg.iterations_requested.max(1);

    let mut user_stopped = false;
    let mut terminal_state = ControllerState::Finished;

    'outer: for iteration in 0..iterations {
        if let Err(err) = deps.endpoint.exchange("ClearSpectrum", vec![]).await {
            state.publish_status(ControllerState::Error, err.to_string());
            terminal_state = ControllerState::Error;
            break;
        }

        let start_args = vec![("SafeAfter".to_string(), crate::protocol::Value::Bool(msg.safe_after))];
        if let Err(err) = deps.endpoint.exchange("Start", start_args).await {
            state.publish_status(ControllerState::Error, err.to_string());
            terminal_state = ControllerState::Error;
            break;
        }
        state.publish_status(ControllerState::Running, "acquiring");

        let mut last_consumed: usize = 0;

        loop {
            if *stop_rx.borrow() {
                user_stopped = true;
                break;
            }

            if *pause_rx.borrow() {
                match deps.endpoint.exchange("Pause", vec![]).await {
                    Ok(_) => {
                        state.publish_status(ControllerState::Paused, "paused");
                        // Best-effort: wait until resumed or stopped.
                        loop {
                            if *stop_rx.borrow() {
                                user_stopped = true;
                                break;
                            }
                            if !*pause_rx.borrow() {
                                let _ = deps.endpoint.exchange("Resume", vec![]).await;
                                state.publish_status(ControllerState::Running, "acquiring");
                                break;
                            }
                            tokio::time::sleep(deps.poll_interval).await;
                        }
                        if user_stopped {
                            break;
                        }
                    }
                    Err(_) => {
                        // Server rejected pause: remain Running, clear the
                        // user-visible pause flag (decision recorded in DESIGN.md).
                        warn!("Pause rejected by server, remaining Running");
                        pause_rx.borrow_and_update();
                    }
                }
            }

            tokio::time::sleep(deps.poll_interval).await;

            let status = match deps.endpoint.exchange("GetAcquisitionStatus", vec![]).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    state.publish_status(ControllerState::Error, err.to_string());
                    terminal_state = ControllerState::Error;
                    break 'outer;
                }
            };

            let wire_state = status
                .get("ControllerState")
                .and_then(|v| parse_wire_state(&v.as_str()))
                .unwrap_or(ControllerState::Running);
            let acquired_points = status
                .get("NumberOfAcquiredPoints")
                .and_then(|v| v.as_str().parse::<usize>().ok())
                .unwrap_or(last_consumed);

            if acquired_points > last_consumed {
                let target_end =
                    acquired_points.min(last_consumed + samples_per_read);
                let read_result = deps
                    .data_reader
                    .read_range(last_consumed, target_end.saturating_sub(1))
                    .await;

                match read_result {
                    Ok(values) => {
                        let expected = (target_end - last_consumed) * shape.values_per_sample;
                        if values.len() < expected {
                            let _ = deps.endpoint.exchange("Abort", vec![]).await;
                            state.publish_status(
                                ControllerState::Error,
                                ProdigyError::AcquisitionShort {
                                    expected,
                                    got: values.len(),
                                }
                                .to_string(),
                            );
                            terminal_state = ControllerState::Error;
                            break 'outer;
                        }

                        let flat_offset = last_consumed * shape.values_per_sample;
                        accumulators.apply_chunk(&values, flat_offset);
                        publish_partials(state, &accumulators);
                        last_consumed = target_end;
                    }
                    Err(err) => {
                        let _ = deps.endpoint.exchange("Abort", vec![]).await;
                        state.publish_status(ControllerState::Error, err.to_string());
                        terminal_state = ControllerState::Error;
                        break 'outer;
                    }
                }
            }

            let percent_iteration = 100.0 * last_consumed as f64 / shape.samples as f64;
            let percent_overall =
                100.0 * (iteration * shape.samples + last_consumed) as f64 / (iterations * shape.samples) as f64;
            let remaining_time_s = shape.samples.saturating_sub(last_consumed) as f64 * msg.inputs.dwell_time;
            state.publish_progress(Progress {
                current_sample: last_consumed,
                current_sample_overall: iteration * shape.samples + last_consumed,
                percent_iteration,
                percent_overall,
                remaining_time_s,
            });

            if (wire_state == ControllerState::Finished && last_consumed >= shape.samples)
                || matches!(wire_state, ControllerState::Aborted | ControllerState::Error)
            {
                if wire_state == ControllerState::Error {
                    terminal_state = ControllerState::Error;
                } else if wire_state == ControllerState::Aborted {
                    terminal_state = ControllerState::Aborted;
                }
                break;
            }
        }

        if user_stopped {
            let _ = deps.endpoint.exchange("Abort", vec![]).await;
            terminal_state = ControllerState::Aborted;
            break 'outer;
        }

        if terminal_state != ControllerState::Finished {
            break 'outer;
        }
    }

    match terminal_state {
        ControllerState::Finished => {
            state.publish_status(ControllerState::Idle, "acquisition complete");
            state.publish_progress(Progress {
                percent_iteration: 100.0,
                percent_overall: 100.0,
                ..Default::default()
            });
            state.publish_frame(DetectorFrame {
                ndims: accumulators.ndims(),
                dims: accumulators.dims(),
                data: Arc::new(accumulators.frame_data()),
            });
        }
        ControllerState::Aborted => {
            state.publish_status(ControllerState::Aborted, "acquisition aborted by user");
        }
        other => {
            error!(?other, "acquisition session ended in error");
        }
    }
}

fn publish_partials(state: &PublishedState, accumulators: &AccumulatorSet) {
    state.publish_partial_arrays(
        Arc::new(accumulators.spectrum.clone()),
        accumulators.image.as_ref().map(|v| Arc::new(v.clone())),
        accumulators.volume.as_ref().map(|v| Arc::new(v.clone())),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reconcile_non_energy_channels_skips_when_unmirrored() {
        struct NeverCalledEndpoint;

        #[async_trait::async_trait]
        impl ProdigyEndpoint for NeverCalledEndpoint {
            async fn exchange(
                &self,
                _command: &str,
                _args: Vec<(String, crate::protocol::Value)>,
            ) -> Result<crate::broker::Outcome, ProdigyError> {
                unreachable!("reconciliation reads the cache only, never the endpoint directly")
            }
        }

        let parameters = ParameterMirror::new(Arc::new(NeverCalledEndpoint));
        let state = PublishedState::new(Arc::new(crate::published_state::LoggingFrameSink::default()));
        // Nothing mirrored yet: must degrade to a no-op rather than panic.
        reconcile_non_energy_channels(&parameters, &state).await;
    }

    #[tokio::test]
    async fn test_reconcile_non_energy_channels_is_diagnostic_only() {
        use async_trait::async_trait;
        use crate::protocol::Value;
        use std::collections::VecDeque;
        use std::sync::Mutex as StdMutex;

        struct FakeEndpoint {
            responses: StdMutex<VecDeque<crate::broker::Outcome>>,
        }

        #[async_trait]
        impl ProdigyEndpoint for FakeEndpoint {
            async fn exchange(
                &self,
                _command: &str,
                _args: Vec<(String, Value)>,
            ) -> Result<crate::broker::Outcome, ProdigyError> {
                Ok(self.responses.lock().unwrap().pop_front().unwrap())
            }
        }

        fn outcome(pairs: &[(&str, Value)]) -> crate::broker::Outcome {
            pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
        }

        let endpoint = Arc::new(FakeEndpoint {
            responses: StdMutex::new(
                vec![
                    outcome(&[("Names", Value::Token("[\"NumNonEnergyChannels\"]".to_string()))]),
                    outcome(&[("Type", Value::Token("integer".to_string()))]),
                    outcome(&[("Value", Value::Integer(5))]),
                ]
                .into(),
            ),
        });
        let parameters = ParameterMirror::new(endpoint);
        parameters.enumerate().await.unwrap();

        let state = PublishedState::new(Arc::new(crate::published_state::LoggingFrameSink::default()));
        // The mismatch (mirrored 5 vs. published default 0) is only ever warned
        // about; it must never feed back into the published shape itself.
        reconcile_non_energy_channels(&parameters, &state).await;
        assert_eq!(*state.values_per_sample.borrow(), 0);
    }

    #[test]
    fn test_flat_index_1d_scenario_1() {
        let shape = SpectrumShape {
            samples: 21,
            values_per_sample: 1,
            num_slices: 1,
        };
        let mut acc = AccumulatorSet::new(shape);
        let values: Vec<f64> = (0..21).map(|i| i as f64).collect();
        acc.apply_chunk(&values, 0);
        assert_eq!(acc.spectrum, values);
        assert_eq!(acc.ndims(), 1);
        assert_eq!(acc.dims(), vec![21]);
    }

    #[test]
    fn test_flat_index_2d_scenario_2() {
        let shape = SpectrumShape {
            samples: 11,
            values_per_sample: 128,
            num_slices: 1,
        };
        let mut acc = AccumulatorSet::new(shape);
        let values: Vec<f64> = (0..(11 * 128)).map(|i| i as f64).collect();
        acc.apply_chunk(&values, 0);
        let image = acc.image.as_ref().unwrap();
        assert_eq!(image.len(), 11 * 128);
        for s in 0..11 {
            for p in 0..128 {
                assert_eq!(image[s * 128 + p], (s * 128 + p) as f64);
            }
            let expected_sum: f64 = (0..128).map(|p| (s * 128 + p) as f64).sum();
            assert_eq!(acc.spectrum[s], expected_sum);
        }
        assert_eq!(acc.ndims(), 2);
        assert_eq!(acc.dims(), vec![11, 128]);
    }

    #[test]
    fn test_flat_index_3d_scenario_3() {
        let shape = SpectrumShape {
            samples: 11,
            values_per_sample: 128,
            num_slices: 5,
        };
        let mut acc = AccumulatorSet::new(shape);
        let total = 5 * 11 * 128;
        let values: Vec<f64> = (0..total).map(|i| i as f64).collect();
        acc.apply_chunk(&values, 0);
        let volume = acc.volume.as_ref().unwrap();
        assert_eq!(volume.len(), total);
        for n in 0..5 {
            for s in 0..11 {
                for p in 0..128 {
                    let flat = n * (11 * 128) + s * 128 + p;
                    assert_eq!(volume[flat], flat as f64);
                }
            }
        }
        assert_eq!(acc.ndims(), 3);
        assert_eq!(acc.dims(), vec![11, 128, 5]);
    }

    #[test]
    fn test_multi_iteration_accumulation_scenario_4() {
        let shape = SpectrumShape {
            samples: 21,
            values_per_sample: 1,
            num_slices: 1,
        };
        let mut acc = AccumulatorSet::new(shape);
        let c = 2.5;
        for _ in 0..3 {
            let values = vec![c; 21];
            acc.apply_chunk(&values, 0);
        }
        assert!(acc.spectrum.iter().all(|&v| (v - 3.0 * c).abs() < 1e-9));
    }

    #[test]
    fn test_partial_chunk_leaves_tail_zero_scenario_5() {
        let shape = SpectrumShape {
            samples: 21,
            values_per_sample: 1,
            num_slices: 1,
        };
        let mut acc = AccumulatorSet::new(shape);
        let values: Vec<f64> = (0..10).map(|i| i as f64 + 1.0).collect();
        acc.apply_chunk(&values, 0);
        for s in 0..10 {
            assert_eq!(acc.spectrum[s], (s + 1) as f64);
        }
        for s in 10..21 {
            assert_eq!(acc.spectrum[s], 0.0);
        }
    }
}
