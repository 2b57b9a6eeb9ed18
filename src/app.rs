//! The test orchestrator: sequences the measured phases and owns the
//! phase / result / live-value state seen by the presentation sink.

use crate::sink::PresentationSink;
use crate::speedtest::transport::TransportClient;
use crate::settings::Settings;
use crate::speedtest::{Phase, PhaseResults, PhaseRunner, Result, SpeedTestError};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Observable state of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub phase: Phase,
    pub live_speed: f64,
    pub results: PhaseResults,
    pub running: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(PhaseResults),
    /// The run was stopped or reset before finishing.
    Cancelled,
}

struct State {
    phase: Phase,
    live_speed: f64,
    results: PhaseResults,
    running: bool,
    // Bumped by every start/stop/reset; updates from older runs are dropped.
    generation: u64,
    cancel: Option<CancellationToken>,
}

struct Inner {
    runner: PhaseRunner,
    sink: Arc<dyn PresentationSink>,
    state: Mutex<State>,
}

/// Cloneable handle; clones share the same state.
#[derive(Clone)]
pub struct TestOrchestrator {
    inner: Arc<Inner>,
}

impl TestOrchestrator {
    /// Fails with `InvalidSettings` when `settings` does not validate.
    pub fn new(
        transport: Arc<dyn TransportClient>,
        settings: Settings,
        sink: Arc<dyn PresentationSink>,
    ) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Inner {
                runner: PhaseRunner::new(transport, settings)?,
                sink,
                state: Mutex::new(State {
                    phase: Phase::Idle,
                    live_speed: 0.0,
                    results: PhaseResults::default(),
                    running: false,
                    generation: 0,
                    cancel: None,
                }),
            }),
        })
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.lock();
        Snapshot {
            phase: state.phase,
            live_speed: if state.phase.is_measuring() { state.live_speed } else { 0.0 },
            results: state.results,
            running: state.running,
        }
    }

    /// Runs ping, jitter, download and upload in order.
    ///
    /// Valid from `Idle` or `Complete`. A phase failure returns the
    /// orchestrator to `Idle` with results cleared and surfaces the error.
    /// A concurrent `stop`/`reset` makes this return `RunOutcome::Cancelled`.
    pub async fn start(&self) -> Result<RunOutcome> {
        let (generation, cancel) = self.begin()?;
        tracing::info!(generation, "test started");

        for phase in Phase::MEASURED {
            // `begin` already entered the first phase.
            if phase != Phase::Ping && !self.enter_phase(generation, phase) {
                return Ok(RunOutcome::Cancelled);
            }

            let live = |value: f64| self.apply_live(generation, value);
            match self.inner.runner.run(phase, &cancel.child_token(), &live).await {
                Ok(value) => {
                    if !self.finish_phase(generation, phase, value) {
                        return Ok(RunOutcome::Cancelled);
                    }
                }
                Err(SpeedTestError::Cancelled) => {
                    tracing::info!(%phase, "test cancelled");
                    return Ok(RunOutcome::Cancelled);
                }
                Err(err) => {
                    tracing::error!(%phase, error = %err, "phase failed, aborting test");
                    self.abort(generation, &err);
                    return Err(err);
                }
            }
        }

        match self.complete(generation) {
            Some(results) => {
                tracing::info!(?results, "test complete");
                Ok(RunOutcome::Completed(results))
            }
            None => Ok(RunOutcome::Cancelled),
        }
    }

    /// Halts any running test and returns to `Idle`, clearing results.
    pub fn reset(&self) {
        self.halt(true);
    }

    /// Halts any running test and returns to `Idle`, keeping the results
    /// of phases that already finished.
    pub fn stop(&self) {
        self.halt(false);
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(&self) -> Result<(u64, CancellationToken)> {
        let mut state = self.lock();
        if state.running {
            return Err(SpeedTestError::AlreadyRunning { phase: state.phase });
        }

        if let Some(stale) = state.cancel.take() {
            stale.cancel();
        }
        let cancel = CancellationToken::new();
        state.cancel = Some(cancel.clone());
        state.generation += 1;
        state.running = true;

        let sink = &self.inner.sink;
        clear_results(&mut state, sink.as_ref());
        sink.on_run_state_changed(true);
        set_phase(&mut state, sink.as_ref(), Phase::Ping);
        Ok((state.generation, cancel))
    }

    fn enter_phase(&self, generation: u64, phase: Phase) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            return false;
        }
        set_phase(&mut state, self.inner.sink.as_ref(), phase);
        true
    }

    fn apply_live(&self, generation: u64, value: f64) {
        let mut state = self.lock();
        if state.generation != generation || !state.phase.is_measuring() {
            tracing::trace!(value, "dropping stale live value");
            return;
        }
        state.live_speed = value;
        self.inner.sink.on_live_speed(value);
    }

    fn finish_phase(&self, generation: u64, phase: Phase, value: f64) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            return false;
        }
        if state.results.record(phase, value) {
            self.inner.sink.on_phase_result(phase, Some(value));
        }
        tracing::info!(%phase, value, unit = phase.unit(), "phase finished");
        true
    }

    fn complete(&self, generation: u64) -> Option<PhaseResults> {
        let mut state = self.lock();
        if state.generation != generation {
            return None;
        }
        state.phase = Phase::Complete;
        state.live_speed = 0.0;
        state.running = false;
        state.cancel = None;

        let sink = &self.inner.sink;
        sink.on_phase_changed(Phase::Complete);
        sink.on_live_speed(0.0);
        sink.on_run_state_changed(false);
        Some(state.results)
    }

    fn abort(&self, generation: u64, err: &SpeedTestError) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        state.cancel = None;
        state.phase = Phase::Idle;
        state.live_speed = 0.0;
        state.running = false;

        let sink = &self.inner.sink;
        clear_results(&mut state, sink.as_ref());
        sink.on_phase_changed(Phase::Idle);
        sink.on_live_speed(0.0);
        sink.on_run_state_changed(false);
        sink.on_error(err);
    }

    fn halt(&self, clear: bool) {
        let mut state = self.lock();
        if let Some(cancel) = state.cancel.take() {
            tracing::info!(phase = %state.phase, "cancelling running test");
            cancel.cancel();
        }
        state.generation += 1;

        let sink = &self.inner.sink;
        if clear {
            clear_results(&mut state, sink.as_ref());
        }
        if state.phase != Phase::Idle {
            state.phase = Phase::Idle;
            sink.on_phase_changed(Phase::Idle);
        }
        state.live_speed = 0.0;
        sink.on_live_speed(0.0);
        if state.running {
            state.running = false;
            sink.on_run_state_changed(false);
        }
    }
}

fn set_phase(state: &mut State, sink: &dyn PresentationSink, phase: Phase) {
    state.phase = phase;
    state.live_speed = 0.0;
    sink.on_phase_changed(phase);
    sink.on_live_speed(0.0);
}

fn clear_results(state: &mut State, sink: &dyn PresentationSink) {
    for phase in Phase::MEASURED {
        if state.results.get(phase).is_some() {
            sink.on_phase_result(phase, None);
        }
    }
    state.results = PhaseResults::default();
}
