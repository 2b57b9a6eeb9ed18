use crate::speedtest::{Phase, SpeedTestError};
use tokio::sync::mpsc;

/// Receives state changes from the orchestrator.
///
/// Calls are made while the orchestrator's state is locked, in the order the
/// changes happen. Implementations must return quickly and must not call back
/// into the orchestrator.
pub trait PresentationSink: Send + Sync {
    fn on_phase_changed(&self, phase: Phase);

    fn on_live_speed(&self, value: f64);

    /// `None` announces that a previously reported result was cleared.
    fn on_phase_result(&self, phase: Phase, value: Option<f64>);

    fn on_run_state_changed(&self, running: bool);

    /// A run ended with an error; the orchestrator is back in `Idle`.
    fn on_error(&self, _error: &SpeedTestError) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum TestUpdate {
    PhaseChanged(Phase),
    LiveSpeed(f64),
    PhaseResult { phase: Phase, value: Option<f64> },
    RunState(bool),
    Failed(String),
}

/// Forwards notifications over an unbounded channel so the engine never waits on the display.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<TestUpdate>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TestUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, update: TestUpdate) {
        // Receiver gone means nobody is watching; the run continues regardless.
        let _ = self.tx.send(update);
    }
}

impl PresentationSink for ChannelSink {
    fn on_phase_changed(&self, phase: Phase) {
        self.send(TestUpdate::PhaseChanged(phase));
    }

    fn on_live_speed(&self, value: f64) {
        self.send(TestUpdate::LiveSpeed(value));
    }

    fn on_phase_result(&self, phase: Phase, value: Option<f64>) {
        self.send(TestUpdate::PhaseResult { phase, value });
    }

    fn on_run_state_changed(&self, running: bool) {
        self.send(TestUpdate::RunState(running));
    }

    fn on_error(&self, error: &SpeedTestError) {
        self.send(TestUpdate::Failed(error.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_preserves_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.on_run_state_changed(true);
        sink.on_phase_changed(Phase::Ping);
        sink.on_live_speed(21.5);
        sink.on_phase_result(Phase::Ping, Some(21.0));
        sink.on_error(&SpeedTestError::Cancelled);

        assert_eq!(rx.try_recv().unwrap(), TestUpdate::RunState(true));
        assert_eq!(rx.try_recv().unwrap(), TestUpdate::PhaseChanged(Phase::Ping));
        assert_eq!(rx.try_recv().unwrap(), TestUpdate::LiveSpeed(21.5));
        assert_eq!(
            rx.try_recv().unwrap(),
            TestUpdate::PhaseResult { phase: Phase::Ping, value: Some(21.0) }
        );
        assert_eq!(rx.try_recv().unwrap(), TestUpdate::Failed("test cancelled".to_string()));
    }

    #[test]
    fn channel_sink_tolerates_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.on_live_speed(1.0);
    }
}
