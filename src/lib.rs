//! linkspeed -- measures latency, jitter, download and upload throughput
//! against a speed-test endpoint.
//!
//! [`app::TestOrchestrator`] sequences the phases, [`speedtest::PhaseRunner`]
//! measures one phase over a [`speedtest::transport::TransportClient`], and a
//! [`sink::PresentationSink`] is told about every state change.

pub mod app;
pub mod settings;
pub mod sink;
pub mod speedtest;

pub use app::{RunOutcome, Snapshot, TestOrchestrator};
pub use settings::{DownloadMode, Settings};
pub use sink::{ChannelSink, PresentationSink, TestUpdate};
pub use speedtest::{Phase, PhaseResults, SpeedTestError};
