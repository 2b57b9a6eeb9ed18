//! Scripted transport and recording sink shared by the integration tests.
#![allow(dead_code)]

use bytes::Bytes;
use futures::StreamExt;
use linkspeed::speedtest::transport::{ByteStream, TransportClient, TransportError};
use linkspeed::{DownloadMode, Phase, PresentationSink, Settings, SpeedTestError, TestUpdate};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const LATENCIES_MS: [u64; 10] = [20, 22, 21, 23, 20, 21, 22, 20, 21, 23];

pub struct StubTransport {
    /// Round trips handed out in order, cycling.
    pub latencies_ms: Vec<u64>,
    /// Zero-based probe calls that fail.
    pub failing_probes: Vec<usize>,

    pub chunk_bytes: usize,
    pub chunk_interval: Duration,
    /// `None` streams forever; `Some(0)` opens streams that end at once.
    pub chunks_per_stream: Option<usize>,
    /// Every stream yields an error in place of chunk N and then ends.
    pub stream_error_after: Option<usize>,
    /// The first N open attempts fail.
    pub failing_opens: usize,

    pub upload_delay: Duration,
    /// Zero-based post calls that fail.
    pub failing_uploads: Vec<usize>,
    pub fail_all_uploads: bool,

    pub probe_calls: AtomicUsize,
    pub open_calls: AtomicUsize,
    pub upload_calls: AtomicUsize,
    pub streams_opened: AtomicUsize,
    pub bytes_posted: AtomicU64,
    pub stream_dropped: Arc<AtomicBool>,
}

impl Default for StubTransport {
    fn default() -> Self {
        Self {
            latencies_ms: LATENCIES_MS.to_vec(),
            failing_probes: Vec::new(),
            chunk_bytes: 1_000_000,
            chunk_interval: Duration::from_millis(800),
            chunks_per_stream: Some(10),
            stream_error_after: None,
            failing_opens: 0,
            upload_delay: Duration::from_millis(100),
            failing_uploads: Vec::new(),
            fail_all_uploads: false,
            probe_calls: AtomicUsize::new(0),
            open_calls: AtomicUsize::new(0),
            upload_calls: AtomicUsize::new(0),
            streams_opened: AtomicUsize::new(0),
            bytes_posted: AtomicU64::new(0),
            stream_dropped: Arc::new(AtomicBool::new(false)),
        }
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl TransportClient for StubTransport {
    async fn probe(&self) -> Result<Duration, TransportError> {
        let call = self.probe_calls.fetch_add(1, Ordering::SeqCst);
        let rtt = Duration::from_millis(self.latencies_ms[call % self.latencies_ms.len()]);
        tokio::time::sleep(rtt).await;
        if self.failing_probes.contains(&call) {
            return Err(TransportError::Status(503));
        }
        Ok(rtt)
    }

    async fn open_download_stream(&self) -> Result<ByteStream, TransportError> {
        let call = self.open_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failing_opens {
            return Err(TransportError::Status(502));
        }
        self.streams_opened.fetch_add(1, Ordering::SeqCst);

        let size = self.chunk_bytes;
        let interval = self.chunk_interval;
        let limit = self.chunks_per_stream;
        let error_after = self.stream_error_after;
        let guard = DropFlag(self.stream_dropped.clone());

        let stream = futures::stream::unfold((0usize, false, guard), move |(sent, failed, guard)| async move {
            if failed || limit.is_some_and(|limit| sent >= limit) {
                return None;
            }
            tokio::time::sleep(interval).await;
            if error_after == Some(sent) {
                return Some((Err(TransportError::Status(500)), (sent, true, guard)));
            }
            Some((Ok(Bytes::from(vec![0u8; size])), (sent + 1, false, guard)))
        });
        Ok(stream.boxed())
    }

    async fn post_upload_chunk(&self, payload: Bytes) -> Result<(), TransportError> {
        let call = self.upload_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.upload_delay).await;
        if self.fail_all_uploads || self.failing_uploads.contains(&call) {
            return Err(TransportError::Status(500));
        }
        self.bytes_posted.fetch_add(payload.len() as u64, Ordering::SeqCst);
        Ok(())
    }
}

/// Settings sized so a full run takes a few (virtual) seconds.
pub fn test_settings() -> Settings {
    Settings {
        download_budget_ms: 30_000,
        download_mode: DownloadMode::SingleStream,
        upload_budget_ms: 1_000,
        upload_chunk_bytes: 1_000,
        ..Settings::default()
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TestUpdate>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<TestUpdate> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn phases(&self) -> Vec<Phase> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TestUpdate::PhaseChanged(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    fn push(&self, update: TestUpdate) {
        self.events.lock().unwrap().push(update);
    }
}

impl PresentationSink for RecordingSink {
    fn on_phase_changed(&self, phase: Phase) {
        self.push(TestUpdate::PhaseChanged(phase));
    }

    fn on_live_speed(&self, value: f64) {
        self.push(TestUpdate::LiveSpeed(value));
    }

    fn on_phase_result(&self, phase: Phase, value: Option<f64>) {
        self.push(TestUpdate::PhaseResult { phase, value });
    }

    fn on_run_state_changed(&self, running: bool) {
        self.push(TestUpdate::RunState(running));
    }

    fn on_error(&self, error: &SpeedTestError) {
        self.push(TestUpdate::Failed(error.to_string()));
    }
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}
