use super::meter::ThroughputMeter;
use super::transport::{TransportClient, TransportError};
use super::{LiveFn, Phase, Result, SpeedTestError};
use crate::settings::Settings;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct UploadTest {
    rng: StdRng,
    chunk_size: usize,
    budget: Duration,
    report_interval: Duration,
    max_failures: u32,
}

impl UploadTest {
    pub fn new(settings: &Settings) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            chunk_size: settings.upload_chunk_bytes,
            budget: settings.upload_budget(),
            report_interval: settings.report_interval(),
            max_failures: settings.max_consecutive_failures,
        }
    }

    fn next_payload(&mut self) -> Bytes {
        let mut data = vec![0u8; self.chunk_size];
        self.rng.fill_bytes(&mut data);
        Bytes::from(data)
    }

    /// Posts random payloads one at a time until the budget is spent and
    /// returns the average Mbps over acknowledged bytes.
    pub async fn run(
        mut self,
        transport: &dyn TransportClient,
        cancel: &CancellationToken,
        live: &LiveFn<'_>,
    ) -> Result<f64> {
        let start = Instant::now();
        let deadline = start + self.budget;
        let mut meter = ThroughputMeter::start_at(start, self.report_interval);
        let mut failures: u32 = 0;
        let mut posts: u64 = 0;
        let mut last_error: Option<TransportError> = None;

        while Instant::now() < deadline {
            let payload = self.next_payload();
            let len = payload.len() as u64;

            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SpeedTestError::Cancelled),
                sent = transport.post_upload_chunk(payload) => sent,
            };

            match sent {
                Ok(()) => {
                    failures = 0;
                    posts += 1;
                    if let Some(mbps) = meter.record(len, Instant::now()) {
                        live(mbps);
                    }
                }
                Err(err) => {
                    failures += 1;
                    tracing::warn!(error = %err, failures, "upload chunk failed");
                    if failures > self.max_failures {
                        return Err(SpeedTestError::TransportUnavailable {
                            phase: Phase::Upload,
                            source: err,
                        });
                    }
                    last_error = Some(err);
                }
            }
        }

        let end = Instant::now();
        if meter.total_bytes() == 0 {
            return Err(SpeedTestError::TransportUnavailable {
                phase: Phase::Upload,
                source: last_error.unwrap_or(TransportError::Closed),
            });
        }

        let mbps = meter.average_mbps_at(end);
        tracing::info!(
            bytes = meter.total_bytes(),
            elapsed_ms = meter.elapsed_at(end).as_millis() as u64,
            posts,
            mbps,
            "upload complete"
        );
        Ok(mbps)
    }
}
