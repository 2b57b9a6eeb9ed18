use super::meter::ThroughputMeter;
use super::transport::{TransportClient, TransportError};
use super::{LiveFn, Phase, Result, SpeedTestError};
use crate::settings::{DownloadMode, Settings};
use futures::StreamExt;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct DownloadTest {
    budget: Duration,
    report_interval: Duration,
    mode: DownloadMode,
    max_failures: u32,
}

impl DownloadTest {
    pub fn new(settings: &Settings) -> Self {
        Self {
            budget: settings.download_budget(),
            report_interval: settings.report_interval(),
            mode: settings.download_mode,
            max_failures: settings.max_consecutive_failures,
        }
    }

    /// Reads download streams until the budget is spent (or, in single-stream
    /// mode, the first stream drains) and returns the average Mbps.
    pub async fn run(
        self,
        transport: &dyn TransportClient,
        cancel: &CancellationToken,
        live: &LiveFn<'_>,
    ) -> Result<f64> {
        let start = Instant::now();
        let deadline = start + self.budget;
        let mut meter = ThroughputMeter::start_at(start, self.report_interval);
        let mut failures: u32 = 0;
        let mut streams_opened: u32 = 0;
        let mut last_error: Option<TransportError> = None;

        'budget: while Instant::now() < deadline {
            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SpeedTestError::Cancelled),
                opened = transport.open_download_stream() => opened,
                _ = tokio::time::sleep_until(deadline) => break 'budget,
            };

            let mut stream = match opened {
                Ok(stream) => stream,
                Err(err) => {
                    failures += 1;
                    tracing::warn!(error = %err, failures, "failed to open download stream");
                    if failures > self.max_failures {
                        return Err(SpeedTestError::TransportUnavailable {
                            phase: Phase::Download,
                            source: err,
                        });
                    }
                    last_error = Some(err);
                    continue;
                }
            };
            streams_opened += 1;
            let mut stream_bytes: u64 = 0;

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::debug!(bytes = meter.total_bytes(), "download cancelled, dropping stream");
                        return Err(SpeedTestError::Cancelled);
                    }
                    next = stream.next() => next,
                    _ = tokio::time::sleep_until(deadline) => break 'budget,
                };

                match next {
                    Some(Ok(chunk)) => {
                        failures = 0;
                        stream_bytes += chunk.len() as u64;
                        let now = Instant::now();
                        if let Some(mbps) = meter.record(chunk.len() as u64, now) {
                            live(mbps);
                        }
                        if now >= deadline {
                            break 'budget;
                        }
                    }
                    Some(Err(err)) => {
                        failures += 1;
                        tracing::warn!(error = %err, failures, "download stream failed");
                        if failures > self.max_failures {
                            return Err(SpeedTestError::TransportUnavailable {
                                phase: Phase::Download,
                                source: err,
                            });
                        }
                        last_error = Some(err);
                        break;
                    }
                    None => {
                        tracing::debug!(stream_bytes, "download stream drained");
                        if stream_bytes == 0 {
                            failures += 1;
                            tracing::warn!(failures, "download stream closed without data");
                            if failures > self.max_failures {
                                return Err(SpeedTestError::TransportUnavailable {
                                    phase: Phase::Download,
                                    source: TransportError::Closed,
                                });
                            }
                            last_error = Some(TransportError::Closed);
                        }
                        break;
                    }
                }
            }

            if self.mode == DownloadMode::SingleStream {
                break;
            }
        }

        let end = Instant::now();
        // No bytes moved: fail instead of reporting 0 Mbps.
        if meter.total_bytes() == 0 {
            return Err(SpeedTestError::TransportUnavailable {
                phase: Phase::Download,
                source: last_error.unwrap_or(TransportError::Closed),
            });
        }

        let mbps = meter.average_mbps_at(end);
        tracing::info!(
            bytes = meter.total_bytes(),
            elapsed_ms = meter.elapsed_at(end).as_millis() as u64,
            streams_opened,
            mbps,
            "download complete"
        );
        Ok(mbps)
    }
}
