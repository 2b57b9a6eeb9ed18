use super::stats::{jitter, trimmed_mean_latency};
use super::transport::TransportClient;
use super::{LiveFn, Result, SpeedTestError};
use crate::settings::Settings;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sequential round-trip probes with fixed spacing. Failed probes are skipped.
struct ProbeSeries {
    samples: Vec<f64>,
    probe_count: usize,
    interval: Duration,
}

impl ProbeSeries {
    fn new(settings: &Settings) -> Self {
        Self {
            samples: Vec::with_capacity(settings.probe_count),
            probe_count: settings.probe_count,
            interval: settings.probe_interval(),
        }
    }

    async fn collect(
        &mut self,
        transport: &dyn TransportClient,
        cancel: &CancellationToken,
        mut on_sample: impl FnMut(&[f64]) + Send,
    ) -> Result<()> {
        self.samples.clear();

        for i in 0..self.probe_count {
            if i > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(SpeedTestError::Cancelled),
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SpeedTestError::Cancelled),
                outcome = transport.probe() => outcome,
            };

            match outcome {
                Ok(rtt) => {
                    let ms = rtt.as_nanos() as f64 / 1_000_000.0;
                    tracing::debug!(probe = i + 1, rtt_ms = ms, "probe");
                    self.samples.push(ms);
                    on_sample(&self.samples);
                }
                Err(err) => {
                    tracing::warn!(probe = i + 1, error = %err, "probe failed, skipping");
                }
            }
        }

        Ok(())
    }
}

pub struct PingTest {
    series: ProbeSeries,
}

impl PingTest {
    pub fn new(settings: &Settings) -> Self {
        Self {
            series: ProbeSeries::new(settings),
        }
    }

    /// Live value is each probe's round trip; the result is the trimmed mean.
    pub async fn run(
        mut self,
        transport: &dyn TransportClient,
        cancel: &CancellationToken,
        live: &LiveFn<'_>,
    ) -> Result<f64> {
        self.series
            .collect(transport, cancel, |samples| {
                if let Some(&latest) = samples.last() {
                    live(latest);
                }
            })
            .await?;

        let latency = trimmed_mean_latency(&self.series.samples)?;
        tracing::info!(samples = self.series.samples.len(), latency_ms = latency, "ping complete");
        Ok(latency)
    }
}

pub struct JitterTest {
    series: ProbeSeries,
}

impl JitterTest {
    pub fn new(settings: &Settings) -> Self {
        Self {
            series: ProbeSeries::new(settings),
        }
    }

    /// Live value is the running jitter once two samples exist.
    pub async fn run(
        mut self,
        transport: &dyn TransportClient,
        cancel: &CancellationToken,
        live: &LiveFn<'_>,
    ) -> Result<f64> {
        self.series
            .collect(transport, cancel, |samples| {
                if let Ok(running) = jitter(samples) {
                    live(running);
                }
            })
            .await?;

        let jitter_ms = jitter(&self.series.samples)?;
        tracing::info!(samples = self.series.samples.len(), jitter_ms, "jitter complete");
        Ok(jitter_ms)
    }
}
