use super::stats::{average_throughput_mbps, windowed_throughput_mbps};
use std::time::Duration;
use tokio::time::Instant;

/// Byte counter for a transfer phase.
///
/// Produces a windowed throughput value at most once per `interval` and the
/// phase-wide average on request.
#[derive(Debug)]
pub struct ThroughputMeter {
    start: Instant,
    interval: Duration,
    total_bytes: u64,
    last_update: Instant,
    last_bytes: u64,
}

impl ThroughputMeter {
    pub fn start_at(start: Instant, interval: Duration) -> Self {
        Self {
            start,
            interval,
            total_bytes: 0,
            last_update: start,
            last_bytes: 0,
        }
    }

    /// Adds `bytes` observed at `now`; returns the windowed Mbps when a
    /// reporting interval has elapsed since the last report.
    pub fn record(&mut self, bytes: u64, now: Instant) -> Option<f64> {
        self.total_bytes += bytes;

        let window = now.duration_since(self.last_update);
        if window < self.interval || window.is_zero() {
            return None;
        }

        let mbps = windowed_throughput_mbps(self.total_bytes - self.last_bytes, window);
        self.last_update = now;
        self.last_bytes = self.total_bytes;
        Some(mbps)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn elapsed_at(&self, now: Instant) -> Duration {
        now.duration_since(self.start)
    }

    pub fn average_mbps_at(&self, now: Instant) -> f64 {
        average_throughput_mbps(self.total_bytes, self.elapsed_at(now))
    }
}
