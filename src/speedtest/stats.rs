//! Statistics over latency samples and transfer counters.
//!
//! Latency samples are milliseconds as `f64`, in capture order.

use super::{Result, SpeedTestError};
use std::time::Duration;

pub const MIN_TRIMMED_SAMPLES: usize = 3;
pub const MIN_JITTER_SAMPLES: usize = 2;

/// Mean of the samples after dropping the single smallest and single largest value.
pub fn trimmed_mean_latency(samples: &[f64]) -> Result<f64> {
    if samples.len() < MIN_TRIMMED_SAMPLES {
        return Err(SpeedTestError::InsufficientSamples {
            needed: MIN_TRIMMED_SAMPLES,
            got: samples.len(),
        });
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let middle = &sorted[1..sorted.len() - 1];
    Ok(middle.iter().sum::<f64>() / middle.len() as f64)
}

/// Mean absolute difference between consecutive samples.
pub fn jitter(samples: &[f64]) -> Result<f64> {
    if samples.len() < MIN_JITTER_SAMPLES {
        return Err(SpeedTestError::InsufficientSamples {
            needed: MIN_JITTER_SAMPLES,
            got: samples.len(),
        });
    }

    let total: f64 = samples.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    Ok(total / (samples.len() - 1) as f64)
}

/// Throughput over one reporting window. The window must be non-zero.
pub fn windowed_throughput_mbps(bytes_in_window: u64, window: Duration) -> f64 {
    mbps(bytes_in_window, window)
}

/// Throughput over a whole phase; zero when no time has elapsed.
pub fn average_throughput_mbps(total_bytes: u64, total: Duration) -> f64 {
    if total.is_zero() {
        return 0.0;
    }
    mbps(total_bytes, total)
}

fn mbps(bytes: u64, span: Duration) -> f64 {
    (bytes as f64 * 8.0) / span.as_secs_f64() / 1_000_000.0
}
