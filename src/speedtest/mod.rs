pub mod download;
pub mod meter;
pub mod ping;
pub mod stats;
pub mod transport;
pub mod upload;

use crate::settings::{Settings, SettingsError};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use transport::{TransportClient, TransportError};

use download::DownloadTest;
use ping::{JitterTest, PingTest};
use upload::UploadTest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Ping,
    Jitter,
    Download,
    Upload,
    Complete,
}

impl Phase {
    /// The measured phases, in the order a run visits them.
    pub const MEASURED: [Phase; 4] = [Phase::Ping, Phase::Jitter, Phase::Download, Phase::Upload];

    pub fn is_measuring(self) -> bool {
        !matches!(self, Phase::Idle | Phase::Complete)
    }

    /// Unit of the live value while this phase runs.
    pub fn unit(self) -> &'static str {
        match self {
            Phase::Ping | Phase::Jitter => "ms",
            Phase::Download | Phase::Upload => "Mbps",
            Phase::Idle | Phase::Complete => "",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Ping => "ping",
            Phase::Jitter => "jitter",
            Phase::Download => "download",
            Phase::Upload => "upload",
            Phase::Complete => "complete",
        };
        f.pad(name)
    }
}

/// Final value of every measured phase. Entries are set once per run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PhaseResults {
    pub ping_ms: Option<f64>,
    pub jitter_ms: Option<f64>,
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
}

impl PhaseResults {
    pub fn get(&self, phase: Phase) -> Option<f64> {
        match phase {
            Phase::Ping => self.ping_ms,
            Phase::Jitter => self.jitter_ms,
            Phase::Download => self.download_mbps,
            Phase::Upload => self.upload_mbps,
            Phase::Idle | Phase::Complete => None,
        }
    }

    /// Stores `value` for `phase` unless a value is already present.
    /// Returns whether the value was stored.
    pub fn record(&mut self, phase: Phase, value: f64) -> bool {
        let slot = match phase {
            Phase::Ping => &mut self.ping_ms,
            Phase::Jitter => &mut self.jitter_ms,
            Phase::Download => &mut self.download_mbps,
            Phase::Upload => &mut self.upload_mbps,
            Phase::Idle | Phase::Complete => return false,
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        true
    }

    pub fn is_empty(&self) -> bool {
        Phase::MEASURED.iter().all(|p| self.get(*p).is_none())
    }
}

#[derive(Debug, Error)]
pub enum SpeedTestError {
    #[error("transport unavailable during {phase} phase: {source}")]
    TransportUnavailable {
        phase: Phase,
        #[source]
        source: TransportError,
    },

    #[error("not enough samples: needed {needed}, got {got}")]
    InsufficientSamples { needed: usize, got: usize },

    #[error("test cancelled")]
    Cancelled,

    #[error("a test is already running ({phase} phase)")]
    AlreadyRunning { phase: Phase },

    #[error("{phase} is not a measured phase")]
    NotMeasurable { phase: Phase },

    #[error(transparent)]
    InvalidSettings(#[from] SettingsError),
}

pub type Result<T, E = SpeedTestError> = std::result::Result<T, E>;

/// Callback receiving live values while a phase runs.
pub type LiveFn<'a> = dyn Fn(f64) + Send + Sync + 'a;

/// Runs a single measured phase against the transport.
#[derive(Clone)]
pub struct PhaseRunner {
    transport: Arc<dyn TransportClient>,
    settings: Settings,
}

impl PhaseRunner {
    /// Fails with `InvalidSettings` when `settings` does not validate.
    pub fn new(transport: Arc<dyn TransportClient>, settings: Settings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { transport, settings })
    }

    pub async fn run(&self, phase: Phase, cancel: &CancellationToken, live: &LiveFn<'_>) -> Result<f64> {
        let transport = self.transport.as_ref();
        let settings = &self.settings;
        match phase {
            Phase::Ping => PingTest::new(settings).run(transport, cancel, live).await,
            Phase::Jitter => JitterTest::new(settings).run(transport, cancel, live).await,
            Phase::Download => DownloadTest::new(settings).run(transport, cancel, live).await,
            Phase::Upload => UploadTest::new(settings).run(transport, cancel, live).await,
            Phase::Idle | Phase::Complete => Err(SpeedTestError::NotMeasurable { phase }),
        }
    }
}
