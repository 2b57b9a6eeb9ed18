use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DownloadMode {
    /// Keep reopening streams until the download budget is spent.
    Budgeted,
    /// Read one stream until it drains or the budget is spent.
    SingleStream,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub endpoint: String,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub probe_count: usize,
    pub probe_interval_ms: u64,
    pub download_budget_ms: u64,
    pub download_mode: DownloadMode,
    pub upload_budget_ms: u64,
    pub upload_chunk_bytes: usize,
    pub report_interval_ms: u64,
    pub max_consecutive_failures: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8001/api".to_string(),
            request_timeout_ms: 5_000,
            connect_timeout_ms: 10_000,
            probe_count: 10,
            probe_interval_ms: 100,
            download_budget_ms: 8_000,
            download_mode: DownloadMode::Budgeted,
            upload_budget_ms: 5_000,
            upload_chunk_bytes: 2 * 1024 * 1024,
            report_interval_ms: 200,
            max_consecutive_failures: 3,
        }
    }
}

impl Settings {
    pub const MAX_UPLOAD_CHUNK_BYTES: usize = 64 * 1024 * 1024;

    /// Reads a TOML file; missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let invalid = |msg: String| -> Result<(), SettingsError> { Err(SettingsError::Invalid(msg)) };

        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return invalid(format!("endpoint must be an http(s) URL, got {:?}", self.endpoint));
        }
        if self.probe_count < 3 {
            return invalid(format!("probe_count must be at least 3, got {}", self.probe_count));
        }
        if self.download_budget_ms == 0 || self.upload_budget_ms == 0 {
            return invalid("phase budgets must be non-zero".to_string());
        }
        if self.upload_chunk_bytes == 0 || self.upload_chunk_bytes > Self::MAX_UPLOAD_CHUNK_BYTES {
            return invalid(format!(
                "upload_chunk_bytes must be in 1..={}, got {}",
                Self::MAX_UPLOAD_CHUNK_BYTES,
                self.upload_chunk_bytes
            ));
        }
        // Live values are shown at most 10 times per second. Ping and jitter
        // emit one per probe, so the probe spacing is held to the same floor.
        if !(100..=1_000).contains(&self.report_interval_ms) {
            return invalid(format!(
                "report_interval_ms must be in 100..=1000, got {}",
                self.report_interval_ms
            ));
        }
        if self.probe_interval_ms < 100 {
            return invalid(format!(
                "probe_interval_ms must be at least 100, got {}",
                self.probe_interval_ms
            ));
        }
        if self.max_consecutive_failures == 0 {
            return invalid("max_consecutive_failures must be at least 1".to_string());
        }
        if self.request_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return invalid("timeouts must be non-zero".to_string());
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn download_budget(&self) -> Duration {
        Duration::from_millis(self.download_budget_ms)
    }

    pub fn upload_budget(&self) -> Duration {
        Duration::from_millis(self.upload_budget_ms)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}
