use crate::settings::Settings;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server responded with status {0}")]
    Status(u16),

    #[error("connection closed")]
    Closed,
}

/// A readable byte stream; dropping it releases the underlying connection.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// The network operations the measurement engine consumes.
#[async_trait::async_trait]
pub trait TransportClient: Send + Sync {
    /// One round trip to a liveness endpoint, defeating caches.
    async fn probe(&self) -> Result<Duration, TransportError>;

    /// Opens a stream the server feeds until the caller drops it.
    async fn open_download_stream(&self) -> Result<ByteStream, TransportError>;

    /// Sends one payload and returns once the server acknowledged it.
    async fn post_upload_chunk(&self, payload: Bytes) -> Result<(), TransportError>;
}

/// HTTP binding: `GET /ping`, `GET /download`, `POST /upload` under the configured endpoint.
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    request_timeout: Duration,
    counter: AtomicU64,
}

impl HttpTransport {
    pub fn new(settings: &Settings) -> Result<Self, TransportError> {
        // No overall timeout on the client: a download stream lives for the whole budget.
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout())
            .build()?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            request_timeout: settings.request_timeout(),
            counter: AtomicU64::new(0),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path)
    }

    fn cache_busting_url(&self, path: &str) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}?_={}-{}", self.url(path), nanos, seq)
    }
}

#[async_trait::async_trait]
impl TransportClient for HttpTransport {
    async fn probe(&self) -> Result<Duration, TransportError> {
        let url = self.cache_busting_url("ping");
        let start = Instant::now();
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::CACHE_CONTROL, "no-store")
            .timeout(self.request_timeout)
            .send()
            .await?;
        check_status(&response)?;
        // Include the (tiny) body so the round trip is complete.
        response.bytes().await?;
        Ok(start.elapsed())
    }

    async fn open_download_stream(&self) -> Result<ByteStream, TransportError> {
        let url = self.cache_busting_url("download");
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::CACHE_CONTROL, "no-store")
            .send()
            .await?;
        check_status(&response)?;
        tracing::debug!(%url, content_length = ?response.content_length(), "download stream opened");
        Ok(response.bytes_stream().map_err(TransportError::from).boxed())
    }

    async fn post_upload_chunk(&self, payload: Bytes) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.url("upload"))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .timeout(self.request_timeout)
            .body(payload)
            .send()
            .await?;
        check_status(&response)
    }
}

fn check_status(response: &reqwest::Response) -> Result<(), TransportError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(TransportError::Status(status.as_u16()))
    }
}
