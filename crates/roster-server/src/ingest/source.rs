//! Ingestion sources
//!
//! Every source yields a [`ChunkStream`] of raw bytes. Remote extracts are
//! streamed straight off the HTTP response; stored objects are fetched whole
//! (with retries) and replayed in fixed-size chunks so they pass through the
//! same decoder.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::decoder::is_blank;
use super::{ImportError, Result};

/// Stream of raw source bytes
pub type ChunkStream = BoxStream<'static, Result<Bytes>>;

/// Chunk size used when replaying a fetched object
pub const REPLAY_CHUNK_SIZE: usize = 64 * 1024;

const USER_AGENT: &str = concat!("roster-importer/", env!("CARGO_PKG_VERSION"));

/// Object storage collaborator
///
/// Any error is treated as retryable by [`StoredObjectSource`].
#[async_trait]
pub trait ObjectFetcher: Send + Sync {
    async fn fetch(&self, key: &str) -> anyhow::Result<Vec<u8>>;
}

/// Streams a remote extract over HTTP
#[derive(Clone)]
pub struct RemoteSource {
    client: Client,
}

impl RemoteSource {
    /// Only the connection is timed out; the body may take hours.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ImportError::SourceUnavailable(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Open `url` and return its body as a chunk stream
    pub async fn open(&self, url: &str) -> Result<ChunkStream> {
        info!(url, "Opening remote source");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ImportError::SourceUnavailable(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ImportError::SourceUnavailable(format!(
                "{} returned HTTP {}",
                url, status
            )));
        }

        debug!(url, content_length = ?response.content_length(), "Remote source connected");

        let stream = response
            .bytes_stream()
            .map_err(|e| ImportError::SourceUnavailable(format!("stream interrupted: {}", e)));

        Ok(stream.boxed())
    }
}

/// Fetches a stored object with linear backoff between attempts
pub struct StoredObjectSource {
    fetcher: Arc<dyn ObjectFetcher>,
    attempts: u32,
    retry_delay: Duration,
}

impl StoredObjectSource {
    pub fn new(fetcher: Arc<dyn ObjectFetcher>, attempts: u32, retry_delay: Duration) -> Self {
        Self {
            fetcher,
            attempts: attempts.max(1),
            retry_delay,
        }
    }

    pub async fn fetch(&self, key: &str) -> Result<Bytes> {
        let mut last_error = None;

        for attempt in 1..=self.attempts {
            match self.fetcher.fetch(key).await {
                Ok(data) => {
                    info!(key, bytes = data.len(), attempt, "Fetched stored object");
                    return Ok(Bytes::from(data));
                },
                Err(e) => {
                    warn!(key, "Fetch attempt {}/{} failed: {:#}", attempt, self.attempts, e);
                    last_error = Some(e);

                    if attempt < self.attempts {
                        tokio::time::sleep(self.retry_delay * attempt).await;
                    }
                },
            }
        }

        let cause = last_error.map(|e| format!("{:#}", e)).unwrap_or_default();
        Err(ImportError::SourceUnavailable(format!(
            "{} after {} attempts: {}",
            key, self.attempts, cause
        )))
    }
}

/// Replay an in-memory object as a chunk stream
pub fn chunked(data: Bytes, chunk_size: usize) -> ChunkStream {
    let chunk_size = chunk_size.max(1);
    let len = data.len();
    let chunks = (0..len)
        .step_by(chunk_size)
        .map(move |start| Ok(data.slice(start..(start + chunk_size).min(len))));

    stream::iter(chunks.collect::<Vec<_>>()).boxed()
}

/// Data rows in a delimited object: non-blank lines after the header
pub fn count_data_lines(data: &[u8]) -> u64 {
    let non_blank = data
        .split(|b| *b == b'\n')
        .filter(|line| !is_blank(&String::from_utf8_lossy(line)))
        .count() as u64;

    non_blank.saturating_sub(1)
}
