//! Bounded download of the read URL.
//!
//! One GET, one deadline, one attempt. The body is streamed and the
//! download is abandoned as soon as it grows past [`MAX_DOWNLOAD_BYTES`],
//! so an oversized or endless response never gets buffered in full.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::error::DownloadError;

/// Maximum body size: 2 MiB
pub const MAX_DOWNLOAD_BYTES: usize = 2 << 20;

/// Whole-request deadline: 10 seconds
const DOWNLOAD_TIMEOUT_SECS: u64 = 10;

/// User-Agent header sent with the request.
const USER_AGENT: &str = concat!("sandhost/", env!("CARGO_PKG_VERSION"));

/// Bytes of a successful download. `bytes.len()` never exceeds the ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub bytes: Vec<u8>,
}

impl FetchResult {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Source of the sandbox input.
///
/// The pipeline only calls this after the origin check passed.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResult, DownloadError>;
}

/// HTTP implementation backed by `reqwest`.
pub struct HttpFetcher {
    client: Client,
    limit: usize,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, DownloadError> {
        Self::with_limit(MAX_DOWNLOAD_BYTES)
    }

    /// Creates a fetcher with a custom byte ceiling.
    pub fn with_limit(limit: usize) -> Result<Self, DownloadError> {
        // Redirects are off: the target of a redirect never went through
        // the allow list.
        let client = Client::builder()
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self { client, limit })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResult, DownloadError> {
        debug!("Downloading {url}");

        let response = self.client.get(url).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(DownloadError::Status(status.as_u16()));
        }

        // Check Content-Length before reading anything
        if let Some(len) = response.content_length() {
            if len > self.limit as u64 {
                return Err(DownloadError::TooLarge { limit: self.limit });
            }
        }

        let body = read_bounded(response.bytes_stream(), self.limit).await?;
        debug!("Downloaded {} bytes from {url}", body.len());

        Ok(FetchResult { bytes: body })
    }
}

/// Collects a body stream, failing once more than `limit` bytes arrived.
///
/// The collected body never exceeds `limit`; the chunk that crosses the
/// ceiling is only looked at for its length.
async fn read_bounded<S, B, E>(stream: S, limit: usize) -> Result<Vec<u8>, DownloadError>
where
    S: futures::Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    DownloadError: From<E>,
{
    let mut stream = std::pin::pin!(stream);
    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let chunk = chunk.as_ref();
        if body.len() + chunk.len() > limit {
            return Err(DownloadError::TooLarge { limit });
        }
        body.extend_from_slice(chunk);
    }
    Ok(body)
}
