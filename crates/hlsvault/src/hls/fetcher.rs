// HLS Segment Fetcher: downloads one media segment to disk and verifies it.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest::header::HeaderMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::DownloadError;
use crate::config::{FetcherConfig, HttpConfig};
use crate::fs;
use crate::hls::health::Activity;
use crate::hls::lease::WriteLease;
use crate::http::with_bearer;

/// Where a worker writes, and under which lease generation.
#[derive(Debug, Clone)]
pub struct SegmentTarget {
    pub lease: Arc<WriteLease>,
    pub generation: u64,
}

impl SegmentTarget {
    pub fn path(&self) -> &Path {
        self.lease.path()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentOutcome {
    Success { bytes: u64 },
    Failed { reason: String },
    /// Cancelled or superseded; the pool ignores these.
    Cancelled,
}

#[async_trait]
pub trait SegmentDownloader: Send + Sync {
    /// Never returns an error: every failure becomes [`SegmentOutcome::Failed`].
    async fn fetch_segment(
        &self,
        url: &str,
        target: &SegmentTarget,
        activity: &dyn Activity,
        token: &CancellationToken,
    ) -> SegmentOutcome;
}

pub struct SegmentFetcher {
    client: Client,
    headers: HeaderMap,
    config: FetcherConfig,
}

impl SegmentFetcher {
    pub fn new(
        client: Client,
        http: &HttpConfig,
        config: FetcherConfig,
        credential: Option<&str>,
    ) -> Self {
        Self {
            client,
            headers: with_bearer(http.media_headers(), credential),
            config,
        }
    }

    async fn download(
        &self,
        url: &str,
        target: &SegmentTarget,
        activity: &dyn Activity,
        token: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        let temp_path = target.lease.temp_path(target.generation);
        fs::ensure_parent_dir(&temp_path).await?;

        let result = async {
            let written = self.stream_to(url, &temp_path, activity, token).await?;
            self.check_header(&temp_path).await?;
            target.lease.commit(target.generation, &temp_path).await?;
            Ok(written)
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_if_exists(&temp_path).await;
        }
        result
    }

    async fn stream_to(
        &self,
        url: &str,
        temp_path: &Path,
        activity: &dyn Activity,
        token: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(DownloadError::Cancelled),
            response = self.client.get(url).headers(self.headers.clone()).send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(status, url, "segment download"));
        }
        let expected = response.content_length();
        trace!(url, ?expected, "Segment response received");

        let file = tokio::fs::File::create(temp_path).await?;
        let mut writer = BufWriter::with_capacity(self.config.chunk_size.max(8 * 1024), file);
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(DownloadError::Cancelled),
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
            activity.touch();
        }
        writer.flush().await?;
        writer.into_inner().sync_all().await?;

        let actual = tokio::fs::metadata(temp_path).await?.len();
        debug_assert_eq!(written, actual);
        check_size(expected, actual)
    }

    // Structural sanity check: the leading bytes must be readable.
    async fn check_header(&self, path: &Path) -> Result<(), DownloadError> {
        if self.config.header_check_len == 0 {
            return Ok(());
        }
        let mut file = tokio::fs::File::open(path).await?;
        let mut header = vec![0u8; self.config.header_check_len];
        let read = file.read(&mut header).await?;
        if read == 0 {
            return Err(DownloadError::segment_validation(
                "unable to read leading bytes",
            ));
        }
        Ok(())
    }
}

/// The file on disk must match a declared `Content-Length` and must not be empty.
fn check_size(expected: Option<u64>, actual: u64) -> Result<u64, DownloadError> {
    if let Some(expected) = expected
        && expected != actual
    {
        return Err(DownloadError::SegmentSizeMismatch { expected, actual });
    }
    if actual == 0 {
        return Err(DownloadError::SegmentEmpty);
    }
    Ok(actual)
}

#[async_trait]
impl SegmentDownloader for SegmentFetcher {
    async fn fetch_segment(
        &self,
        url: &str,
        target: &SegmentTarget,
        activity: &dyn Activity,
        token: &CancellationToken,
    ) -> SegmentOutcome {
        match self.download(url, target, activity, token).await {
            Ok(bytes) => {
                debug!(url, bytes, path = %target.path().display(), "Segment saved");
                SegmentOutcome::Success { bytes }
            }
            Err(DownloadError::Cancelled | DownloadError::Superseded { .. }) => {
                SegmentOutcome::Cancelled
            }
            Err(e) => {
                warn!(url, error = %e, "Segment download failed");
                SegmentOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}
