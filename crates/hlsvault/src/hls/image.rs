// Cover and snapshot downloads. Unlike segments these are retried in place
// with exponential backoff before being reported as failed.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::DownloadError;
use crate::config::{FetcherConfig, HttpConfig};
use crate::fs;
use crate::http::with_bearer;
use crate::job::JobContext;
use crate::naming::{Operation, ResourceKind, extension_from_url, url_tag};
use crate::retry::{Attempt, RetryPolicy, is_retryable_reqwest_error, with_backoff};

const DEFAULT_IMAGE_EXTENSION: &str = ".jpg";

pub struct ImageFetcher {
    client: Client,
    headers: HeaderMap,
    policy: RetryPolicy,
    chunk_size: usize,
}

impl ImageFetcher {
    pub fn new(
        client: Client,
        http: &HttpConfig,
        config: &FetcherConfig,
        credential: Option<&str>,
    ) -> Self {
        Self {
            client,
            headers: with_bearer(http.image_headers(), credential),
            policy: RetryPolicy::for_images(config),
            chunk_size: config.chunk_size.max(8 * 1024),
        }
    }

    /// Download one image into the job's image directory and return its path.
    #[instrument(skip(self, ctx, token), fields(content_id = %ctx.content_id))]
    pub async fn fetch(
        &self,
        url: &str,
        ctx: &JobContext,
        token: &CancellationToken,
    ) -> Result<PathBuf, DownloadError> {
        let extension = extension_from_url(url, DEFAULT_IMAGE_EXTENSION);
        // Images of one job share a timestamp; the URL tag keeps them apart.
        let key = format!("{}_{}", ctx.content_id, url_tag(url));
        let filename = ctx.names.generate(
            ResourceKind::Image,
            &key,
            Operation::Fetch,
            &extension,
            None,
        );
        let dest = ctx.image_dir().join(filename);
        fs::ensure_parent_dir(&dest).await?;

        let bytes = with_backoff(&self.policy, token, |attempt| {
            let dest = dest.clone();
            async move {
                debug!(attempt, "Requesting image");
                self.attempt(url, &dest).await
            }
        })
        .await?;

        info!(bytes, path = %dest.display(), "Image saved");
        Ok(dest)
    }

    async fn attempt(&self, url: &str, dest: &Path) -> Attempt<u64> {
        let response = match self.client.get(url).headers(self.headers.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                let retryable = is_retryable_reqwest_error(&e);
                let err = DownloadError::image_fetch(url, e.to_string(), retryable);
                return if retryable {
                    Attempt::Retry(err)
                } else {
                    Attempt::Fail(err)
                };
            }
        };

        let status = response.status();
        if !status.is_success() {
            let err = DownloadError::http_status(status, url, "image download");
            return if err.is_retryable() {
                Attempt::Retry(err)
            } else {
                Attempt::Fail(err)
            };
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !content_type.starts_with("image/") {
            return Attempt::Fail(DownloadError::image_fetch(
                url,
                format!("unexpected content type `{content_type}`"),
                false,
            ));
        }
        if response.content_length() == Some(0) {
            return Attempt::Fail(DownloadError::image_fetch(url, "empty body", false));
        }

        match self.save(response, dest).await {
            Ok(0) => {
                let _ = fs::remove_if_exists(dest).await;
                Attempt::Fail(DownloadError::image_fetch(url, "empty body", false))
            }
            Ok(bytes) => Attempt::Done(bytes),
            Err(e) => Attempt::Retry(DownloadError::image_fetch(url, e.to_string(), true)),
        }
    }

    async fn save(&self, response: reqwest::Response, dest: &Path) -> Result<u64, DownloadError> {
        let temp_path = fs::temp_path_for(dest, "part");
        let result = async {
            let file = tokio::fs::File::create(&temp_path).await?;
            let mut writer = BufWriter::with_capacity(self.chunk_size, file);
            let mut stream = response.bytes_stream();
            let mut written = 0u64;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                writer.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            writer.flush().await?;
            drop(writer);
            if written > 0 {
                tokio::fs::rename(&temp_path, dest).await?;
            }
            Ok(written)
        }
        .await;

        if !matches!(result, Ok(n) if n > 0) {
            let _ = fs::remove_if_exists(&temp_path).await;
        }
        result
    }
}
