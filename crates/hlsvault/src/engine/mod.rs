// Engine entry points. The engine owns only shared, job-independent state
// (HTTP client, ledger, journal); everything per job travels in a JobContext,
// so one engine can serve several jobs on different directories at once.

mod batch;
mod playlist;
mod retry;

use std::path::PathBuf;
use std::sync::Arc;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::DownloadError;
use crate::config::{EngineConfig, PoolConfig};
use crate::fs;
use crate::hls::{ImageFetcher, SegmentFetcher, WorkerPool};
use crate::http;
use crate::job::{Job, JobContext, JobResult};
use crate::naming::FilenameGenerator;
use crate::state::{ErrorJournal, ErrorRecord, FailedImage, FailedPlaylist, SuccessLedger, SuccessRecord};

pub use batch::{InputSummary, LineFailure};
pub use retry::RetrySummary;

/// Outcome of the playlist part of a job.
#[derive(Debug, Clone)]
pub enum VideoOutcome {
    /// Already in the ledger; nothing was requested.
    Skipped,
    /// Every segment downloaded and a local playlist written.
    Completed {
        result: JobResult,
        local_playlist: Option<PathBuf>,
    },
    /// Finished with failures below the threshold.
    Partial {
        result: JobResult,
        local_playlist: Option<PathBuf>,
    },
    /// Stopped by the failure guard or by cancellation.
    Aborted { result: JobResult },
    /// The playlist itself could not be fetched or parsed.
    Failed { error: String },
}

impl VideoOutcome {
    pub fn result(&self) -> Option<&JobResult> {
        match self {
            Self::Completed { result, .. } | Self::Partial { result, .. } | Self::Aborted { result } => {
                Some(result)
            }
            Self::Skipped | Self::Failed { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Skipped | Self::Completed { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImageReport {
    pub downloaded: Vec<PathBuf>,
    /// Source URLs of `downloaded`, in the same order
    pub downloaded_urls: Vec<String>,
    pub skipped: usize,
    pub failed: Vec<FailedImage>,
}

#[derive(Debug, Clone)]
pub struct JobReport {
    pub content_id: String,
    pub job_dir: PathBuf,
    pub images: ImageReport,
    pub video: Option<VideoOutcome>,
    /// Ledger rows appended by this job
    pub ledger_rows: usize,
    /// A journal record was written for this job
    pub journaled: bool,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        !self.journaled
    }

    pub fn result(&self) -> Option<&JobResult> {
        self.video.as_ref().and_then(VideoOutcome::result)
    }
}

#[derive(Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
    client: Client,
    ledger: Arc<SuccessLedger>,
    journal: Arc<ErrorJournal>,
    names: FilenameGenerator,
}

impl Engine {
    pub async fn new(config: EngineConfig) -> Result<Self, DownloadError> {
        fs::ensure_dir_all(&config.storage.root_dir).await?;
        let client = http::build_client(&config.http)?;
        let ledger =
            SuccessLedger::open(config.storage.ledger_path(), config.storage.skip_completed).await?;
        let journal = ErrorJournal::new(config.storage.journal_path());
        let names = FilenameGenerator::new(config.storage.max_filename_len);

        info!(
            root = %config.storage.root_dir.display(),
            concurrency = config.pool.concurrency,
            max_error_threshold = config.pool.max_error_threshold,
            "Download engine ready"
        );

        Ok(Self {
            config: Arc::new(config),
            client,
            ledger: Arc::new(ledger),
            journal: Arc::new(journal),
            names,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &SuccessLedger {
        &self.ledger
    }

    pub fn journal(&self) -> &ErrorJournal {
        &self.journal
    }

    pub fn context(&self, job: &Job) -> JobContext {
        let job_dir = job
            .target_dir
            .clone()
            .unwrap_or_else(|| self.config.storage.root_dir.join(&job.content_id));
        JobContext::new(&job.content_id, job_dir, job.credential.clone(), self.names)
    }

    fn context_for(&self, content_id: &str, credential: Option<&str>) -> JobContext {
        JobContext::new(
            content_id,
            self.config.storage.root_dir.join(content_id),
            credential.map(str::to_owned),
            self.names,
        )
    }

    fn pool(&self, ctx: &JobContext, config: PoolConfig) -> WorkerPool {
        let fetcher = SegmentFetcher::new(
            self.client.clone(),
            &self.config.http,
            self.config.fetcher.clone(),
            ctx.credential(),
        );
        WorkerPool::new(config, Arc::new(fetcher))
    }

    fn image_fetcher(&self, ctx: &JobContext) -> ImageFetcher {
        ImageFetcher::new(
            self.client.clone(),
            &self.config.http,
            &self.config.fetcher,
            ctx.credential(),
        )
    }

    /// Run one job: images first, then the playlist, then ledger or journal
    /// bookkeeping.
    pub async fn run(&self, job: Job) -> Result<JobReport, DownloadError> {
        self.run_with_cancel(job, &CancellationToken::new()).await
    }

    #[instrument(skip(self, job, token), fields(content_id = %job.content_id))]
    pub async fn run_with_cancel(
        &self,
        job: Job,
        token: &CancellationToken,
    ) -> Result<JobReport, DownloadError> {
        let ctx = self.context(&job);
        fs::ensure_dir_all(&ctx.job_dir).await?;

        let mut record = ErrorRecord::new(&ctx.content_id);
        let mut ledger_rows = 0;

        let images = self.download_images(&ctx, &job.image_urls, token).await;
        record.failed_images = images.failed.clone();
        if !images.failed.is_empty() {
            // Recorded in the ledger together with the rest once a retry fixes them.
            record.recovered_images = images.downloaded_urls.clone();
        } else if !images.downloaded.is_empty() {
            self.ledger
                .append(&SuccessRecord::for_images(&ctx.content_id, &images.downloaded_urls))
                .await?;
            ledger_rows += 1;
        }

        let video = match job.playlist_url.as_deref() {
            None => None,
            Some(url) => {
                let outcome = self.run_video(&ctx, url, token).await;
                match &outcome {
                    VideoOutcome::Skipped => {}
                    VideoOutcome::Completed { .. } => {
                        self.ledger
                            .append(&SuccessRecord::new(&ctx.content_id, url))
                            .await?;
                        ledger_rows += 1;
                    }
                    VideoOutcome::Partial { result, .. } | VideoOutcome::Aborted { result } => {
                        record.failed_m3u8 = Some(FailedPlaylist {
                            url: url.to_owned(),
                            error: result.error.clone(),
                            failed_ts_segments: result.outstanding(),
                            total_ts_segments: result.total_segments,
                        });
                        record.total_ts_segments = result.total_segments;
                    }
                    VideoOutcome::Failed { error } => {
                        record.failed_m3u8 = Some(FailedPlaylist {
                            url: url.to_owned(),
                            error: Some(error.clone()),
                            failed_ts_segments: Vec::new(),
                            total_ts_segments: 0,
                        });
                    }
                }
                Some(outcome)
            }
        };

        let journaled = !record.is_resolved();
        if journaled {
            self.journal.append(&record).await?;
            warn!(
                failed_images = record.failed_images.len(),
                playlist_failed = record.failed_m3u8.is_some(),
                "Job finished with failures, journal record written"
            );
        } else {
            info!(ledger_rows, "Job finished");
        }

        Ok(JobReport {
            content_id: ctx.content_id.clone(),
            job_dir: ctx.job_dir.clone(),
            images,
            video,
            ledger_rows,
            journaled,
        })
    }

    async fn download_images(
        &self,
        ctx: &JobContext,
        urls: &[String],
        token: &CancellationToken,
    ) -> ImageReport {
        let mut report = ImageReport::default();
        if urls.is_empty() {
            return report;
        }
        let fetcher = self.image_fetcher(ctx);
        info!(count = urls.len(), "Downloading images");

        for url in urls {
            if self.ledger.contains_image(url) {
                info!(url = %url, "Image already downloaded, skipping");
                report.skipped += 1;
                continue;
            }
            match fetcher.fetch(url, ctx, token).await {
                Ok(path) => {
                    report.downloaded.push(path);
                    report.downloaded_urls.push(url.clone());
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Image download failed");
                    report.failed.push(FailedImage {
                        url: url.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }

    async fn run_video(&self, ctx: &JobContext, url: &str, token: &CancellationToken) -> VideoOutcome {
        if self.ledger.contains_playlist(url) {
            info!(url, "Playlist already downloaded, skipping");
            return VideoOutcome::Skipped;
        }

        match self.download_playlist(ctx, url, token).await {
            Ok(run) if run.result.is_complete() => VideoOutcome::Completed {
                result: run.result,
                local_playlist: run.local_playlist,
            },
            Ok(run) if run.result.aborted => VideoOutcome::Aborted { result: run.result },
            Ok(run) => VideoOutcome::Partial {
                result: run.result,
                local_playlist: run.local_playlist,
            },
            Err(e) => {
                warn!(url, error = %e, "Playlist download failed");
                VideoOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}
