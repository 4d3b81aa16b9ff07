// Journal replay: re-attempt what failed in earlier runs, then rewrite the
// journal with whatever is still unresolved.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::Engine;
use crate::DownloadError;
use crate::config::PoolConfig;
use crate::fs;
use crate::job::{FailedSegment, JobContext, SegmentTask};
use crate::naming::original_name;
use crate::state::{ErrorRecord, FailedImage, FailedPlaylist, NameMapping, SuccessRecord};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetrySummary {
    /// Parsed records found in the journal
    pub records: usize,
    pub resolved: usize,
    pub remaining: usize,
    /// Lines that could not be parsed; kept in the journal as they were
    pub malformed: usize,
}

impl Engine {
    pub async fn retry(&self, credential: Option<&str>) -> Result<RetrySummary, DownloadError> {
        self.retry_with_cancel(credential, &CancellationToken::new())
            .await
    }

    #[instrument(skip_all)]
    pub async fn retry_with_cancel(
        &self,
        credential: Option<&str>,
        token: &CancellationToken,
    ) -> Result<RetrySummary, DownloadError> {
        let _replay = self.journal.lock_replay().await;
        let contents = self.journal.load().await?;
        let mut summary = RetrySummary {
            records: contents.records.len(),
            malformed: contents.malformed.len(),
            ..RetrySummary::default()
        };
        if contents.records.is_empty() {
            info!(malformed = summary.malformed, "Nothing to retry");
            return Ok(summary);
        }
        info!(records = summary.records, "Retrying journal records");

        let mut unresolved = Vec::new();
        for mut record in contents.records {
            if token.is_cancelled() {
                unresolved.push(record);
                continue;
            }

            let ctx = self.context_for(&record.content_id, credential);
            self.retry_record(&ctx, &mut record, token).await;
            record.touch();

            if record.is_resolved() {
                self.record_resolution(&record).await?;
                summary.resolved += 1;
                info!(content_id = %record.content_id, "Journal record resolved");
            } else {
                unresolved.push(record);
            }
        }

        summary.remaining = unresolved.len();
        self.journal
            .replace(contents.len, &unresolved, &contents.malformed)
            .await?;
        info!(
            resolved = summary.resolved,
            remaining = summary.remaining,
            malformed = summary.malformed,
            "Retry pass finished"
        );
        Ok(summary)
    }

    /// Ledger rows for a resolved record: every image and the playlist fixed
    /// across all of its retry passes.
    async fn record_resolution(&self, record: &ErrorRecord) -> Result<(), DownloadError> {
        if !record.recovered_images.is_empty() {
            self.ledger
                .append(&SuccessRecord::for_images(
                    &record.content_id,
                    &record.recovered_images,
                ))
                .await?;
        }
        if let Some(url) = &record.recovered_playlist {
            self.ledger
                .append(&SuccessRecord::new(&record.content_id, url))
                .await?;
        }
        Ok(())
    }

    #[instrument(skip(self, ctx, record, token), fields(content_id = %ctx.content_id))]
    async fn retry_record(
        &self,
        ctx: &JobContext,
        record: &mut ErrorRecord,
        token: &CancellationToken,
    ) {
        if !record.failed_images.is_empty() {
            let fetcher = self.image_fetcher(ctx);
            let mut still_failed = Vec::new();
            for image in std::mem::take(&mut record.failed_images) {
                match fetcher.fetch(&image.url, ctx, token).await {
                    Ok(_) => record.recovered_images.push(image.url),
                    Err(e) => {
                        warn!(url = %image.url, error = %e, "Image retry failed");
                        still_failed.push(FailedImage {
                            url: image.url,
                            error: e.to_string(),
                        });
                    }
                }
            }
            record.failed_images = still_failed;
        }

        if let Some(playlist) = record.failed_m3u8.clone() {
            match self.retry_playlist(ctx, &playlist, token).await {
                Ok(None) => {
                    record.failed_m3u8 = None;
                    record.recovered_playlist = Some(playlist.url);
                }
                Ok(Some(next)) => {
                    record.total_ts_segments = next.total_ts_segments;
                    record.failed_m3u8 = Some(next);
                }
                Err(e) => {
                    warn!(url = %playlist.url, error = %e, "Playlist retry failed");
                    if let Some(failed) = record.failed_m3u8.as_mut() {
                        failed.error = Some(e.to_string());
                    }
                }
            }
        }
    }

    /// Returns the playlist failure that is left, or `None` when resolved.
    async fn retry_playlist(
        &self,
        ctx: &JobContext,
        playlist: &FailedPlaylist,
        token: &CancellationToken,
    ) -> Result<Option<FailedPlaylist>, DownloadError> {
        if !playlist.has_segment_detail() {
            info!(url = %playlist.url, "Re-running whole playlist");
            return match self.download_playlist(ctx, &playlist.url, token).await {
                Ok(run) if run.result.is_complete() => Ok(None),
                Ok(run) => Ok(Some(FailedPlaylist {
                    url: playlist.url.clone(),
                    error: run.result.error.clone(),
                    failed_ts_segments: run.result.outstanding(),
                    total_ts_segments: run.result.total_segments,
                })),
                Err(e) => Ok(Some(FailedPlaylist {
                    url: playlist.url.clone(),
                    error: Some(e.to_string()),
                    failed_ts_segments: Vec::new(),
                    total_ts_segments: 0,
                })),
            };
        }

        let mut mapping = NameMapping::default();
        let tasks: Vec<SegmentTask> = playlist
            .failed_ts_segments
            .iter()
            .map(|segment| {
                let filename = ctx.names.segment(&ctx.content_id, segment.index);
                mapping.insert(original_name(&segment.url), filename.clone());
                SegmentTask::new(segment.index, segment.url.as_str(), filename)
            })
            .collect();
        info!(
            url = %playlist.url,
            segments = tasks.len(),
            "Re-fetching failed segments"
        );

        let segment_dir = ctx.segment_dir();
        fs::ensure_dir_all(&segment_dir).await?;
        // Replays never abort early; every listed segment gets its attempt.
        let config = PoolConfig {
            max_error_threshold: 0,
            segment_limit: None,
            ..self.config.pool.clone()
        };
        let result = self.pool(ctx, config).run(tasks, &segment_dir, token).await;
        let merged = NameMapping::merge_into(&ctx.mapping_path(), &mapping).await?;

        let succeeded: HashSet<usize> = result.succeeded.iter().copied().collect();
        let errors: HashMap<usize, &str> = result
            .failed
            .iter()
            .chain(result.unfinished.iter())
            .map(|f| (f.index, f.error.as_str()))
            .collect();

        let batch: HashSet<String> = playlist
            .failed_ts_segments
            .iter()
            .filter(|s| succeeded.contains(&s.index))
            .map(|s| original_name(&s.url))
            .collect();
        if !batch.is_empty() {
            self.patch_local_playlist(ctx, &merged, &batch).await?;
        }

        let still_failed: Vec<FailedSegment> = playlist
            .failed_ts_segments
            .iter()
            .filter(|s| !succeeded.contains(&s.index))
            .map(|s| FailedSegment {
                url: s.url.clone(),
                index: s.index,
                error: errors
                    .get(&s.index)
                    .map(|e| (*e).to_owned())
                    .unwrap_or_else(|| s.error.clone()),
                timestamp: Utc::now(),
                retry_count: s.retry_count + 1,
            })
            .collect();

        info!(
            fixed = batch.len(),
            remaining = still_failed.len(),
            "Segment replay finished"
        );
        if still_failed.is_empty() {
            return Ok(None);
        }
        Ok(Some(FailedPlaylist {
            url: playlist.url.clone(),
            error: Some(format!(
                "{} of {} segments still failing",
                still_failed.len(),
                playlist.total_ts_segments
            )),
            failed_ts_segments: still_failed,
            total_ts_segments: playlist.total_ts_segments,
        }))
    }
}
