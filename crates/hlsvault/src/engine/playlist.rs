use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Engine;
use crate::DownloadError;
use crate::fs;
use crate::hls::{PlaylistResolver, PlaylistRewriter, RewriteOutcome};
use crate::job::{JobContext, JobResult, SegmentTask};
use crate::naming::{Operation, original_name};
use crate::state::NameMapping;

pub(crate) struct PlaylistRun {
    pub result: JobResult,
    pub local_playlist: Option<PathBuf>,
}

impl Engine {
    /// Resolve the playlist, download its segments, record the name mapping
    /// and, unless the batch was aborted, write the local playlist.
    pub(crate) async fn download_playlist(
        &self,
        ctx: &JobContext,
        url: &str,
        token: &CancellationToken,
    ) -> Result<PlaylistRun, DownloadError> {
        let resolver = PlaylistResolver::new(
            self.client.clone(),
            &self.config.http,
            ctx.credential(),
            self.config.pool.segment_limit,
        );
        let resolved = resolver.resolve(url, ctx).await?;

        let mut mapping = NameMapping::default();
        let tasks: Vec<SegmentTask> = resolved
            .segments
            .iter()
            .map(|segment| {
                let filename = ctx.names.segment(&ctx.content_id, segment.index);
                mapping.insert(original_name(&segment.uri), filename.clone());
                SegmentTask::new(segment.index, segment.url.as_str(), filename)
            })
            .collect();

        let segment_dir = ctx.segment_dir();
        fs::ensure_dir_all(&segment_dir).await?;
        let result = self
            .pool(ctx, self.config.pool.clone())
            .run(tasks, &segment_dir, token)
            .await;

        let batch: HashSet<String> = mapping.keys().map(str::to_owned).collect();
        let mapping = NameMapping::merge_into(&ctx.mapping_path(), &mapping).await?;

        if result.aborted {
            return Ok(PlaylistRun {
                result,
                local_playlist: None,
            });
        }

        let dest = ctx
            .hls_dir()
            .join(ctx.names.playlist(&ctx.content_id, Operation::Local));
        let outcome = PlaylistRewriter::new(&segment_dir, &mapping, &batch)
            .write_new(&resolved.local_path, &dest)
            .await?;

        Ok(PlaylistRun {
            result,
            local_playlist: Some(outcome.path),
        })
    }

    /// Point the job's local playlist at segments fetched by a retry.
    ///
    /// Without a local playlist (the first run was aborted) a new one is
    /// written from the fetched copy, linking every segment on disk.
    pub(crate) async fn patch_local_playlist(
        &self,
        ctx: &JobContext,
        mapping: &NameMapping,
        batch: &HashSet<String>,
    ) -> Result<Option<RewriteOutcome>, DownloadError> {
        let hls_dir = ctx.hls_dir();
        let segment_dir = ctx.segment_dir();

        if let Some(local) = latest_playlist(&hls_dir, Operation::Local).await? {
            let outcome = PlaylistRewriter::new(&segment_dir, mapping, batch)
                .update_in_place(&local)
                .await?;
            return Ok(Some(outcome));
        }

        match latest_playlist(&hls_dir, Operation::Fetch).await? {
            Some(fetched) => {
                let everything: HashSet<String> = mapping.keys().map(str::to_owned).collect();
                let dest = hls_dir.join(ctx.names.playlist(&ctx.content_id, Operation::Local));
                info!(source = %fetched.display(), "Creating local playlist from fetched copy");
                let outcome = PlaylistRewriter::new(&segment_dir, mapping, &everything)
                    .write_new(&fetched, &dest)
                    .await?;
                Ok(Some(outcome))
            }
            None => {
                warn!(dir = %hls_dir.display(), "No playlist found to patch");
                Ok(None)
            }
        }
    }
}

/// Most recent `video_*_{op}_*.m3u8` in `dir`; names sort by timestamp.
async fn latest_playlist(dir: &Path, operation: Operation) -> Result<Option<PathBuf>, DownloadError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let marker = format!("_{operation}_");
    let mut best: Option<String> = None;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !(name.starts_with("video_") && name.ends_with(".m3u8") && name.contains(&marker)) {
            continue;
        }
        if best.as_ref().is_none_or(|b| name > *b) {
            best = Some(name);
        }
    }
    debug!(dir = %dir.display(), %operation, found = ?best, "Playlist lookup");
    Ok(best.map(|name| dir.join(name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn latest_playlist_picks_newest_of_kind() {
        let dir = TempDir::new().unwrap();
        for name in [
            "video_k_fetch_20240101T000000.m3u8",
            "video_k_local_20240101T000000.m3u8",
            "video_k_local_20240102T000000.m3u8",
            "notes.txt",
        ] {
            tokio::fs::write(dir.path().join(name), b"#EXTM3U\n").await.unwrap();
        }

        let local = latest_playlist(dir.path(), Operation::Local).await.unwrap().unwrap();
        assert!(local.ends_with("video_k_local_20240102T000000.m3u8"));
        let fetched = latest_playlist(dir.path(), Operation::Fetch).await.unwrap().unwrap();
        assert!(fetched.ends_with("video_k_fetch_20240101T000000.m3u8"));
    }

    #[tokio::test]
    async fn missing_directory_has_no_playlist() {
        let dir = TempDir::new().unwrap();
        let found = latest_playlist(&dir.path().join("hls"), Operation::Local)
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
