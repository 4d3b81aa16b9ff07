// HLS Playlist Resolver: fetches a media playlist, keeps a verbatim copy next
// to the job and expands it into absolute segment locators.

use std::path::PathBuf;

use m3u8_rs::{Playlist, parse_playlist_res};
use reqwest::Client;
use reqwest::header::HeaderMap;
use tracing::{debug, info, instrument};
use url::Url;

use crate::DownloadError;
use crate::config::HttpConfig;
use crate::fs;
use crate::http::with_bearer;
use crate::job::JobContext;
use crate::naming::Operation;

/// One segment entry of a resolved playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentLocator {
    pub index: usize,
    /// URI exactly as written in the playlist
    pub uri: String,
    /// URI resolved against the final playlist URL
    pub url: Url,
}

#[derive(Debug, Clone)]
pub struct ResolvedPlaylist {
    pub source_url: String,
    /// URL after redirects; the base for relative segment URIs
    pub final_url: Url,
    /// Verbatim copy of the fetched playlist
    pub local_path: PathBuf,
    /// Number of segment entries in the playlist
    pub total_entries: usize,
    /// Segments selected for download (all of them unless a limit applies)
    pub segments: Vec<SegmentLocator>,
}

pub struct PlaylistResolver {
    client: Client,
    headers: HeaderMap,
    segment_limit: Option<usize>,
}

impl PlaylistResolver {
    pub fn new(
        client: Client,
        http: &HttpConfig,
        credential: Option<&str>,
        segment_limit: Option<usize>,
    ) -> Self {
        Self {
            client,
            headers: with_bearer(http.media_headers(), credential),
            segment_limit,
        }
    }

    #[instrument(skip(self, ctx), fields(content_id = %ctx.content_id))]
    pub async fn resolve(
        &self,
        url: &str,
        ctx: &JobContext,
    ) -> Result<ResolvedPlaylist, DownloadError> {
        let request_url =
            Url::parse(url).map_err(|e| DownloadError::invalid_url(url, e.to_string()))?;

        let response = self
            .client
            .get(request_url)
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(|e| DownloadError::playlist_fetch(url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::playlist_fetch(url, format!("HTTP {status}")));
        }
        let final_url = response.url().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| DownloadError::playlist_fetch(url, e.to_string()))?;
        if body.is_empty() {
            return Err(DownloadError::playlist_fetch(url, "empty playlist body"));
        }

        let local_path = ctx
            .hls_dir()
            .join(ctx.names.playlist(&ctx.content_id, Operation::Fetch));
        fs::write_atomic(&local_path, &body).await?;
        debug!(path = %local_path.display(), bytes = body.len(), "Playlist saved");

        let mut segments =
            parse_segments(&body, &final_url).map_err(|reason| DownloadError::playlist_parse(url, reason))?;
        let total_entries = segments.len();
        if let Some(limit) = self.segment_limit {
            segments.truncate(limit);
        }

        info!(
            total_entries,
            selected = segments.len(),
            final_url = %final_url,
            "Playlist resolved"
        );

        Ok(ResolvedPlaylist {
            source_url: url.to_owned(),
            final_url,
            local_path,
            total_entries,
            segments,
        })
    }
}

/// Parse a media playlist body and resolve every segment URI against `base`.
pub fn parse_segments(body: &[u8], base: &Url) -> Result<Vec<SegmentLocator>, String> {
    let playlist = match parse_playlist_res(body) {
        Ok(playlist) => playlist,
        Err(e) => {
            debug!(error = ?e, "m3u8 parser rejected playlist");
            return Err("invalid playlist syntax".to_owned());
        }
    };

    let media = match playlist {
        Playlist::MediaPlaylist(media) => media,
        Playlist::MasterPlaylist(master) => {
            return Err(format!(
                "master playlist with {} variants has no segment entries",
                master.variants.len()
            ));
        }
    };

    if media.segments.is_empty() {
        return Err("playlist has no segment entries".to_owned());
    }

    media
        .segments
        .iter()
        .enumerate()
        .map(|(index, segment)| {
            let uri = segment.uri.trim();
            match base.join(uri) {
                Ok(url) => Ok(SegmentLocator {
                    index,
                    uri: uri.to_owned(),
                    url,
                }),
                Err(e) => Err(format!("segment {index} has unusable URI `{uri}`: {e}")),
            }
        })
        .collect()
}
