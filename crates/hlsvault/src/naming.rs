//! Standardized names for every artifact the engine writes.
//!
//! Names look like `{kind}_{key}_{operation}_{timestamp}{ext}`; media segments
//! use `segment_{index:06}_{key}_{operation}_{timestamp}.ts` so a lexical sort
//! restores playback order. The timestamp has second granularity, which keeps
//! names unique across runs while staying recoverable through the recorded
//! name mapping.

use std::fmt;

use chrono::{Local, NaiveDateTime};
use url::Url;
use uuid::Uuid;

pub const DEFAULT_MAX_FILENAME_LEN: usize = 255;

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Video,
    Cover,
    Snapshot,
    Image,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Video => "video",
            ResourceKind::Cover => "cover",
            ResourceKind::Snapshot => "snapshot",
            ResourceKind::Image => "image",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Fetch,
    Local,
    Upload,
    Transcoded,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Fetch => "fetch",
            Operation::Local => "local",
            Operation::Upload => "upload",
            Operation::Transcoded => "transcoded",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FilenameGenerator {
    max_len: usize,
}

impl Default for FilenameGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FILENAME_LEN)
    }
}

impl FilenameGenerator {
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Generate a name stamped with the current local time.
    pub fn generate(
        &self,
        kind: ResourceKind,
        key: &str,
        operation: Operation,
        extension: &str,
        segment_index: Option<usize>,
    ) -> String {
        self.generate_at(
            kind,
            key,
            operation,
            extension,
            segment_index,
            Local::now().naive_local(),
        )
    }

    pub fn generate_at(
        &self,
        kind: ResourceKind,
        key: &str,
        operation: Operation,
        extension: &str,
        segment_index: Option<usize>,
        at: NaiveDateTime,
    ) -> String {
        let extension = normalize_extension(extension);
        let timestamp = at.format(TIMESTAMP_FORMAT);

        let stem = match segment_index {
            Some(index) if kind == ResourceKind::Video && extension == ".ts" => {
                format!("segment_{index:06}_{key}_{operation}_{timestamp}")
            }
            _ => format!("{kind}_{key}_{operation}_{timestamp}"),
        };

        self.bounded(stem, &extension)
    }

    /// Playlist name for a content key (`video_{key}_{op}_{ts}.m3u8`).
    pub fn playlist(&self, key: &str, operation: Operation) -> String {
        self.generate(ResourceKind::Video, key, operation, ".m3u8", None)
    }

    /// Segment name for a content key and playlist position.
    pub fn segment(&self, key: &str, index: usize) -> String {
        self.generate(ResourceKind::Video, key, Operation::Fetch, ".ts", Some(index))
    }

    // Truncate the stem, never the extension.
    fn bounded(&self, mut stem: String, extension: &str) -> String {
        if stem.len() + extension.len() > self.max_len {
            let budget = self.max_len.saturating_sub(extension.len());
            let mut cut = budget.min(stem.len());
            while !stem.is_char_boundary(cut) {
                cut -= 1;
            }
            stem.truncate(cut);
        }
        stem.push_str(extension);
        stem
    }
}

fn normalize_extension(extension: &str) -> String {
    if extension.is_empty() || extension.starts_with('.') {
        extension.to_owned()
    } else {
        format!(".{extension}")
    }
}

/// Extension (with dot) of the last path component of `url`, or `default`.
pub fn extension_from_url(url: &str, default: &str) -> String {
    let path = Url::parse(url)
        .map(|u| u.path().to_owned())
        .unwrap_or_else(|_| url.split(['?', '#']).next().unwrap_or_default().to_owned());

    let name = path.rsplit('/').next().unwrap_or_default();
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => format!(".{ext}"),
        _ => default.to_owned(),
    }
}

/// Last path component of a URI with its query string kept, fragment dropped.
///
/// This is the key used by the name mapping for original segment names.
/// Playlists that serve one file name with different queries
/// (`seg.ts?n=0`, `seg.ts?n=1`) get one key per segment.
pub fn original_name(uri: &str) -> String {
    let trimmed = uri.trim();
    let without_fragment = trimmed.split('#').next().unwrap_or(trimmed);
    let (path, query) = match without_fragment.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (without_fragment, None),
    };
    let name = path.rsplit('/').next().unwrap_or(path);
    match query {
        Some(query) => format!("{name}?{query}"),
        None => name.to_owned(),
    }
}

/// Short stable tag for a URL, used to keep image names of one job apart.
pub fn url_tag(url: &str) -> String {
    let id = Uuid::new_v5(&Uuid::NAMESPACE_URL, url.trim().as_bytes());
    id.simple().to_string()[..8].to_owned()
}
