// Success ledger: append-only CSV of completed work, loaded at start-up into
// skip sets so completed playlists and images are never fetched twice.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Local;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::DownloadError;
use crate::fs;

pub const LEDGER_HEADER: &str = "content_id,url,timestamp";

/// Joins the image URLs of one content item in a single ledger row.
pub const IMAGE_URL_DELIMITER: &str = "$$$$$";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessRecord {
    pub content_id: String,
    pub url: String,
    pub timestamp: String,
}

impl SuccessRecord {
    pub fn new(content_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            url: url.into(),
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    pub fn for_images<S: AsRef<str>>(content_id: impl Into<String>, urls: &[S]) -> Self {
        let joined = urls
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(IMAGE_URL_DELIMITER);
        Self::new(content_id, joined)
    }

    pub fn to_line(&self) -> String {
        format!("{},{},{}", self.content_id, self.url, self.timestamp)
    }

    /// First field is the content id, last field the timestamp, and
    /// everything in between the URL, so URLs may contain commas.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (content_id, rest) = line.split_once(',')?;
        let (url, timestamp) = rest.rsplit_once(',')?;
        if content_id.trim().is_empty() || url.trim().is_empty() {
            return None;
        }
        Some(Self {
            content_id: content_id.trim().to_owned(),
            url: url.trim().to_owned(),
            timestamp: timestamp.trim().to_owned(),
        })
    }

    pub fn is_playlist(&self) -> bool {
        self.url.contains(".m3u8")
    }

    pub fn image_urls(&self) -> impl Iterator<Item = &str> {
        self.url
            .split(IMAGE_URL_DELIMITER)
            .map(str::trim)
            .filter(|u| !u.is_empty())
    }
}

#[derive(Debug, Default)]
struct SkipSets {
    playlists: HashSet<String>,
    images: HashSet<String>,
}

impl SkipSets {
    fn add(&mut self, record: &SuccessRecord) {
        if record.is_playlist() {
            self.playlists.insert(record.url.clone());
        } else {
            self.images.extend(record.image_urls().map(str::to_owned));
        }
    }
}

#[derive(Debug)]
pub struct SuccessLedger {
    path: PathBuf,
    skip_completed: bool,
    sets: RwLock<SkipSets>,
    write_lock: Mutex<()>,
}

impl SuccessLedger {
    /// Open the ledger at `path`. With `skip_completed` off the skip sets
    /// stay empty and every job runs.
    pub async fn open(path: impl Into<PathBuf>, skip_completed: bool) -> Result<Self, DownloadError> {
        let ledger = Self {
            path: path.into(),
            skip_completed,
            sets: RwLock::new(SkipSets::default()),
            write_lock: Mutex::new(()),
        };
        if skip_completed {
            ledger.reload().await?;
        }
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the ledger file into the skip sets.
    pub async fn reload(&self) -> Result<usize, DownloadError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No ledger yet");
                return Ok(0);
            }
            Err(e) => {
                return Err(DownloadError::Ledger {
                    reason: format!("cannot read {}: {e}", self.path.display()),
                });
            }
        };

        let mut sets = SkipSets::default();
        let mut rows = 0;
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() || (number == 0 && line.starts_with("content_id,")) {
                continue;
            }
            match SuccessRecord::parse(line) {
                Some(record) => {
                    sets.add(&record);
                    rows += 1;
                }
                None => warn!(line = number + 1, "Skipping malformed ledger row"),
            }
        }

        info!(
            rows,
            playlists = sets.playlists.len(),
            images = sets.images.len(),
            "Success ledger loaded"
        );
        *self.sets.write() = sets;
        Ok(rows)
    }

    pub fn contains_playlist(&self, url: &str) -> bool {
        self.skip_completed && self.sets.read().playlists.contains(url)
    }

    pub fn contains_image(&self, url: &str) -> bool {
        self.skip_completed && self.sets.read().images.contains(url)
    }

    pub async fn append(&self, record: &SuccessRecord) -> Result<(), DownloadError> {
        let _guard = self.write_lock.lock().await;
        fs::append_line(&self.path, Some(LEDGER_HEADER), &record.to_line())
            .await
            .map_err(|e| DownloadError::Ledger {
                reason: format!("cannot append to {}: {e}", self.path.display()),
            })?;
        if self.skip_completed {
            self.sets.write().add(record);
        }
        debug!(content_id = %record.content_id, "Ledger row appended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parse_keeps_commas_inside_url() {
        let record =
            SuccessRecord::parse("room_ab12,https://cdn/x.m3u8?a=1,2,2024-03-28 15:30:00").unwrap();
        assert_eq!(record.content_id, "room_ab12");
        assert_eq!(record.url, "https://cdn/x.m3u8?a=1,2");
        assert_eq!(record.timestamp, "2024-03-28 15:30:00");
    }

    #[test]
    fn parse_rejects_short_rows() {
        assert!(SuccessRecord::parse("only-one-field").is_none());
        assert!(SuccessRecord::parse("id,ts").is_none());
        assert!(SuccessRecord::parse(",https://x,ts").is_none());
    }

    #[test]
    fn image_row_joins_with_delimiter() {
        let record = SuccessRecord::for_images("k", &["https://i/a.jpg", "https://i/b.png"]);
        assert_eq!(record.url, "https://i/a.jpg$$$$$https://i/b.png");
        let urls: Vec<&str> = record.image_urls().collect();
        assert_eq!(urls, vec!["https://i/a.jpg", "https://i/b.png"]);
    }

    #[tokio::test]
    async fn load_builds_skip_sets_and_ignores_malformed_rows() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("successful_downloads.csv");
        tokio::fs::write(
            &path,
            "content_id,url,timestamp\n\
             a_1,https://cdn/a.m3u8,2024-01-01 00:00:00\n\
             garbage\n\
             b_2,https://i/b.jpg$$$$$https://i/c.png,2024-01-01 00:00:00\n",
        )
        .await
        .unwrap();

        let ledger = SuccessLedger::open(&path, true).await.unwrap();
        assert!(ledger.contains_playlist("https://cdn/a.m3u8"));
        assert!(ledger.contains_image("https://i/b.jpg"));
        assert!(ledger.contains_image("https://i/c.png"));
        assert!(!ledger.contains_playlist("https://cdn/other.m3u8"));
    }

    #[tokio::test]
    async fn append_writes_header_once_and_updates_skip_set() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("successful_downloads.csv");
        let ledger = SuccessLedger::open(&path, true).await.unwrap();

        ledger
            .append(&SuccessRecord::new("a_1", "https://cdn/a.m3u8"))
            .await
            .unwrap();
        ledger
            .append(&SuccessRecord::new("b_2", "https://cdn/b.m3u8"))
            .await
            .unwrap();

        assert!(ledger.contains_playlist("https://cdn/b.m3u8"));
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content.matches(LEDGER_HEADER).count(), 1);
        assert_eq!(content.lines().count(), 3);
    }

    #[tokio::test]
    async fn retry_only_mode_skips_nothing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("successful_downloads.csv");
        tokio::fs::write(&path, "content_id,url,timestamp\na,https://cdn/a.m3u8,t\n")
            .await
            .unwrap();
        let ledger = SuccessLedger::open(&path, false).await.unwrap();
        assert!(!ledger.contains_playlist("https://cdn/a.m3u8"));
    }
}
