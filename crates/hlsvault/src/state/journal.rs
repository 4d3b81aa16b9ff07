// Error journal: newline-delimited JSON, one record per content item with
// unresolved failures. Appended by failed jobs, rewritten by the retry pass.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::DownloadError;
use crate::fs;
use crate::job::FailedSegment;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedImage {
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedPlaylist {
    pub url: String,
    #[serde(default)]
    pub error: Option<String>,
    /// Empty when the playlist itself could not be fetched or parsed
    #[serde(default)]
    pub failed_ts_segments: Vec<FailedSegment>,
    #[serde(default)]
    pub total_ts_segments: usize,
}

impl FailedPlaylist {
    pub fn has_segment_detail(&self) -> bool {
        !self.failed_ts_segments.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub content_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub failed_images: Vec<FailedImage>,
    #[serde(default)]
    pub failed_m3u8: Option<FailedPlaylist>,
    #[serde(default)]
    pub total_ts_segments: usize,
    /// Images fixed by earlier retry passes, recorded in the ledger once the
    /// whole record resolves
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recovered_images: Vec<String>,
    /// Playlist fixed by an earlier retry pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovered_playlist: Option<String>,
}

impl ErrorRecord {
    pub fn new(content_id: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            timestamp: Utc::now(),
            failed_images: Vec::new(),
            failed_m3u8: None,
            total_ts_segments: 0,
            recovered_images: Vec::new(),
            recovered_playlist: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.failed_images.is_empty() && self.failed_m3u8.is_none()
    }

    pub fn touch(&mut self) {
        self.timestamp = Utc::now();
    }
}

/// A journal line that could not be parsed, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedLine {
    pub line: usize,
    pub raw: String,
}

#[derive(Debug, Default)]
pub struct JournalContents {
    pub records: Vec<ErrorRecord>,
    pub malformed: Vec<MalformedLine>,
    /// Bytes of journal content these records were parsed from
    pub len: usize,
}

impl JournalContents {
    /// Parse NDJSON content line by line; one bad line never hides the rest.
    pub fn parse(content: &str) -> Self {
        let mut contents = Self {
            len: content.len(),
            ..Self::default()
        };
        for (i, raw) in content.lines().enumerate() {
            if raw.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ErrorRecord>(raw) {
                Ok(record) => contents.records.push(record),
                Err(e) => {
                    let err = DownloadError::JournalParse {
                        line: i + 1,
                        reason: e.to_string(),
                    };
                    warn!(error = %err, "Skipping journal record");
                    contents.malformed.push(MalformedLine {
                        line: i + 1,
                        raw: raw.to_owned(),
                    });
                }
            }
        }
        contents
    }
}

#[derive(Debug)]
pub struct ErrorJournal {
    path: PathBuf,
    write_lock: Mutex<()>,
    replay_lock: Mutex<()>,
}

impl ErrorJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            replay_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, record: &ErrorRecord) -> Result<(), DownloadError> {
        let line = serde_json::to_string(record)?;
        let _guard = self.write_lock.lock().await;
        fs::append_line(&self.path, None, &line).await?;
        debug!(content_id = %record.content_id, "Journal record appended");
        Ok(())
    }

    /// Held for a whole load-retry-replace pass so two passes never rewrite
    /// each other's view of the journal. Appends stay possible meanwhile.
    pub async fn lock_replay(&self) -> MutexGuard<'_, ()> {
        self.replay_lock.lock().await
    }

    /// Missing journal → empty contents.
    pub async fn load(&self) -> Result<JournalContents, DownloadError> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(JournalContents::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(JournalContents::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the first `loaded_len` bytes of the journal (what an earlier
    /// [`load`](Self::load) returned) with `records` plus the verbatim
    /// malformed lines. Records appended after that load are kept. The file
    /// is deleted when nothing remains.
    pub async fn replace(
        &self,
        loaded_len: usize,
        records: &[ErrorRecord],
        malformed: &[MalformedLine],
    ) -> Result<(), DownloadError> {
        let _guard = self.write_lock.lock().await;
        let appended = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content.get(loaded_len..).unwrap_or_default().to_owned(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let appended = appended.trim_start_matches('\n');

        if records.is_empty() && malformed.is_empty() && appended.trim().is_empty() {
            fs::remove_if_exists(&self.path).await?;
            info!(path = %self.path.display(), "All failures resolved, journal removed");
            return Ok(());
        }

        let mut out = String::new();
        for record in records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        for line in malformed {
            out.push_str(&line.raw);
            out.push('\n');
        }
        if !appended.is_empty() {
            out.push_str(appended);
            if !appended.ends_with('\n') {
                out.push('\n');
            }
        }
        fs::write_atomic(&self.path, out).await?;
        info!(
            path = %self.path.display(),
            records = records.len(),
            malformed = malformed.len(),
            appended = appended.lines().count(),
            "Journal rewritten"
        );
        Ok(())
    }
}
