//! Jobs, per-job context and the records a job produces.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::naming::FilenameGenerator;

pub const HLS_DIR: &str = "hls";
pub const SEGMENT_DIR: &str = "ts";
pub const IMAGE_DIR: &str = "images";
pub const MAPPING_FILE: &str = "ts_mapping.json";

/// One unit of work: a content item with an optional playlist and images.
#[derive(Debug, Clone)]
pub struct Job {
    pub content_id: String,
    pub playlist_url: Option<String>,
    pub image_urls: Vec<String>,
    /// Overrides `{root}/{content_id}` when set
    pub target_dir: Option<PathBuf>,
    /// Bearer credential for hosts that require one; never persisted
    pub credential: Option<String>,
}

impl Job {
    pub fn new(content_id: impl Into<String>, playlist_url: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            playlist_url: Some(playlist_url.into()),
            image_urls: Vec::new(),
            target_dir: None,
            credential: None,
        }
    }

    pub fn images_only(content_id: impl Into<String>, image_urls: Vec<String>) -> Self {
        Self {
            content_id: content_id.into(),
            playlist_url: None,
            image_urls,
            target_dir: None,
            credential: None,
        }
    }

    pub fn with_images(mut self, image_urls: Vec<String>) -> Self {
        self.image_urls = image_urls;
        self
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    pub fn with_target_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.target_dir = Some(dir.into());
        self
    }
}

/// Everything a job needs to know about itself, passed explicitly to every
/// step so one engine can serve several jobs at once.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub content_id: String,
    pub job_dir: PathBuf,
    pub credential: Option<String>,
    pub names: FilenameGenerator,
}

impl JobContext {
    pub fn new(
        content_id: impl Into<String>,
        job_dir: impl Into<PathBuf>,
        credential: Option<String>,
        names: FilenameGenerator,
    ) -> Self {
        Self {
            content_id: content_id.into(),
            job_dir: job_dir.into(),
            credential,
            names,
        }
    }

    pub fn hls_dir(&self) -> PathBuf {
        self.job_dir.join(HLS_DIR)
    }

    pub fn segment_dir(&self) -> PathBuf {
        self.hls_dir().join(SEGMENT_DIR)
    }

    pub fn image_dir(&self) -> PathBuf {
        self.job_dir.join(IMAGE_DIR)
    }

    pub fn mapping_path(&self) -> PathBuf {
        self.hls_dir().join(MAPPING_FILE)
    }

    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    Pending,
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone)]
pub struct SegmentTask {
    pub index: usize,
    pub url: String,
    pub filename: String,
    pub status: SegmentStatus,
}

impl SegmentTask {
    pub fn new(index: usize, url: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            index,
            url: url.into(),
            filename: filename.into(),
            status: SegmentStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedSegment {
    pub url: String,
    #[serde(rename = "segment_index")]
    pub index: usize,
    pub error: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
}

impl FailedSegment {
    pub fn new(url: impl Into<String>, index: usize, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            index,
            error: error.into(),
            timestamp: Utc::now(),
            retry_count: 0,
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

/// Aggregate outcome of one segment batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResult {
    pub total_segments: usize,
    pub successful_segments: usize,
    pub failed_segments: usize,
    /// Failures in segment-index order
    pub failed: Vec<FailedSegment>,
    /// Segments cancelled before completing because the job was aborted
    pub unfinished: Vec<FailedSegment>,
    /// Indices of segments written to disk, ascending
    pub succeeded: Vec<usize>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// False when the job was aborted
    pub success: bool,
    pub aborted: bool,
    pub error: Option<String>,
}

impl JobResult {
    pub fn begin(total_segments: usize) -> Self {
        Self {
            total_segments,
            successful_segments: 0,
            failed_segments: 0,
            failed: Vec::new(),
            unfinished: Vec::new(),
            succeeded: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            success: true,
            aborted: false,
            error: None,
        }
    }

    pub fn record_success(&mut self, index: usize) {
        self.successful_segments += 1;
        self.succeeded.push(index);
    }

    pub fn record_failure(&mut self, failure: FailedSegment) {
        self.failed_segments += 1;
        self.failed.push(failure);
    }

    pub fn abort(&mut self, reason: impl Into<String>, unfinished: Vec<FailedSegment>) {
        self.success = false;
        self.aborted = true;
        self.error = Some(reason.into());
        self.unfinished = unfinished;
        self.finish();
    }

    /// Seal the result: order every list by segment index and stamp the end time.
    pub fn finish(&mut self) {
        self.failed.sort_by_key(|f| f.index);
        self.unfinished.sort_by_key(|f| f.index);
        self.succeeded.sort_unstable();
        if self.success && !self.failed.is_empty() && self.error.is_none() {
            self.error = Some(format!(
                "{} of {} segments failed",
                self.failed.len(),
                self.total_segments
            ));
        }
        self.finished_at = Some(Utc::now());
    }

    /// Every segment was written and nothing is left for a retry.
    pub fn is_complete(&self) -> bool {
        self.success && self.failed.is_empty() && self.unfinished.is_empty()
    }

    /// Failed plus unfinished segments, index-ordered; what a retry must fetch.
    pub fn outstanding(&self) -> Vec<FailedSegment> {
        let mut all: Vec<FailedSegment> = self
            .failed
            .iter()
            .chain(self.unfinished.iter())
            .cloned()
            .collect();
        all.sort_by_key(|f| f.index);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_paths_follow_layout() {
        let ctx = JobContext::new("room_ab12", "/data/room_ab12", None, Default::default());
        assert_eq!(ctx.hls_dir(), PathBuf::from("/data/room_ab12/hls"));
        assert_eq!(ctx.segment_dir(), PathBuf::from("/data/room_ab12/hls/ts"));
        assert_eq!(ctx.image_dir(), PathBuf::from("/data/room_ab12/images"));
        assert_eq!(
            ctx.mapping_path(),
            PathBuf::from("/data/room_ab12/hls/ts_mapping.json")
        );
    }

    #[test]
    fn finish_orders_failures_by_index() {
        let mut result = JobResult::begin(10);
        result.record_failure(FailedSegment::new("u5", 5, "boom"));
        result.record_success(3);
        result.record_failure(FailedSegment::new("u2", 2, "boom"));
        result.record_success(1);
        result.finish();

        let indices: Vec<usize> = result.failed.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![2, 5]);
        assert_eq!(result.succeeded, vec![1, 3]);
        assert!(result.success);
        assert!(!result.is_complete());
        assert!(result.finished_at.is_some());
    }

    #[test]
    fn abort_marks_result_unsuccessful() {
        let mut result = JobResult::begin(4);
        result.record_failure(FailedSegment::new("u0", 0, "boom"));
        result.abort(
            "threshold reached",
            vec![FailedSegment::new("u3", 3, "cancelled")],
        );
        assert!(!result.success);
        assert!(result.aborted);
        assert_eq!(result.outstanding().len(), 2);
    }

    #[test]
    fn failed_segment_uses_journal_field_names() {
        let failure = FailedSegment::new("https://cdn/x.ts", 4, "size mismatch");
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["segment_index"], 4);
        assert_eq!(json["retry_count"], 0);
        assert_eq!(json["url"], "https://cdn/x.ts");
    }
}
