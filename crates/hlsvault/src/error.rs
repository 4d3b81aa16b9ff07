use std::path::PathBuf;

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download cancelled")]
    Cancelled,

    #[error("write superseded by a newer worker for {path}")]
    Superseded { path: PathBuf },

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("failed to fetch playlist {url}: {reason}")]
    PlaylistFetch { url: String, reason: String },

    #[error("failed to parse playlist {url}: {reason}")]
    PlaylistParse { url: String, reason: String },

    #[error("segment size mismatch: expected {expected} bytes, wrote {actual}")]
    SegmentSizeMismatch { expected: u64, actual: u64 },

    #[error("downloaded segment is empty")]
    SegmentEmpty,

    #[error("segment validation failed: {reason}")]
    SegmentValidation { reason: String },

    #[error("image download failed for {url}: {reason}")]
    ImageFetch {
        url: String,
        reason: String,
        retryable: bool,
    },

    #[error("{failed} failed segments reached the threshold of {threshold}, job aborted")]
    ThresholdExceeded { failed: usize, threshold: usize },

    #[error("malformed journal record on line {line}: {reason}")]
    JournalParse { line: usize, reason: String },

    #[error("failed to write name mapping {path}: {reason}")]
    MappingWrite { path: PathBuf, reason: String },

    #[error("ledger error: {reason}")]
    Ledger { reason: String },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl DownloadError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn playlist_fetch(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PlaylistFetch {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn playlist_parse(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PlaylistParse {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn segment_validation(reason: impl Into<String>) -> Self {
        Self::SegmentValidation {
            reason: reason.into(),
        }
    }

    pub fn image_fetch(url: impl Into<String>, reason: impl Into<String>, retryable: bool) -> Self {
        Self::ImageFetch {
            url: url.into(),
            reason: reason.into(),
            retryable,
        }
    }

    pub fn mapping_write(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MappingWrite {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn http_status(
        status: StatusCode,
        url: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled | Self::Superseded { .. } => false,
            Self::InvalidUrl { .. }
            | Self::PlaylistParse { .. }
            | Self::ThresholdExceeded { .. }
            | Self::JournalParse { .. }
            | Self::MappingWrite { .. }
            | Self::Ledger { .. }
            | Self::Json { .. }
            | Self::Internal { .. } => false,
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::ImageFetch { retryable, .. } => *retryable,
            Self::Network { .. }
            | Self::Io { .. }
            | Self::PlaylistFetch { .. }
            | Self::SegmentSizeMismatch { .. }
            | Self::SegmentEmpty
            | Self::SegmentValidation { .. } => true,
        }
    }
}
