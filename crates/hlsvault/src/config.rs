use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// User agent presented to playlist and segment hosts. Some CDNs reject
/// generic HTTP clients but accept media players.
pub const MEDIA_PLAYER_USER_AGENT: &str = "VLC/3.0.18 LibVLC/3.0.18";

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36";

/// HTTP client configuration shared by every request the engine makes.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Time allowed to establish a connection
    pub connect_timeout: Duration,

    /// Maximum time between two received body chunks
    pub read_timeout: Duration,

    /// Overall request timeout (zero disables it)
    pub request_timeout: Duration,

    /// Redirects followed before a request fails
    pub max_redirects: usize,

    /// User agent for playlist and segment requests
    pub media_user_agent: String,

    /// User agent for image requests
    pub image_user_agent: String,

    /// Extra headers merged over the defaults for every request
    pub headers: HeaderMap,

    /// Maximum idle connections kept per host
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            request_timeout: Duration::ZERO,
            max_redirects: 5,
            media_user_agent: MEDIA_PLAYER_USER_AGENT.to_owned(),
            image_user_agent: BROWSER_USER_AGENT.to_owned(),
            headers: HeaderMap::new(),
            pool_max_idle_per_host: 20,
        }
    }
}

impl HttpConfig {
    /// Headers used for playlist and segment requests.
    ///
    /// `Range: bytes=0-` is sent on purpose: a few origins only serve media
    /// to range-capable clients.
    pub fn media_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9"),
        );
        headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );
        headers.insert(reqwest::header::RANGE, HeaderValue::from_static("bytes=0-"));
        headers.insert(
            HeaderName::from_static("sec-fetch-dest"),
            HeaderValue::from_static("empty"),
        );
        headers.insert(
            HeaderName::from_static("sec-fetch-mode"),
            HeaderValue::from_static("cors"),
        );
        headers.insert(
            HeaderName::from_static("sec-fetch-site"),
            HeaderValue::from_static("cross-site"),
        );
        headers.insert(reqwest::header::PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(
            reqwest::header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        );
        if let Ok(ua) = HeaderValue::from_str(&self.media_user_agent) {
            headers.insert(reqwest::header::USER_AGENT, ua);
        }
        self.merge_custom(headers)
    }

    /// Headers used for cover and image requests.
    pub fn image_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static(
                "image/avif,image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8",
            ),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"),
        );
        headers.insert(
            HeaderName::from_static("sec-fetch-dest"),
            HeaderValue::from_static("image"),
        );
        headers.insert(
            HeaderName::from_static("sec-fetch-mode"),
            HeaderValue::from_static("no-cors"),
        );
        if let Ok(ua) = HeaderValue::from_str(&self.image_user_agent) {
            headers.insert(reqwest::header::USER_AGENT, ua);
        }
        self.merge_custom(headers)
    }

    // Custom headers take precedence over defaults for the same fields
    fn merge_custom(&self, mut headers: HeaderMap) -> HeaderMap {
        for (name, value) in self.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }
        headers
    }
}

// --- Worker Pool Configuration ---
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Max concurrent segment downloads
    pub concurrency: usize,
    /// Failed segments that abort the whole job once reached
    pub max_error_threshold: usize,
    /// Total runtime after which an active worker counts as stalled
    pub worker_timeout: Duration,
    /// Time without I/O progress after which an active worker counts as stalled
    pub stall_window: Duration,
    /// Supervisor wake-up interval
    pub poll_interval: Duration,
    /// Stall resubmissions per segment before it is recorded as failed
    pub max_stall_restarts: u32,
    /// Only the first N playlist segments are downloaded when set
    pub segment_limit: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 20,
            max_error_threshold: 2,
            worker_timeout: Duration::from_secs(30),
            stall_window: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            max_stall_restarts: 3,
            segment_limit: None,
        }
    }
}

// --- Fetcher Configuration ---
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Write buffer size used while streaming a body to disk
    pub chunk_size: usize,
    /// Leading bytes read back for the structural sanity check
    pub header_check_len: usize,
    /// Attempts for a single image download (including the first one)
    pub image_max_attempts: u32,
    /// Base delay between image download attempts
    pub image_retry_delay: Duration,
    /// Upper bound for the image retry delay
    pub image_max_retry_delay: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024, // 1MB
            header_check_len: 4,
            image_max_attempts: 3,
            image_retry_delay: Duration::from_secs(1),
            image_max_retry_delay: Duration::from_secs(5),
        }
    }
}

// --- Storage Configuration ---
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root under which every content directory is created
    pub root_dir: PathBuf,
    pub ledger_file: String,
    pub journal_file: String,
    pub processing_errors_file: String,
    /// Upper bound for generated file names, in bytes
    pub max_filename_len: usize,
    /// Consult the success ledger and skip completed work
    pub skip_completed: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("downloads"),
            ledger_file: "successful_downloads.csv".to_owned(),
            journal_file: "download_errors.json".to_owned(),
            processing_errors_file: "processing_errors.json".to_owned(),
            max_filename_len: 255,
            skip_completed: true,
        }
    }
}

impl StorageConfig {
    pub fn ledger_path(&self) -> PathBuf {
        self.root_dir.join(&self.ledger_file)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.root_dir.join(&self.journal_file)
    }

    pub fn processing_errors_path(&self) -> PathBuf {
        self.root_dir.join(&self.processing_errors_file)
    }
}

// --- Top-Level Configuration ---
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub http: HttpConfig,
    pub pool: PoolConfig,
    pub fetcher: FetcherConfig,
    pub storage: StorageConfig,
}

impl EngineConfig {
    pub fn with_root(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig {
                root_dir: root_dir.into(),
                ..StorageConfig::default()
            },
            ..Self::default()
        }
    }
}
