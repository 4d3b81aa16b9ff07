use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hlsvault_engine::EngineConfig;
use reqwest::header::{HeaderName, HeaderValue};
use serde::Deserialize;

use crate::cli::Args;
use crate::error::{AppError, Result};

/// File-backed settings. Every field is optional; command line flags win over
/// the file and the file wins over the engine defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub root: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub max_errors: Option<usize>,
    pub segment_limit: Option<usize>,
    pub log_dir: Option<PathBuf>,
    pub skip_completed: Option<bool>,
    pub http: HttpSection,
    pub pool: PoolSection,
    pub images: ImageSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpSection {
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub max_redirects: Option<usize>,
    pub media_user_agent: Option<String>,
    pub image_user_agent: Option<String>,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSection {
    pub worker_timeout_secs: Option<u64>,
    pub stall_window_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub max_stall_restarts: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageSection {
    pub max_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub max_retry_delay_ms: Option<u64>,
}

impl AppConfig {
    /// Load the config file when one is given. No file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path).map_err(|e| AppError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(&content).map_err(|reason| AppError::Config {
            path: path.to_path_buf(),
            reason,
        })
    }

    pub fn parse(content: &str) -> std::result::Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    pub fn log_dir<'a>(&'a self, args: &'a Args) -> Option<&'a Path> {
        args.log_dir.as_deref().or(self.log_dir.as_deref())
    }

    pub fn into_engine_config(self, args: &Args) -> Result<EngineConfig> {
        let root = args
            .root
            .clone()
            .or(self.root)
            .unwrap_or_else(|| PathBuf::from("downloads"));
        let mut config = EngineConfig::with_root(root);

        if let Some(concurrency) = args.concurrency.or(self.concurrency) {
            if concurrency == 0 {
                return Err(AppError::InvalidInput(
                    "concurrency must be at least 1".to_owned(),
                ));
            }
            config.pool.concurrency = concurrency;
        }
        if let Some(max_errors) = args.max_errors.or(self.max_errors) {
            config.pool.max_error_threshold = max_errors;
        }
        config.pool.segment_limit = args.segment_limit.or(self.segment_limit);
        if let Some(skip) = self.skip_completed {
            config.storage.skip_completed = skip;
        }

        let http = &mut config.http;
        if let Some(secs) = self.http.connect_timeout_secs {
            http.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.http.read_timeout_secs {
            http.read_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.http.request_timeout_secs {
            http.request_timeout = Duration::from_secs(secs);
        }
        if let Some(redirects) = self.http.max_redirects {
            http.max_redirects = redirects;
        }
        if let Some(ua) = self.http.media_user_agent {
            http.media_user_agent = ua;
        }
        if let Some(ua) = self.http.image_user_agent {
            http.image_user_agent = ua;
        }
        for (name, value) in &self.http.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| AppError::InvalidInput(format!("header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| AppError::InvalidInput(format!("header {name}: {e}")))?;
            http.headers.insert(name, value);
        }

        let pool = &mut config.pool;
        if let Some(secs) = self.pool.worker_timeout_secs {
            pool.worker_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.pool.stall_window_secs {
            pool.stall_window = Duration::from_secs(secs);
        }
        if let Some(ms) = self.pool.poll_interval_ms {
            pool.poll_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(restarts) = self.pool.max_stall_restarts {
            pool.max_stall_restarts = restarts;
        }

        let fetcher = &mut config.fetcher;
        if let Some(attempts) = self.images.max_attempts {
            fetcher.image_max_attempts = attempts.max(1);
        }
        if let Some(ms) = self.images.retry_delay_ms {
            fetcher.image_retry_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.images.max_retry_delay_ms {
            fetcher.image_max_retry_delay = Duration::from_millis(ms);
        }

        Ok(config)
    }
}
