#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use hlsvault_engine::EngineConfig;
use parking_lot::Mutex;

pub struct CdnState {
    pub segments: usize,
    pub failing: Mutex<HashSet<usize>>,
    pub slow: Mutex<HashSet<usize>>,
    pub playlist_available: AtomicBool,
    pub images_available: AtomicBool,
    pub requests: AtomicUsize,
}

impl CdnState {
    pub fn set_failing(&self, indices: impl IntoIterator<Item = usize>) {
        *self.failing.lock() = indices.into_iter().collect();
    }

    pub fn set_slow(&self, indices: impl IntoIterator<Item = usize>) {
        *self.slow.lock() = indices.into_iter().collect();
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

pub struct Cdn {
    pub base: String,
    pub state: Arc<CdnState>,
}

impl Cdn {
    pub fn playlist_url(&self) -> String {
        format!("{}/live/index.m3u8", self.base)
    }

    pub fn image_url(&self) -> String {
        format!("{}/img/cover.png", self.base)
    }

    /// Playlist whose segment lines differ only in their query string.
    pub fn query_playlist_url(&self) -> String {
        format!("{}/query/index.m3u8", self.base)
    }
}

pub fn segment_body(index: usize) -> Vec<u8> {
    vec![0x47; 188 * (index + 1)]
}

pub fn playlist_body(segments: usize) -> String {
    let mut body = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n");
    for i in 0..segments {
        body.push_str(&format!("#EXTINF:2.0,\nseg{i}.ts\n"));
    }
    body.push_str("#EXT-X-ENDLIST\n");
    body
}

async fn playlist(State(state): State<Arc<CdnState>>) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    if !state.playlist_available.load(Ordering::SeqCst) {
        return StatusCode::NOT_FOUND.into_response();
    }
    (
        [(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")],
        playlist_body(state.segments),
    )
        .into_response()
}

async fn segment(State(state): State<Arc<CdnState>>, UrlPath(name): UrlPath<String>) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    let Some(index) = name
        .strip_prefix("seg")
        .and_then(|n| n.strip_suffix(".ts"))
        .and_then(|n| n.parse::<usize>().ok())
    else {
        return StatusCode::NOT_FOUND.into_response();
    };

    if state.slow.lock().contains(&index) {
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
    if state.failing.lock().contains(&index) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    ([(header::CONTENT_TYPE, "video/mp2t")], segment_body(index)).into_response()
}

async fn query_playlist(State(state): State<Arc<CdnState>>) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    let mut body = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n");
    for i in 0..state.segments {
        body.push_str(&format!("#EXTINF:2.0,\nseg.ts?n={i}\n"));
    }
    body.push_str("#EXT-X-ENDLIST\n");
    ([(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")], body).into_response()
}

async fn query_segment(
    State(state): State<Arc<CdnState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    match params.get("n").and_then(|n| n.parse::<usize>().ok()) {
        Some(index) => ([(header::CONTENT_TYPE, "video/mp2t")], segment_body(index)).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn image(State(state): State<Arc<CdnState>>) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    if !state.images_available.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    (
        [(header::CONTENT_TYPE, "image/png")],
        vec![0x89u8, b'P', b'N', b'G', 0x0D, 0x0A],
    )
        .into_response()
}

pub async fn start_cdn(segments: usize) -> Cdn {
    let state = Arc::new(CdnState {
        segments,
        failing: Mutex::new(HashSet::new()),
        slow: Mutex::new(HashSet::new()),
        playlist_available: AtomicBool::new(true),
        images_available: AtomicBool::new(true),
        requests: AtomicUsize::new(0),
    });

    let router = Router::new()
        .route("/live/index.m3u8", get(playlist))
        .route("/live/{name}", get(segment))
        .route("/query/index.m3u8", get(query_playlist))
        .route("/query/seg.ts", get(query_segment))
        .route("/img/cover.png", get(image))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    Cdn {
        base: format!("http://{addr}"),
        state,
    }
}

pub fn test_config(root: &Path, concurrency: usize, threshold: usize) -> EngineConfig {
    let mut config = EngineConfig::with_root(root);
    config.pool.concurrency = concurrency;
    config.pool.max_error_threshold = threshold;
    config.pool.poll_interval = Duration::from_millis(20);
    config.fetcher.image_retry_delay = Duration::from_millis(5);
    config.fetcher.image_max_retry_delay = Duration::from_millis(20);
    config
}

/// Segment lines of a playlist file.
pub async fn segment_lines(path: &Path) -> Vec<String> {
    tokio::fs::read_to_string(path)
        .await
        .unwrap()
        .lines()
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_owned)
        .collect()
}
