//! Resumable HLS download engine.
//!
//! Fetches a media playlist and its segments with bounded concurrency,
//! verifies every segment on disk, aborts jobs whose failures reach a
//! threshold, and keeps an append-only success ledger plus an error journal
//! so later runs skip finished work and replay only what failed.

pub mod config;
pub mod engine;
mod error;
pub mod fs;
pub mod hls;
pub mod http;
pub mod input;
pub mod job;
pub mod naming;
pub mod retry;
pub mod state;

pub use config::{EngineConfig, FetcherConfig, HttpConfig, PoolConfig, StorageConfig};
pub use engine::{Engine, ImageReport, InputSummary, JobReport, LineFailure, RetrySummary, VideoOutcome};
pub use error::DownloadError;
pub use input::{ContentItem, InputError};
pub use job::{FailedSegment, Job, JobContext, JobResult, SegmentStatus, SegmentTask};
pub use naming::{FilenameGenerator, Operation, ResourceKind};
