// HLS download components: playlist resolution, segment and image fetching,
// the supervised worker pool and local playlist rewriting.

pub mod fetcher;
pub mod guard;
pub mod health;
pub mod image;
pub mod lease;
pub mod pool;
pub mod resolver;
pub mod rewriter;

pub use fetcher::{SegmentDownloader, SegmentFetcher, SegmentOutcome, SegmentTarget};
pub use guard::FailureThresholdGuard;
pub use health::{Activity, HealthRegistry, StalledWorker, WorkerEntry, WorkerState};
pub use image::ImageFetcher;
pub use lease::WriteLease;
pub use pool::WorkerPool;
pub use resolver::{PlaylistResolver, ResolvedPlaylist, SegmentLocator};
pub use rewriter::{PlaylistRewriter, RewriteOutcome};
