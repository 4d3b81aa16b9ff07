// Per-target write lease. Every (re)submission of a segment takes a new
// generation; only the holder of the current generation may rename its temp
// file onto the destination.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tracing::debug;

use crate::DownloadError;
use crate::fs;

#[derive(Debug)]
pub struct WriteLease {
    path: PathBuf,
    generation: AtomicU64,
    commit_lock: Mutex<()>,
}

impl WriteLease {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            generation: AtomicU64::new(0),
            commit_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start a new generation, invalidating every earlier one.
    pub fn advance(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn current(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }

    /// Temp file used by one generation.
    pub fn temp_path(&self, generation: u64) -> PathBuf {
        fs::temp_path_for(&self.path, &format!("g{generation}"))
    }

    /// Move `temp` onto the destination if `generation` is still current.
    /// A stale generation has its temp file removed and gets `Superseded`.
    pub async fn commit(&self, generation: u64, temp: &Path) -> Result<(), DownloadError> {
        let _guard = self.commit_lock.lock().await;
        if !self.is_current(generation) {
            debug!(
                path = %self.path.display(),
                generation,
                current = self.current(),
                "Discarding superseded segment write"
            );
            fs::remove_if_exists(temp).await?;
            return Err(DownloadError::Superseded {
                path: self.path.clone(),
            });
        }
        tokio::fs::rename(temp, &self.path).await?;
        Ok(())
    }
}
