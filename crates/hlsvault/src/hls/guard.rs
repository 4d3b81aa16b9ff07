use crate::DownloadError;

/// Decides when accumulated segment failures abort a job.
#[derive(Debug, Clone, Copy)]
pub struct FailureThresholdGuard {
    threshold: usize,
}

impl FailureThresholdGuard {
    /// A threshold of zero disables the guard.
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn should_abort(&self, failed_so_far: usize) -> bool {
        self.threshold > 0 && failed_so_far >= self.threshold
    }

    pub fn trip(&self, failed_so_far: usize) -> DownloadError {
        DownloadError::ThresholdExceeded {
            failed: failed_so_far,
            threshold: self.threshold,
        }
    }
}
