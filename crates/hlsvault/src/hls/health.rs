// Worker health registry: one entry per active segment worker, removed when
// the worker's entry guard is dropped (completion, failure or abort).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub type WorkerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
struct ThreadStatus {
    worker_id: WorkerId,
    segment_index: usize,
    generation: u64,
    started_at: Instant,
    last_active: Instant,
    state: WorkerState,
    url: String,
    filename: String,
}

/// A worker judged stalled by [`HealthRegistry::stalled`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalledWorker {
    pub worker_id: WorkerId,
    pub segment_index: usize,
    pub generation: u64,
    pub runtime: Duration,
    pub idle: Duration,
    pub url: String,
    pub filename: String,
}

/// Receives progress notifications while a body is streamed.
pub trait Activity: Send + Sync {
    fn touch(&self);
}

/// No-op activity for callers outside the worker pool.
impl Activity for () {
    fn touch(&self) {}
}

#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    workers: Arc<Mutex<HashMap<WorkerId, ThreadStatus>>>,
    next_id: Arc<AtomicU64>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an active worker. The returned guard removes the entry when
    /// dropped.
    pub fn register(
        &self,
        segment_index: usize,
        generation: u64,
        url: &str,
        filename: &str,
    ) -> WorkerEntry {
        let worker_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let now = Instant::now();
        self.workers.lock().insert(
            worker_id,
            ThreadStatus {
                worker_id,
                segment_index,
                generation,
                started_at: now,
                last_active: now,
                state: WorkerState::Running,
                url: url.to_owned(),
                filename: filename.to_owned(),
            },
        );
        WorkerEntry {
            worker_id,
            registry: self.clone(),
        }
    }

    /// Running workers whose total runtime exceeds `timeout` or whose last
    /// activity is older than `window`.
    pub fn stalled(&self, now: Instant, timeout: Duration, window: Duration) -> Vec<StalledWorker> {
        let workers = self.workers.lock();
        let mut stalled: Vec<StalledWorker> = workers
            .values()
            .filter(|s| s.state == WorkerState::Running)
            .filter_map(|s| {
                let runtime = now.saturating_duration_since(s.started_at);
                let idle = now.saturating_duration_since(s.last_active);
                (runtime > timeout || idle > window).then_some(StalledWorker {
                    worker_id: s.worker_id,
                    segment_index: s.segment_index,
                    generation: s.generation,
                    runtime,
                    idle,
                    url: s.url.clone(),
                    filename: s.filename.clone(),
                })
            })
            .collect();
        stalled.sort_by_key(|s| s.segment_index);
        stalled
    }

    pub fn len(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.lock().is_empty()
    }

    fn touch(&self, worker_id: WorkerId) {
        if let Some(status) = self.workers.lock().get_mut(&worker_id) {
            status.last_active = Instant::now();
        }
    }

    fn set_state(&self, worker_id: WorkerId, state: WorkerState) {
        if let Some(status) = self.workers.lock().get_mut(&worker_id) {
            status.state = state;
            status.last_active = Instant::now();
        }
    }

    fn remove(&self, worker_id: WorkerId) {
        self.workers.lock().remove(&worker_id);
    }
}

/// Registry entry owned by exactly one worker.
#[derive(Debug)]
pub struct WorkerEntry {
    worker_id: WorkerId,
    registry: HealthRegistry,
}

impl WorkerEntry {
    pub fn id(&self) -> WorkerId {
        self.worker_id
    }

    pub fn finish(&self, state: WorkerState) {
        self.registry.set_state(self.worker_id, state);
    }
}

impl Activity for WorkerEntry {
    fn touch(&self) {
        self.registry.touch(self.worker_id);
    }
}

impl Drop for WorkerEntry {
    fn drop(&mut self) {
        self.registry.remove(self.worker_id);
    }
}
