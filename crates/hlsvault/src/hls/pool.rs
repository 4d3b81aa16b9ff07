// Segment worker pool: bounded concurrent fetches supervised by a single
// select! loop that applies the failure guard, restarts stalled workers and
// collects outcomes into a JobResult.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::fs;
use crate::hls::fetcher::{SegmentDownloader, SegmentOutcome, SegmentTarget};
use crate::hls::guard::FailureThresholdGuard;
use crate::hls::health::{HealthRegistry, WorkerState};
use crate::hls::lease::WriteLease;
use crate::job::{FailedSegment, JobResult, SegmentStatus, SegmentTask};

struct Completion {
    index: usize,
    generation: u64,
    outcome: SegmentOutcome,
}

struct Submission {
    task: SegmentTask,
    lease: Arc<WriteLease>,
    generation: u64,
    restarts: u32,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// A cancelled worker whose temp file is removed once its task has ended.
struct Retired {
    handle: JoinHandle<()>,
    temp: PathBuf,
}

impl Retired {
    fn stop(token: &CancellationToken, handle: JoinHandle<()>, temp: PathBuf) -> Self {
        token.cancel();
        handle.abort();
        Self { handle, temp }
    }
}

// An aborted task is dropped at its current await point, so its own cleanup
// never runs; partial temp files are removed here instead.
async fn reap(retired: Vec<Retired>) {
    for Retired { handle, temp } in retired {
        let _ = handle.await;
        if let Err(e) = fs::remove_if_exists(&temp).await {
            debug!(path = %temp.display(), error = %e, "Failed to remove worker temp file");
        }
    }
}

pub struct WorkerPool {
    config: PoolConfig,
    downloader: Arc<dyn SegmentDownloader>,
    registry: HealthRegistry,
}

impl WorkerPool {
    pub fn new(config: PoolConfig, downloader: Arc<dyn SegmentDownloader>) -> Self {
        Self {
            config,
            downloader,
            registry: HealthRegistry::new(),
        }
    }

    pub fn registry(&self) -> &HealthRegistry {
        &self.registry
    }

    /// Download every task into `dest_dir` and report the aggregate outcome.
    ///
    /// Cancelling `token` aborts the batch the same way a tripped guard does.
    pub async fn run(
        &self,
        tasks: Vec<SegmentTask>,
        dest_dir: &Path,
        token: &CancellationToken,
    ) -> JobResult {
        let guard = FailureThresholdGuard::new(self.config.max_error_threshold);
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let job_token = token.child_token();
        let (tx, mut rx) = mpsc::unbounded_channel::<Completion>();

        let mut result = JobResult::begin(tasks.len());
        let mut outstanding: BTreeMap<usize, Submission> = BTreeMap::new();

        for mut task in tasks {
            task.status = SegmentStatus::Running;
            let lease = Arc::new(WriteLease::new(dest_dir.join(&task.filename)));
            let submission = self.submit(task, lease, 0, &semaphore, &job_token, &tx);
            outstanding.insert(submission.task.index, submission);
        }
        info!(
            segments = result.total_segments,
            concurrency = self.config.concurrency,
            threshold = guard.threshold(),
            "Segment batch started"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut inbox: Vec<Completion> = Vec::new();
        let mut retired: Vec<Retired> = Vec::new();

        while !outstanding.is_empty() {
            if guard.should_abort(result.failed_segments) {
                let reason = guard.trip(result.failed_segments).to_string();
                warn!(
                    failed = result.failed_segments,
                    remaining = outstanding.len(),
                    "Failure threshold reached, aborting batch"
                );
                let result = Self::abort(result, outstanding, &job_token, reason, &mut retired);
                reap(retired).await;
                return result;
            }

            tokio::select! {
                biased;
                _ = job_token.cancelled() => {
                    warn!(remaining = outstanding.len(), "Batch cancelled");
                    let reason = "cancelled".to_owned();
                    let result = Self::abort(result, outstanding, &job_token, reason, &mut retired);
                    reap(retired).await;
                    return result;
                }
                Some(completion) = rx.recv() => inbox.push(completion),
                _ = ticker.tick() => {}
            }
            while let Ok(completion) = rx.try_recv() {
                inbox.push(completion);
            }

            self.restart_stalled(
                &mut outstanding,
                &mut result,
                &mut retired,
                &semaphore,
                &job_token,
                &tx,
            );

            for completion in inbox.drain(..) {
                let current = outstanding
                    .get(&completion.index)
                    .is_some_and(|s| s.generation == completion.generation);
                if !current {
                    debug!(
                        segment = completion.index,
                        generation = completion.generation,
                        "Discarding outcome of superseded worker"
                    );
                    continue;
                }
                let Some(mut submission) = outstanding.remove(&completion.index) else {
                    continue;
                };
                match completion.outcome {
                    SegmentOutcome::Success { bytes } => {
                        submission.task.status = SegmentStatus::Success;
                        debug!(segment = completion.index, bytes, "Segment completed");
                        result.record_success(completion.index);
                    }
                    SegmentOutcome::Failed { reason } => {
                        submission.task.status = SegmentStatus::Failed;
                        result.record_failure(
                            FailedSegment::new(&submission.task.url, completion.index, reason)
                                .with_retry_count(submission.restarts),
                        );
                    }
                    // Only reachable when the batch is already being torn down.
                    SegmentOutcome::Cancelled => {
                        submission.task.status = SegmentStatus::Failed;
                        result.record_failure(
                            FailedSegment::new(&submission.task.url, completion.index, "cancelled")
                                .with_retry_count(submission.restarts),
                        );
                    }
                }
            }
        }

        reap(retired).await;
        result.finish();
        info!(
            total = result.total_segments,
            successful = result.successful_segments,
            failed = result.failed_segments,
            "Segment batch finished"
        );
        result
    }

    fn submit(
        &self,
        task: SegmentTask,
        lease: Arc<WriteLease>,
        restarts: u32,
        semaphore: &Arc<Semaphore>,
        job_token: &CancellationToken,
        tx: &mpsc::UnboundedSender<Completion>,
    ) -> Submission {
        let generation = lease.advance();
        let token = job_token.child_token();
        let target = SegmentTarget {
            lease: lease.clone(),
            generation,
        };

        let worker = Worker {
            index: task.index,
            url: task.url.clone(),
            filename: task.filename.clone(),
            target,
            token: token.clone(),
            downloader: self.downloader.clone(),
            registry: self.registry.clone(),
            semaphore: semaphore.clone(),
            tx: tx.clone(),
        };
        let handle = tokio::spawn(worker.run());

        Submission {
            task,
            lease,
            generation,
            restarts,
            token,
            handle,
        }
    }

    fn restart_stalled(
        &self,
        outstanding: &mut BTreeMap<usize, Submission>,
        result: &mut JobResult,
        retired: &mut Vec<Retired>,
        semaphore: &Arc<Semaphore>,
        job_token: &CancellationToken,
        tx: &mpsc::UnboundedSender<Completion>,
    ) {
        let stalled = self.registry.stalled(
            Instant::now(),
            self.config.worker_timeout,
            self.config.stall_window,
        );

        for worker in stalled {
            let current = outstanding
                .get(&worker.segment_index)
                .is_some_and(|s| s.generation == worker.generation);
            if !current {
                continue;
            }
            let Some(submission) = outstanding.remove(&worker.segment_index) else {
                continue;
            };
            let temp = submission.lease.temp_path(submission.generation);
            retired.push(Retired::stop(&submission.token, submission.handle, temp));

            if submission.restarts >= self.config.max_stall_restarts {
                warn!(
                    segment = worker.segment_index,
                    restarts = submission.restarts,
                    file = %worker.filename,
                    "Segment stalled too many times, giving up"
                );
                result.record_failure(
                    FailedSegment::new(
                        &submission.task.url,
                        worker.segment_index,
                        format!("stalled after {} restarts", submission.restarts),
                    )
                    .with_retry_count(submission.restarts),
                );
                continue;
            }

            warn!(
                segment = worker.segment_index,
                runtime_ms = worker.runtime.as_millis() as u64,
                idle_ms = worker.idle.as_millis() as u64,
                restart = submission.restarts + 1,
                url = %worker.url,
                file = %worker.filename,
                "Worker stalled, resubmitting segment"
            );
            let resubmitted = self.submit(
                submission.task,
                submission.lease,
                submission.restarts + 1,
                semaphore,
                job_token,
                tx,
            );
            outstanding.insert(worker.segment_index, resubmitted);
        }
    }

    fn abort(
        mut result: JobResult,
        outstanding: BTreeMap<usize, Submission>,
        job_token: &CancellationToken,
        reason: String,
        retired: &mut Vec<Retired>,
    ) -> JobResult {
        job_token.cancel();
        let unfinished = outstanding
            .into_values()
            .map(|submission| {
                let temp = submission.lease.temp_path(submission.generation);
                retired.push(Retired::stop(&submission.token, submission.handle, temp));
                FailedSegment::new(
                    submission.task.url,
                    submission.task.index,
                    format!("not completed: {reason}"),
                )
                .with_retry_count(submission.restarts)
            })
            .collect();
        result.abort(reason, unfinished);
        result
    }
}

struct Worker {
    index: usize,
    url: String,
    filename: String,
    target: SegmentTarget,
    token: CancellationToken,
    downloader: Arc<dyn SegmentDownloader>,
    registry: HealthRegistry,
    semaphore: Arc<Semaphore>,
    tx: mpsc::UnboundedSender<Completion>,
}

impl Worker {
    async fn run(self) {
        let permit = tokio::select! {
            biased;
            _ = self.token.cancelled() => return,
            permit = self.semaphore.clone().acquire_owned() => permit,
        };
        let Ok(_permit) = permit else {
            return;
        };

        let entry = self.registry.register(
            self.index,
            self.target.generation,
            &self.url,
            &self.filename,
        );
        let outcome = self
            .downloader
            .fetch_segment(&self.url, &self.target, &entry, &self.token)
            .await;
        entry.finish(match outcome {
            SegmentOutcome::Success { .. } => WorkerState::Completed,
            _ => WorkerState::Failed,
        });

        let _ = self.tx.send(Completion {
            index: self.index,
            generation: self.target.generation,
            outcome,
        });
    }
}
