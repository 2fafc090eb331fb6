//! Indexing pipeline coordination.
//!
//! Pulls [`WorkItem`]s from a channel and runs each one end-to-end
//! (materialize → hash → write) on a bounded pool of tokio tasks.
//!
//! ```text
//!  input ──▶ admission ──▶ worker ──▶ materialize ─▶ hash ─▶ write ──▶ store
//!  (mpsc)   (semaphore)      │
//!                            └── on failure ──▶ error channel ──▶ log
//! ```
//!
//! - A slot is acquired *before* the next item is read, so a slow pool
//!   pushes back on the producer instead of buffering.
//! - A failed item is logged and counted; siblings keep running.
//! - Only cancellation (or a closed semaphore) ends a run early.
//! - Once the input closes the coordinator re-acquires every slot, so no
//!   worker (and no checkout directory) outlives [`Pipeline::run`].

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{mpsc, AcquireError, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use osv_indexer_core::models::{FileDigest, HashType, ItemState, RepoType, WorkItem};
use osv_indexer_core::revision::{parse_revision, RevisionError};

use crate::hasher::{hash_tree, HashError};
use crate::materialize::{MaterializeError, Materializer};
use crate::progress::{ProgressEvent, ProgressReporter, RunSnapshot};
use crate::writer::{IndexWriter, WriteError, WriteOutcome};

/// Default size of the worker pool.
pub const DEFAULT_WORKERS: usize = 25;

const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(30);

/// Base delay before retrying a transiently failed write.
const WRITE_RETRY_BASE: Duration = Duration::from_millis(250);

/// Backoff stops growing after this many doublings (16s).
const MAX_RETRY_DOUBLINGS: u32 = 6;

/// Largest pool the drain can wait on in one `acquire_many`.
pub const MAX_WORKERS: usize = u32::MAX as usize;

/// Why a single work item failed. Never fatal to the run.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("unsupported repository type '{0}'")]
    UnsupportedRepoType(String),
    #[error("invalid commit: {0}")]
    InvalidCommit(#[from] RevisionError),
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error("cancelled")]
    Cancelled,
    #[error("worker panicked: {0}")]
    Panicked(String),
}

/// Why a whole run stopped.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline cancelled")]
    Cancelled,
    #[error("failed to acquire worker slot: {0}")]
    Admission(#[from] AcquireError),
}

/// Summary of a successfully processed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemReport {
    pub files: usize,
    pub pages: usize,
}

/// The body of a worker for one repository kind.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    /// Process `item` to completion. Steps run strictly in sequence.
    async fn process(
        &self,
        cancel: &CancellationToken,
        item: &WorkItem,
    ) -> Result<ItemReport, ItemError>;
}

/// A failed item as posted on the coordinator's error channel.
#[derive(Debug)]
struct ItemFailure {
    name: String,
    commit: String,
    error: ItemError,
}

#[derive(Default)]
struct RunCounters {
    admitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl RunCounters {
    fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            admitted: self.admitted.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

/// Bounded worker pool over a stream of work items.
pub struct Pipeline {
    workers: usize,
    processors: HashMap<RepoType, Arc<dyn ItemProcessor>>,
    progress: Arc<dyn ProgressReporter>,
    progress_interval: Duration,
}

impl Pipeline {
    pub fn new(progress: Arc<dyn ProgressReporter>) -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            processors: HashMap::new(),
            progress,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Pool capacity, clamped to `1..=MAX_WORKERS`.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.clamp(1, MAX_WORKERS.min(Semaphore::MAX_PERMITS));
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Handle items of `repo_type` with `processor`.
    pub fn register(mut self, repo_type: RepoType, processor: Arc<dyn ItemProcessor>) -> Self {
        self.processors.insert(repo_type, processor);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Process every item received on `input` until it closes.
    ///
    /// Returns the final counters once all admitted workers have finished,
    /// or [`PipelineError::Cancelled`] as soon as `cancel` fires. Item
    /// failures are only visible through logs, progress events, and the
    /// `failed` counter.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        mut input: mpsc::Receiver<WorkItem>,
    ) -> Result<RunSnapshot, PipelineError> {
        let sem = Arc::new(Semaphore::new(self.workers));
        let (err_tx, mut err_rx) = mpsc::channel::<ItemFailure>(self.workers);
        let counters = Arc::new(RunCounters::default());

        let mut ticker = tokio::time::interval(self.progress_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.reset();

        info!(workers = self.workers, "pipeline started");

        loop {
            let acquire = sem.clone().acquire_owned();
            tokio::pin!(acquire);
            let permit = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                    res = &mut acquire => break res?,
                    Some(failure) = err_rx.recv() => self.on_failure(failure),
                }
            };

            let next = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                    Some(failure) = err_rx.recv() => self.on_failure(failure),
                    _ = ticker.tick() => self.progress.report(ProgressEvent::Summary(counters.snapshot())),
                    item = input.recv() => break item,
                }
            };
            let Some(item) = next else {
                break;
            };

            counters.admitted.fetch_add(1, Ordering::SeqCst);
            debug!(repo = %item.name, commit = %item.commit, state = %ItemState::Queued, "admitted");

            let processor = self.processors.get(&item.repo_type).cloned();
            let err_tx = err_tx.clone();
            let counters = counters.clone();
            let progress = self.progress.clone();
            let cancel = cancel.clone();

            tokio::spawn(async move {
                let _permit = permit;
                let result = AssertUnwindSafe(run_item(processor, &cancel, &item))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(ItemError::Panicked(panic_message(&*panic))));

                match result {
                    Ok(report) => {
                        counters.succeeded.fetch_add(1, Ordering::SeqCst);
                        progress.report(ProgressEvent::Indexed {
                            name: item.name.clone(),
                            commit: item.commit.clone(),
                            files: report.files,
                            pages: report.pages,
                        });
                    }
                    Err(error) => {
                        counters.failed.fetch_add(1, Ordering::SeqCst);
                        // The receiver is gone only after cancellation.
                        let _ = err_tx
                            .send(ItemFailure {
                                name: item.name,
                                commit: item.commit,
                                error,
                            })
                            .await;
                    }
                }
            });
        }

        // Input closed: wait for every outstanding worker. Not cancellable,
        // so no private checkout is left behind.
        debug!("input closed, draining workers");
        let drain = sem.acquire_many(u32::try_from(self.workers).unwrap_or(u32::MAX));
        tokio::pin!(drain);
        loop {
            tokio::select! {
                biased;
                res = &mut drain => {
                    res?;
                    break;
                }
                Some(failure) = err_rx.recv() => self.on_failure(failure),
            }
        }
        while let Ok(failure) = err_rx.try_recv() {
            self.on_failure(failure);
        }

        let snapshot = counters.snapshot();
        self.progress.report(ProgressEvent::Summary(snapshot));
        info!(
            admitted = snapshot.admitted,
            succeeded = snapshot.succeeded,
            failed = snapshot.failed,
            "pipeline finished"
        );
        Ok(snapshot)
    }

    fn on_failure(&self, failure: ItemFailure) {
        warn!(
            repo = %failure.name,
            commit = %failure.commit,
            state = %ItemState::Failed,
            error = %failure.error,
            "work item failed"
        );
        self.progress.report(ProgressEvent::Failed {
            name: failure.name,
            commit: failure.commit,
            error: failure.error.to_string(),
        });
    }
}

async fn run_item(
    processor: Option<Arc<dyn ItemProcessor>>,
    cancel: &CancellationToken,
    item: &WorkItem,
) -> Result<ItemReport, ItemError> {
    match processor {
        Some(p) => p.process(cancel, item).await,
        None => Err(ItemError::UnsupportedRepoType(item.repo_type.to_string())),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Worker body for git repositories.
pub struct GitProcessor {
    materializer: Materializer,
    writer: IndexWriter,
    hash_type: HashType,
    write_retries: u32,
}

impl GitProcessor {
    pub fn new(materializer: Materializer, writer: IndexWriter, hash_type: HashType) -> Self {
        Self {
            materializer,
            writer,
            hash_type,
            write_retries: 0,
        }
    }

    /// Extra attempts for writes that fail transiently.
    pub fn with_write_retries(mut self, retries: u32) -> Self {
        self.write_retries = retries;
        self
    }

    async fn write_with_retry(
        &self,
        cancel: &CancellationToken,
        item: &WorkItem,
        revision: &[u8],
        digests: &[FileDigest],
    ) -> Result<WriteOutcome, ItemError> {
        let mut attempt = 0;
        loop {
            match self
                .writer
                .write_item(item, revision, self.hash_type, digests)
                .await
            {
                Ok(out) => return Ok(out),
                Err(e) if e.is_transient() && attempt < self.write_retries => {
                    let delay = retry_delay(attempt);
                    warn!(repo = %item.name, attempt = attempt + 1, error = %e, "retrying index write");
                    attempt += 1;
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ItemError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn transition(item: &WorkItem, state: ItemState) {
    if state.is_terminal() {
        info!(repo = %item.name, commit = %item.commit, state = %state, "state change");
    } else {
        debug!(repo = %item.name, commit = %item.commit, state = %state, "state change");
    }
}

/// Backoff before retry number `attempt + 1`. Doubles up to a fixed cap.
fn retry_delay(attempt: u32) -> Duration {
    WRITE_RETRY_BASE * 2u32.saturating_pow(attempt.min(MAX_RETRY_DOUBLINGS))
}

#[async_trait]
impl ItemProcessor for GitProcessor {
    #[instrument(skip_all, fields(repo = %item.name, commit = %item.commit))]
    async fn process(
        &self,
        cancel: &CancellationToken,
        item: &WorkItem,
    ) -> Result<ItemReport, ItemError> {
        let revision = parse_revision(&item.commit)?;

        transition(item, ItemState::Materializing);
        let checkout = self.materializer.materialize(cancel, item).await?;

        transition(item, ItemState::Hashing);
        let root = checkout.path().to_path_buf();
        let exts = item.file_exts.clone();
        let hash_type = self.hash_type;
        let hashing = tokio::task::spawn_blocking(move || hash_tree(&root, &exts, hash_type));
        let digests = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ItemError::Cancelled),
            res = hashing => res.map_err(|e| ItemError::Panicked(e.to_string()))??,
        };
        checkout.cleanup().await;

        transition(item, ItemState::Writing);
        let out = self
            .write_with_retry(cancel, item, &revision, &digests)
            .await?;

        debug!(files = out.digests, pages = out.pages, "index written");
        transition(item, ItemState::Done);
        Ok(ItemReport {
            files: out.digests,
            pages: out.pages,
        })
    }
}
