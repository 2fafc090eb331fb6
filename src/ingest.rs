//! Indexing run orchestration.
//!
//! Wires the configured archive, SQLite store, materializer, and writer into
//! a [`Pipeline`], then streams work items into it. Items arrive as JSON
//! lines (one [`WorkItem`] per line) from a file or stdin, which is what
//! the preparation stage emits.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use osv_indexer_core::models::{RepoType, WorkItem};
use osv_indexer_core::store::IndexStore;

use crate::archive::{self, ArchiveSource};
use crate::config::Config;
use crate::db;
use crate::materialize::Materializer;
use crate::migrate;
use crate::pipeline::{GitProcessor, Pipeline, PipelineError, MAX_WORKERS};
use crate::progress::{ProgressReporter, RunSnapshot};
use crate::sqlite_store::SqliteIndexStore;
use crate::writer::IndexWriter;

/// Options of `osv-indexer run` that override the config file.
#[derive(Debug, Default, Clone)]
pub struct RunOptions {
    /// JSON-lines file of work items; `None` or `-` reads stdin.
    pub items: Option<PathBuf>,
    pub workers: Option<usize>,
    /// Stop reading input after this many items.
    pub limit: Option<usize>,
}

/// Assemble a pipeline for `config` over the given collaborators.
pub fn build_pipeline(
    config: &Config,
    archive: Arc<dyn ArchiveSource>,
    store: Arc<dyn IndexStore>,
    progress: Arc<dyn ProgressReporter>,
) -> Pipeline {
    let idx = &config.indexer;
    let materializer = Materializer::new(archive, idx.work_dir());
    let writer = IndexWriter::new(store, idx.page_capacity);
    let git = GitProcessor::new(materializer, writer, idx.hash_type)
        .with_write_retries(idx.write_retries);

    Pipeline::new(progress)
        .with_workers(idx.workers)
        .with_progress_interval(Duration::from_secs(idx.progress_interval_secs.max(1)))
        .register(RepoType::Git, Arc::new(git))
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_item_line(line: &str) -> Result<Option<WorkItem>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let item: WorkItem = serde_json::from_str(line).context("invalid work item")?;
    Ok(Some(item))
}

/// Read work items from `reader` into `tx` until EOF, `limit`, or
/// cancellation. Unparseable lines are logged and skipped.
pub async fn produce_items<R>(
    reader: R,
    tx: mpsc::Sender<WorkItem>,
    cancel: CancellationToken,
    limit: Option<usize>,
) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut sent = 0usize;
    let mut line_no = 0usize;

    loop {
        if limit.is_some_and(|l| sent >= l) {
            break;
        }
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line.context("failed to read work items")?,
        };
        let Some(line) = line else {
            break;
        };
        line_no += 1;

        let item = match parse_item_line(&line) {
            Ok(Some(item)) => item,
            Ok(None) => continue,
            Err(e) => {
                warn!(line = line_no, error = %format!("{:#}", e), "skipping work item");
                continue;
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            res = tx.send(item) => {
                if res.is_err() {
                    break;
                }
            }
        }
        sent += 1;
    }

    Ok(sent)
}

async fn open_items(path: Option<&Path>) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
    match path {
        None => Ok(Box::new(tokio::io::stdin())),
        Some(p) if p == Path::new("-") => Ok(Box::new(tokio::io::stdin())),
        Some(p) => {
            let file = tokio::fs::File::open(p)
                .await
                .with_context(|| format!("Failed to open work items: {}", p.display()))?;
            Ok(Box::new(file))
        }
    }
}

/// CLI entry point for `osv-indexer run`.
pub async fn run_index(
    config: &Config,
    opts: RunOptions,
    progress: Arc<dyn ProgressReporter>,
) -> Result<RunSnapshot> {
    let mut config = config.clone();
    if let Some(w) = opts.workers {
        if w == 0 || w > MAX_WORKERS {
            bail!("--workers must be between 1 and {}", MAX_WORKERS);
        }
        config.indexer.workers = w;
    }

    let pool = db::connect(&config).await?;
    migrate::migrate(&pool).await?;

    let archive = archive::from_config(&config.archive)?;
    let store: Arc<dyn IndexStore> = Arc::new(SqliteIndexStore::new(pool.clone()));
    let pipeline = build_pipeline(&config, archive, store, progress);

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling run");
                cancel.cancel();
            }
        })
    };

    let reader = open_items(opts.items.as_deref()).await?;
    let (tx, rx) = mpsc::channel(pipeline.workers());
    let producer = tokio::spawn(produce_items(reader, tx, cancel.clone(), opts.limit));

    let result = pipeline.run(cancel.clone(), rx).await;
    cancel.cancel();
    ctrl_c.abort();

    let read = match producer.await {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => {
            pool.close().await;
            return Err(e);
        }
        Err(e) => {
            pool.close().await;
            bail!("work item reader failed: {}", e);
        }
    };
    pool.close().await;

    match result {
        Ok(snapshot) => {
            info!(read, "run complete");
            Ok(snapshot)
        }
        Err(PipelineError::Cancelled) => bail!("run cancelled"),
        Err(e) => Err(e.into()),
    }
}
