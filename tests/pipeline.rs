//! Coordinator behavior under load: bounded concurrency, failure isolation,
//! draining, and cancellation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use osv_indexer::core::models::{RepoType, WorkItem};
use osv_indexer::pipeline::{ItemError, ItemProcessor, ItemReport, Pipeline, PipelineError};
use osv_indexer::progress::NoProgress;

fn item(i: usize) -> WorkItem {
    serde_json::from_value(serde_json::json!({
        "name": format!("repo-{i}"),
        "type": "git",
        "commit": "0123456789abcdef",
        "file_exts": [".c"],
    }))
    .unwrap()
}

/// Records how many `process` calls overlap.
#[derive(Default)]
struct Counting {
    current: AtomicUsize,
    peak: AtomicUsize,
    finished: AtomicUsize,
    fail_odd: bool,
}

#[async_trait]
impl ItemProcessor for Counting {
    async fn process(
        &self,
        _cancel: &CancellationToken,
        item: &WorkItem,
    ) -> Result<ItemReport, ItemError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(15)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        self.finished.fetch_add(1, Ordering::SeqCst);

        let n: usize = item.name.trim_start_matches("repo-").parse().unwrap();
        if self.fail_odd && n % 2 == 1 {
            return Err(ItemError::UnsupportedRepoType("odd".into()));
        }
        Ok(ItemReport { files: 1, pages: 1 })
    }
}

async fn feed(n: usize) -> mpsc::Receiver<WorkItem> {
    let (tx, rx) = mpsc::channel(n.max(1));
    for i in 0..n {
        tx.send(item(i)).await.unwrap();
    }
    rx
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn never_more_than_k_items_in_flight() {
    let counting = Arc::new(Counting::default());
    let pipeline = Pipeline::new(Arc::new(NoProgress))
        .with_workers(3)
        .register(RepoType::Git, counting.clone());

    let stats = pipeline
        .run(CancellationToken::new(), feed(20).await)
        .await
        .unwrap();

    assert_eq!(stats.succeeded, 20);
    assert!(counting.peak.load(Ordering::SeqCst) <= 3);
    assert!(counting.peak.load(Ordering::SeqCst) >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_returns_only_after_every_worker_finished() {
    let counting = Arc::new(Counting::default());
    let pipeline = Pipeline::new(Arc::new(NoProgress))
        .with_workers(4)
        .register(RepoType::Git, counting.clone());

    pipeline
        .run(CancellationToken::new(), feed(9).await)
        .await
        .unwrap();

    assert_eq!(counting.finished.load(Ordering::SeqCst), 9);
    assert_eq!(counting.current.load(Ordering::SeqCst), 0);
}

#[cfg(target_pointer_width = "64")]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn oversized_pool_still_drains_every_worker() {
    let counting = Arc::new(Counting::default());
    let pipeline = Pipeline::new(Arc::new(NoProgress))
        .with_workers((1usize << 32) + 1)
        .register(RepoType::Git, counting.clone());

    let stats = pipeline
        .run(CancellationToken::new(), feed(3).await)
        .await
        .unwrap();

    assert_eq!(stats.succeeded, 3);
    assert_eq!(counting.finished.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failures_do_not_stop_siblings() {
    let counting = Arc::new(Counting {
        fail_odd: true,
        ..Default::default()
    });
    let pipeline = Pipeline::new(Arc::new(NoProgress))
        .with_workers(2)
        .register(RepoType::Git, counting.clone());

    let stats = pipeline
        .run(CancellationToken::new(), feed(10).await)
        .await
        .unwrap();

    assert_eq!(stats.admitted, 10);
    assert_eq!(stats.succeeded, 5);
    assert_eq!(stats.failed, 5);
}

struct FailFast;

#[async_trait]
impl ItemProcessor for FailFast {
    async fn process(
        &self,
        _cancel: &CancellationToken,
        item: &WorkItem,
    ) -> Result<ItemReport, ItemError> {
        Err(ItemError::UnsupportedRepoType(item.name.clone()))
    }
}

#[tokio::test]
async fn many_failures_cannot_wedge_the_pool() {
    let pipeline = Pipeline::new(Arc::new(NoProgress))
        .with_workers(2)
        .register(RepoType::Git, Arc::new(FailFast));

    let stats = tokio::time::timeout(
        Duration::from_secs(10),
        pipeline.run(CancellationToken::new(), feed(200).await),
    )
    .await
    .expect("pipeline wedged")
    .unwrap();

    assert_eq!(stats.failed, 200);
}

struct WaitsForCancel {
    started: AtomicUsize,
}

#[async_trait]
impl ItemProcessor for WaitsForCancel {
    async fn process(
        &self,
        cancel: &CancellationToken,
        _item: &WorkItem,
    ) -> Result<ItemReport, ItemError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        cancel.cancelled().await;
        Err(ItemError::Cancelled)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_ends_the_run_promptly() {
    let waits = Arc::new(WaitsForCancel {
        started: AtomicUsize::new(0),
    });
    let pipeline = Pipeline::new(Arc::new(NoProgress))
        .with_workers(2)
        .register(RepoType::Git, waits.clone());

    let (tx, rx) = mpsc::channel(8);
    for i in 0..5 {
        tx.send(item(i)).await.unwrap();
    }

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = tokio::time::timeout(Duration::from_secs(5), pipeline.run(cancel, rx))
        .await
        .expect("cancellation not observed")
        .unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled));
    assert!(waits.started.load(Ordering::SeqCst) <= 2);
    drop(tx);
}
