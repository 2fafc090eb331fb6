//! End-to-end indexing of real git snapshots through a local archive.
//!
//! Needs the `git` binary; each test returns early when it is missing.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use osv_indexer::archive::LocalArchive;
use osv_indexer::config::parse_config;
use osv_indexer::core::models::{CheckoutTarget, HashType, WorkItem};
use osv_indexer::core::revision::{normalize_revision, parse_revision};
use osv_indexer::core::store::memory::InMemoryStore;
use osv_indexer::core::store::{IndexKey, IndexStore};
use osv_indexer::ingest::build_pipeline;
use osv_indexer::materialize::{MaterializeError, Materializer};
use osv_indexer::progress::NoProgress;

fn have_git() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "test")
        .env("GIT_AUTHOR_EMAIL", "test@example.com")
        .env("GIT_COMMITTER_NAME", "test")
        .env("GIT_COMMITTER_EMAIL", "test@example.com")
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "git {:?}: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8(out.stdout).unwrap().trim().to_string()
}

struct Fixture {
    _tmp: TempDir,
    archive: std::path::PathBuf,
    work: std::path::PathBuf,
    first: String,
    second: String,
}

/// `libfoo` with two commits, then a dirty working tree and an untracked
/// file left in the snapshot.
fn fixture() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let archive = tmp.path().join("archive");
    let work = tmp.path().join("work");
    let repo = archive.join("libfoo");
    std::fs::create_dir_all(&repo).unwrap();

    git(&repo, &["init", "--quiet"]);
    std::fs::write(repo.join("foo.c"), "int foo(void) { return 1; }\n").unwrap();
    std::fs::write(repo.join("foo.h"), "int foo(void);\n").unwrap();
    std::fs::write(repo.join("README"), "libfoo\n").unwrap();
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "--quiet", "-m", "first"]);
    let first = git(&repo, &["rev-parse", "HEAD"]);

    std::fs::write(repo.join("foo.c"), "int foo(void) { return 2; }\n").unwrap();
    std::fs::write(repo.join("bar.c"), "int bar(void);\n").unwrap();
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "--quiet", "-m", "second"]);
    let second = git(&repo, &["rev-parse", "HEAD"]);

    std::fs::write(repo.join("foo.c"), "local edit\n").unwrap();
    std::fs::write(repo.join("junk.c"), "untracked\n").unwrap();

    Fixture {
        _tmp: tmp,
        archive,
        work,
        first,
        second,
    }
}

fn work_item(name: &str, commit: &str) -> WorkItem {
    serde_json::from_value(serde_json::json!({
        "name": name,
        "type": "git",
        "commit": commit,
        "version": "1.0",
        "file_exts": [".c", ".h"],
    }))
    .unwrap()
}

fn config_for(f: &Fixture) -> osv_indexer::config::Config {
    parse_config(&format!(
        r#"
        [db]
        path = "unused.sqlite"

        [indexer]
        workers = 2
        page_capacity = 1
        work_dir = "{}"

        [archive]
        kind = "local"
        root = "{}"
        "#,
        f.work.display(),
        f.archive.display()
    ))
    .unwrap()
}

fn key(name: &str, commit: &str) -> IndexKey {
    IndexKey::new(
        name,
        normalize_revision(&parse_revision(commit).unwrap()),
        HashType::Md5,
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn indexes_requested_revisions_from_pristine_trees() {
    if !have_git() {
        return;
    }
    let f = fixture();
    let cfg = config_for(&f);
    let store = Arc::new(InMemoryStore::new());
    let pipeline = build_pipeline(
        &cfg,
        Arc::new(LocalArchive::new(f.archive.clone())),
        store.clone(),
        Arc::new(NoProgress),
    );

    let (tx, rx) = mpsc::channel(4);
    tx.send(work_item("libfoo", &f.first)).await.unwrap();
    tx.send(work_item("libfoo", &f.second)).await.unwrap();
    drop(tx);

    let stats = pipeline.run(CancellationToken::new(), rx).await.unwrap();
    assert_eq!(stats.succeeded, 2, "{stats:?}");
    assert_eq!(stats.failed, 0);

    let first = store.load(&key("libfoo", &f.first)).await.unwrap();
    let paths: Vec<&str> = first
        .iter()
        .flat_map(|p| p.digests.iter().map(|d| d.path.as_str()))
        .collect();
    assert_eq!(paths, vec!["foo.c", "foo.h"]);
    assert_eq!(first.len(), 2);
    assert_eq!(
        first[0].digests[0].hash,
        HashType::Md5.digest(b"int foo(void) { return 1; }\n")
    );
    assert_eq!(
        first[0].meta.as_ref().unwrap().version.as_deref(),
        Some("1.0")
    );

    let second = store.load(&key("libfoo", &f.second)).await.unwrap();
    let paths: Vec<&str> = second
        .iter()
        .flat_map(|p| p.digests.iter().map(|d| d.path.as_str()))
        .collect();
    assert_eq!(paths, vec!["bar.c", "foo.c", "foo.h"]);
    let foo = second
        .iter()
        .flat_map(|p| p.digests.iter())
        .find(|d| d.path == "foo.c")
        .unwrap();
    assert_eq!(foo.hash, HashType::Md5.digest(b"int foo(void) { return 2; }\n"));

    let leftovers: Vec<_> = std::fs::read_dir(&f.work).unwrap().collect();
    assert!(leftovers.is_empty(), "checkouts left behind: {leftovers:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bad_items_fail_alone_and_leave_nothing_behind() {
    if !have_git() {
        return;
    }
    let f = fixture();
    let cfg = config_for(&f);
    let store = Arc::new(InMemoryStore::new());
    let pipeline = build_pipeline(
        &cfg,
        Arc::new(LocalArchive::new(f.archive.clone())),
        store.clone(),
        Arc::new(NoProgress),
    );

    let (tx, rx) = mpsc::channel(8);
    tx.send(work_item("libfoo", "deadbeefdeadbeef")).await.unwrap();
    tx.send(work_item("missing", &f.first)).await.unwrap();
    tx.send(work_item("libfoo", "zz")).await.unwrap();
    tx.send(work_item("libfoo", &f.first)).await.unwrap();
    drop(tx);

    let stats = pipeline.run(CancellationToken::new(), rx).await.unwrap();
    assert_eq!(stats.admitted, 4);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.failed, 3);
    assert_eq!(store.len(), 1);

    let leftovers: Vec<_> = std::fs::read_dir(&f.work).unwrap().collect();
    assert!(leftovers.is_empty(), "checkouts left behind: {leftovers:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reindexing_is_idempotent() {
    if !have_git() {
        return;
    }
    let f = fixture();
    let cfg = config_for(&f);
    let store = Arc::new(InMemoryStore::new());
    let pipeline = build_pipeline(
        &cfg,
        Arc::new(LocalArchive::new(f.archive.clone())),
        store.clone(),
        Arc::new(NoProgress),
    );

    for _ in 0..2 {
        let (tx, rx) = mpsc::channel(1);
        tx.send(work_item("libfoo", &f.second)).await.unwrap();
        drop(tx);
        pipeline.run(CancellationToken::new(), rx).await.unwrap();
    }

    let k = key("libfoo", &f.second);
    assert_eq!(store.len(), 1);
    assert_eq!(store.writes(), 2);
    assert_eq!(store.load(&k).await.unwrap().len(), 3);
}

fn materializer(archive: &Path, work: &Path) -> Materializer {
    Materializer::new(
        Arc::new(LocalArchive::new(archive.to_path_buf())),
        work.to_path_buf(),
    )
}

fn assert_empty(dir: &Path) {
    let leftovers: Vec<_> = std::fs::read_dir(dir).unwrap().collect();
    assert!(leftovers.is_empty(), "checkouts left behind: {leftovers:?}");
}

#[tokio::test]
async fn missing_snapshot_is_a_fetch_error() {
    if !have_git() {
        return;
    }
    let f = fixture();
    let err = materializer(&f.archive, &f.work)
        .materialize(&CancellationToken::new(), &work_item("absent", &f.first))
        .await
        .unwrap_err();
    assert!(matches!(err, MaterializeError::Fetch { .. }), "{err:?}");
    assert_empty(&f.work);
}

#[tokio::test]
async fn unknown_commit_is_a_checkout_error() {
    if !have_git() {
        return;
    }
    let f = fixture();
    let err = materializer(&f.archive, &f.work)
        .materialize(
            &CancellationToken::new(),
            &work_item("libfoo", "deadbeefdeadbeefdeadbeefdeadbeefdeadbeef"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MaterializeError::Checkout { .. }), "{err:?}");
    assert_empty(&f.work);
}

#[tokio::test]
async fn option_like_branch_is_treated_as_a_ref() {
    if !have_git() {
        return;
    }
    let f = fixture();
    let mut item = work_item("libfoo", &f.first);
    item.checkout = Some(CheckoutTarget::Branch("--orphan=evil".into()));
    let err = materializer(&f.archive, &f.work)
        .materialize(&CancellationToken::new(), &item)
        .await
        .unwrap_err();
    assert!(matches!(err, MaterializeError::Checkout { .. }), "{err:?}");
    assert_empty(&f.work);
}

/// A plain-directory snapshot checked out under a work dir that itself
/// lives inside another repository.
#[tokio::test]
async fn non_git_snapshot_never_resolves_to_an_enclosing_repo() {
    if !have_git() {
        return;
    }
    let tmp = TempDir::new().unwrap();
    let outer = tmp.path().join("outer");
    std::fs::create_dir_all(&outer).unwrap();
    git(&outer, &["init", "--quiet"]);
    std::fs::write(outer.join("precious.txt"), "v1\n").unwrap();
    git(&outer, &["add", "."]);
    git(&outer, &["commit", "--quiet", "-m", "v1"]);
    let head = git(&outer, &["rev-parse", "HEAD"]);
    std::fs::write(outer.join("precious.txt"), "UNCOMMITTED WORK\n").unwrap();

    let archive = tmp.path().join("archive");
    std::fs::create_dir_all(archive.join("plain")).unwrap();
    std::fs::write(archive.join("plain/lib.c"), "int x;\n").unwrap();
    let work = outer.join("work");

    let err = materializer(&archive, &work)
        .materialize(&CancellationToken::new(), &work_item("plain", &head))
        .await
        .unwrap_err();

    assert!(matches!(err, MaterializeError::Open { .. }), "{err:?}");
    assert_eq!(
        std::fs::read_to_string(outer.join("precious.txt")).unwrap(),
        "UNCOMMITTED WORK\n"
    );
    assert_empty(&work);
}
