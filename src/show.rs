//! Stored index retrieval.
//!
//! Loads every page of one `(name, commit, hash type)` entry. Used by
//! `osv-indexer show` to inspect what a run persisted.

use anyhow::{bail, Context, Result};
use sqlx::SqlitePool;

use osv_indexer_core::models::{HashType, IndexPage};
use osv_indexer_core::revision::{normalize_revision, parse_revision};
use osv_indexer_core::store::{IndexKey, IndexStore};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteIndexStore;

/// Load the pages stored for `name` at `commit` (hex, abbreviated or full).
pub async fn load_entry(
    pool: &SqlitePool,
    name: &str,
    commit: &str,
    hash_type: HashType,
) -> Result<Vec<IndexPage>> {
    let revision = parse_revision(commit).with_context(|| format!("invalid commit '{}'", commit))?;
    let key = IndexKey::new(name, normalize_revision(&revision), hash_type);
    let store = SqliteIndexStore::new(pool.clone());
    let pages = store.load(&key).await?;
    Ok(pages)
}

/// CLI entry point: print one entry as a summary, or as JSON with `json`.
pub async fn run_show(
    config: &Config,
    name: &str,
    commit: &str,
    hash_type: HashType,
    json: bool,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let pages = load_entry(&pool, name, commit, hash_type).await;
    pool.close().await;
    let pages = pages?;

    if pages.is_empty() {
        bail!("no {} index for {}@{}", hash_type, name, commit);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&pages)?);
        return Ok(());
    }

    let total: usize = pages.iter().map(|p| p.digests.len()).sum();
    println!("--- Index ---");
    println!("name:      {}", name);
    println!("commit:    {}", hex::encode(&pages[0].commit));
    println!("hash_type: {}", hash_type);
    println!("pages:     {}", pages.len());
    println!("files:     {}", total);
    if let Some(meta) = &pages[0].meta {
        if let Some(v) = &meta.version {
            println!("version:   {}", v);
        }
        if let Some(addr) = &meta.repo_addr {
            println!("repo_addr: {}", addr);
        }
        if let Some(when) = &meta.when {
            println!("when:      {}", when.format("%Y-%m-%d %H:%M"));
        }
        println!("file_exts: {}", meta.file_exts.join(" "));
    }
    println!();

    for page in &pages {
        println!("--- Page {} ({}) ---", page.page, page.digests.len());
        for d in &page.digests {
            println!("{}  {}", hex::encode(&d.hash), d.path);
        }
        println!();
    }

    Ok(())
}
