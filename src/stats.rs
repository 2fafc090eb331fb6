//! Index statistics.
//!
//! Summarizes what has been persisted: indexed revisions, pages, and file
//! digests, with a per-hash-type and per-repository breakdown. Used by
//! `osv-indexer stats`.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

/// Totals across the whole database.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub entries: i64,
    pub repos: i64,
    pub pages: i64,
    pub digests: i64,
    pub by_hash_type: Vec<(String, i64)>,
    pub top_repos: Vec<RepoStats>,
}

/// Per-repository counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoStats {
    pub name: String,
    pub revisions: i64,
    pub digests: i64,
}

/// Query the totals. `top` bounds the per-repository list.
pub async fn collect_stats(pool: &SqlitePool, top: i64) -> Result<IndexStats> {
    let entries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM repo_indexes")
        .fetch_one(pool)
        .await?;
    let repos: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT name) FROM repo_indexes")
        .fetch_one(pool)
        .await?;
    let pages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_pages")
        .fetch_one(pool)
        .await?;
    let digests: i64 =
        sqlx::query_scalar("SELECT COALESCE(SUM(digest_count), 0) FROM repo_indexes")
            .fetch_one(pool)
            .await?;

    let by_hash_type = sqlx::query(
        "SELECT hash_type, COUNT(*) AS n FROM repo_indexes GROUP BY hash_type ORDER BY hash_type",
    )
    .fetch_all(pool)
    .await?
    .iter()
    .map(|row| (row.get("hash_type"), row.get("n")))
    .collect();

    let top_repos = sqlx::query(
        r#"
        SELECT name, COUNT(*) AS revisions, COALESCE(SUM(digest_count), 0) AS digests
        FROM repo_indexes
        GROUP BY name
        ORDER BY revisions DESC, name ASC
        LIMIT ?
        "#,
    )
    .bind(top)
    .fetch_all(pool)
    .await?
    .iter()
    .map(|row| RepoStats {
        name: row.get("name"),
        revisions: row.get("revisions"),
        digests: row.get("digests"),
    })
    .collect();

    Ok(IndexStats {
        entries,
        repos,
        pages,
        digests,
        by_hash_type,
        top_repos,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect_stats(&pool, 20).await;
    pool.close().await;
    let stats = stats?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("OSV Indexer — Index Stats");
    println!("=========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Repos:       {}", stats.repos);
    println!("  Revisions:   {}", stats.entries);
    println!("  Pages:       {}", stats.pages);
    println!("  Files:       {}", stats.digests);

    if !stats.by_hash_type.is_empty() {
        println!();
        println!("  By hash type:");
        for (hash_type, n) in &stats.by_hash_type {
            println!("    {:<8} {:>8}", hash_type, n);
        }
    }

    if !stats.top_repos.is_empty() {
        println!();
        println!("  {:<40} {:>9} {:>10}", "REPO", "REVISIONS", "FILES");
        println!("  {}", "-".repeat(61));
        for r in &stats.top_repos {
            println!("  {:<40} {:>9} {:>10}", r.name, r.revisions, r.digests);
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
