use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the index tables. Idempotent.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    // One row per (repository, revision, hash type) entry
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repo_indexes (
            name TEXT NOT NULL,
            commit_key BLOB NOT NULL,
            hash_type TEXT NOT NULL,
            page_count INTEGER NOT NULL,
            digest_count INTEGER NOT NULL,
            PRIMARY KEY (name, commit_key, hash_type)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per page; body is the serialized page
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_pages (
            name TEXT NOT NULL,
            commit_key BLOB NOT NULL,
            hash_type TEXT NOT NULL,
            page INTEGER NOT NULL,
            digest_count INTEGER NOT NULL,
            body TEXT NOT NULL,
            PRIMARY KEY (name, commit_key, hash_type, page)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_repo_indexes_name ON repo_indexes(name)")
        .execute(pool)
        .await?;

    Ok(())
}
