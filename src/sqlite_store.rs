//! SQLite-backed [`IndexStore`] implementation.
//!
//! Each `store` call runs in one transaction: the entry row is upserted,
//! every page is upserted by `(name, commit_key, hash_type, page)`, and
//! pages numbered past the new count are deleted. Page bodies are the
//! serialized [`IndexPage`], so identical input leaves identical rows.

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use osv_indexer_core::models::IndexPage;
use osv_indexer_core::store::{IndexKey, IndexStore, StoreError};

/// SQLite implementation of the [`IndexStore`] trait.
pub struct SqliteIndexStore {
    pool: SqlitePool,
}

impl SqliteIndexStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Map a driver error onto the store taxonomy.
///
/// Lock contention, pool exhaustion, and I/O may clear up on retry.
/// Constraint violations and decode failures will not.
fn classify(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) => {
            let msg = db.message().to_ascii_lowercase();
            if msg.contains("locked") || msg.contains("busy") {
                StoreError::Transient(anyhow!(e))
            } else {
                StoreError::Malformed(e.to_string())
            }
        }
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. } => StoreError::Malformed(e.to_string()),
        _ => StoreError::Transient(anyhow!(e)),
    }
}

#[async_trait]
impl IndexStore for SqliteIndexStore {
    async fn store(&self, key: &IndexKey, pages: &[IndexPage]) -> Result<(), StoreError> {
        let mut bodies = Vec::with_capacity(pages.len());
        for page in pages {
            let body = serde_json::to_string(page)
                .map_err(|e| StoreError::Malformed(format!("page {}: {}", page.page, e)))?;
            bodies.push(body);
        }
        let digest_count: usize = pages.iter().map(|p| p.digests.len()).sum();

        let mut tx = self.pool.begin().await.map_err(classify)?;

        sqlx::query(
            r#"
            INSERT INTO repo_indexes (name, commit_key, hash_type, page_count, digest_count)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(name, commit_key, hash_type) DO UPDATE SET
                page_count = excluded.page_count,
                digest_count = excluded.digest_count
            "#,
        )
        .bind(&key.name)
        .bind(&key.commit[..])
        .bind(key.hash_type.tag())
        .bind(pages.len() as i64)
        .bind(digest_count as i64)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        for (page, body) in pages.iter().zip(&bodies) {
            sqlx::query(
                r#"
                INSERT INTO index_pages (name, commit_key, hash_type, page, digest_count, body)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(name, commit_key, hash_type, page) DO UPDATE SET
                    digest_count = excluded.digest_count,
                    body = excluded.body
                "#,
            )
            .bind(&key.name)
            .bind(&key.commit[..])
            .bind(key.hash_type.tag())
            .bind(page.page as i64)
            .bind(page.digests.len() as i64)
            .bind(body)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        }

        sqlx::query(
            "DELETE FROM index_pages WHERE name = ? AND commit_key = ? AND hash_type = ? AND page >= ?",
        )
        .bind(&key.name)
        .bind(&key.commit[..])
        .bind(key.hash_type.tag())
        .bind(pages.len() as i64)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        tx.commit().await.map_err(classify)?;
        Ok(())
    }

    async fn load(&self, key: &IndexKey) -> Result<Vec<IndexPage>, StoreError> {
        let rows = sqlx::query(
            "SELECT body FROM index_pages WHERE name = ? AND commit_key = ? AND hash_type = ? ORDER BY page",
        )
        .bind(&key.name)
        .bind(&key.commit[..])
        .bind(key.hash_type.tag())
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        rows.iter()
            .map(|row| {
                let body: String = row.try_get("body").map_err(classify)?;
                serde_json::from_str(&body)
                    .map_err(|e| StoreError::Malformed(format!("corrupt page for {key}: {e}")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osv_indexer_core::models::{FileDigest, HashType};
    use osv_indexer_core::paging::build_pages;
    use osv_indexer_core::revision::normalize_revision;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_store() -> SqliteIndexStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::migrate(&pool).await.unwrap();
        SqliteIndexStore::new(pool)
    }

    fn entry(n: usize, capacity: usize) -> (IndexKey, Vec<IndexPage>) {
        let commit = normalize_revision(&[0x41; 4]);
        let digests: Vec<FileDigest> = (0..n)
            .map(|i| FileDigest {
                path: format!("src/{i}.c"),
                hash_type: HashType::Md5,
                hash: HashType::Md5.digest(&[i as u8]),
            })
            .collect();
        (
            IndexKey::new("abc", commit, HashType::Md5),
            build_pages("abc", &commit, HashType::Md5, None, &digests, capacity),
        )
    }

    async fn raw_bodies(store: &SqliteIndexStore) -> Vec<(i64, String)> {
        sqlx::query("SELECT page, body FROM index_pages ORDER BY page")
            .fetch_all(store.pool())
            .await
            .unwrap()
            .iter()
            .map(|r| (r.get::<i64, _>("page"), r.get::<String, _>("body")))
            .collect()
    }

    #[tokio::test]
    async fn store_and_load_round_trip() {
        let store = memory_store().await;
        let (key, pages) = entry(5, 2);
        store.store(&key, &pages).await.unwrap();
        assert_eq!(store.load(&key).await.unwrap(), pages);
    }

    #[tokio::test]
    async fn repeated_store_leaves_identical_rows() {
        let store = memory_store().await;
        let (key, pages) = entry(5, 2);
        store.store(&key, &pages).await.unwrap();
        let first = raw_bodies(&store).await;
        store.store(&key, &pages).await.unwrap();
        assert_eq!(raw_bodies(&store).await, first);
        assert_eq!(first.len(), 3);
    }

    #[tokio::test]
    async fn shrinking_entry_removes_overflow_pages() {
        let store = memory_store().await;
        let (key, pages) = entry(5, 2);
        store.store(&key, &pages).await.unwrap();
        let (_, fewer) = entry(1, 2);
        store.store(&key, &fewer).await.unwrap();
        assert_eq!(raw_bodies(&store).await.len(), 1);
        let count: i64 = sqlx::query_scalar("SELECT page_count FROM repo_indexes")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn missing_table_is_not_transient() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteIndexStore::new(pool);
        let (key, pages) = entry(1, 2);
        let err = store.store(&key, &pages).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
