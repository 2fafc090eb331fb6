//! Index writer.
//!
//! Converts the digests of one checkout into pages and commits them to the
//! injected [`IndexStore`]. The revision is normalized to the fixed key
//! width first, so the same input always lands on the same key and
//! produces the same pages; re-running a write is safe.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use osv_indexer_core::models::{FileDigest, HashType, RepoMeta, WorkItem};
use osv_indexer_core::paging::build_pages;
use osv_indexer_core::revision::normalize_revision;
use osv_indexer_core::store::{IndexKey, IndexStore, StoreError};

#[derive(Debug, Error)]
pub enum WriteError {
    /// Bad input. Retrying will not help.
    #[error("malformed index entry: {0}")]
    Malformed(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WriteError {
    /// Whether the caller may retry the same write.
    pub fn is_transient(&self) -> bool {
        matches!(self, WriteError::Store(e) if e.is_transient())
    }
}

/// What a successful write produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub key: IndexKey,
    pub pages: usize,
    pub digests: usize,
}

pub struct IndexWriter {
    store: Arc<dyn IndexStore>,
    page_capacity: usize,
}

impl IndexWriter {
    pub fn new(store: Arc<dyn IndexStore>, page_capacity: usize) -> Self {
        Self {
            store,
            page_capacity,
        }
    }

    /// Persist `digests` for `repo` at `revision`.
    pub async fn write(
        &self,
        repo: &str,
        revision: &[u8],
        hash_type: HashType,
        digests: &[FileDigest],
    ) -> Result<WriteOutcome, WriteError> {
        self.write_with_meta(repo, revision, hash_type, None, digests)
            .await
    }

    /// Like [`write`](Self::write), recording the item's repository
    /// metadata on the primary page.
    pub async fn write_item(
        &self,
        item: &WorkItem,
        revision: &[u8],
        hash_type: HashType,
        digests: &[FileDigest],
    ) -> Result<WriteOutcome, WriteError> {
        self.write_with_meta(
            &item.name,
            revision,
            hash_type,
            Some(RepoMeta::from_item(item)),
            digests,
        )
        .await
    }

    async fn write_with_meta(
        &self,
        repo: &str,
        revision: &[u8],
        hash_type: HashType,
        meta: Option<RepoMeta>,
        digests: &[FileDigest],
    ) -> Result<WriteOutcome, WriteError> {
        validate(repo, revision, hash_type, digests)?;

        let commit = normalize_revision(revision);
        let key = IndexKey::new(repo, commit, hash_type);
        let pages = build_pages(repo, &commit, hash_type, meta, digests, self.page_capacity);

        debug!(repo, commit = %key.commit_hex(), pages = pages.len(), digests = digests.len(), "writing index pages");
        self.store.store(&key, &pages).await?;

        Ok(WriteOutcome {
            key,
            pages: pages.len(),
            digests: digests.len(),
        })
    }
}

fn validate(
    repo: &str,
    revision: &[u8],
    hash_type: HashType,
    digests: &[FileDigest],
) -> Result<(), WriteError> {
    if repo.trim().is_empty() {
        return Err(WriteError::Malformed("empty repository name".into()));
    }
    if revision.is_empty() {
        return Err(WriteError::Malformed("empty revision".into()));
    }
    if let Some(d) = digests.iter().find(|d| d.hash_type != hash_type) {
        return Err(WriteError::Malformed(format!(
            "digest for {} is {} but entry is {}",
            d.path, d.hash_type, hash_type
        )));
    }
    if let Some(d) = digests
        .iter()
        .find(|d| d.hash.len() != hash_type.digest_len())
    {
        return Err(WriteError::Malformed(format!(
            "digest for {} has {} bytes, {} expects {}",
            d.path,
            d.hash.len(),
            hash_type,
            hash_type.digest_len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use osv_indexer_core::models::IndexPage;
    use osv_indexer_core::store::memory::InMemoryStore;

    fn digests(n: usize) -> Vec<FileDigest> {
        (0..n)
            .map(|i| FileDigest {
                path: format!("lib/{i}.cc"),
                hash_type: HashType::Md5,
                hash: HashType::Md5.digest(format!("file {i}").as_bytes()),
            })
            .collect()
    }

    fn writer(capacity: usize) -> (Arc<InMemoryStore>, IndexWriter) {
        let store = Arc::new(InMemoryStore::new());
        let w = IndexWriter::new(store.clone(), capacity);
        (store, w)
    }

    #[tokio::test]
    async fn short_revision_is_padded_in_key_and_pages() {
        let (store, w) = writer(10);
        let out = w
            .write("abc", &[0x41, 0x41, 0x41, 0x41], HashType::Md5, &digests(1))
            .await
            .unwrap();
        let mut want = vec![0x41u8; 4];
        want.extend([0u8; 16]);
        assert_eq!(out.key.commit.to_vec(), want);
        let pages = store.load(&out.key).await.unwrap();
        assert_eq!(pages[0].commit, want);
        assert_eq!(pages[0].name, "abc");
        assert_eq!(pages[0].hash_type, HashType::Md5);
    }

    #[tokio::test]
    async fn page_counts_follow_capacity() {
        let (_, w) = writer(3);
        for (n, want_pages) in [(1, 1), (2, 1), (7, 3)] {
            let out = w
                .write("abc", &[0x41; 4], HashType::Md5, &digests(n))
                .await
                .unwrap();
            assert_eq!(out.pages, want_pages, "{n} digests");
        }
    }

    #[tokio::test]
    async fn union_of_pages_equals_input() {
        let (store, w) = writer(4);
        let input = digests(17);
        let out = w.write("abc", &[1; 20], HashType::Md5, &input).await.unwrap();
        let pages = store.load(&out.key).await.unwrap();
        assert!(pages.iter().all(|p| p.digests.len() <= 4));
        let all: Vec<FileDigest> = pages.into_iter().flat_map(|p| p.digests).collect();
        assert_eq!(all, input);
    }

    #[tokio::test]
    async fn rewriting_is_idempotent() {
        let (store, w) = writer(4);
        let out = w
            .write("abc", &[9; 20], HashType::Md5, &digests(9))
            .await
            .unwrap();
        let first = store.raw(&out.key).unwrap();
        w.write("abc", &[9; 20], HashType::Md5, &digests(9))
            .await
            .unwrap();
        assert_eq!(store.raw(&out.key).unwrap(), first);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn empty_repo_name_is_malformed() {
        let (_, w) = writer(4);
        let err = w
            .write(" ", &[1; 20], HashType::Md5, &digests(1))
            .await
            .unwrap_err();
        assert!(matches!(err, WriteError::Malformed(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn mismatched_hash_type_is_malformed() {
        let (_, w) = writer(4);
        let err = w
            .write("abc", &[1; 20], HashType::Sha256, &digests(1))
            .await
            .unwrap_err();
        assert!(matches!(err, WriteError::Malformed(_)));
    }

    #[tokio::test]
    async fn item_metadata_lands_on_primary_page() {
        let (store, w) = writer(1);
        let item: WorkItem = serde_json::from_str(
            r#"{"name":"abc","type":"git","commit":"41414141","version":"1.2.3","file_exts":[".cc"]}"#,
        )
        .unwrap();
        let out = w
            .write_item(&item, &[0x41; 4], HashType::Md5, &digests(2))
            .await
            .unwrap();
        let pages = store.load(&out.key).await.unwrap();
        let meta = pages[0].meta.as_ref().unwrap();
        assert_eq!(meta.version.as_deref(), Some("1.2.3"));
        assert_eq!(meta.file_exts, vec![".cc".to_string()]);
        assert!(pages[1].meta.is_none());
    }

    struct FlakyStore;

    #[async_trait]
    impl IndexStore for FlakyStore {
        async fn store(&self, _key: &IndexKey, _pages: &[IndexPage]) -> Result<(), StoreError> {
            Err(StoreError::Transient(anyhow::anyhow!("database is locked")))
        }
        async fn load(&self, _key: &IndexKey) -> Result<Vec<IndexPage>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn transient_store_errors_are_flagged() {
        let w = IndexWriter::new(Arc::new(FlakyStore), 4);
        let err = w
            .write("abc", &[1; 20], HashType::Md5, &digests(1))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
