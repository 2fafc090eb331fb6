//! Storage abstraction for index entries.
//!
//! The [`IndexStore`] trait is the only thing the pipeline knows about
//! persistence. Backends (SQLite, in-memory, a document database) are
//! injected at construction time.
//!
//! Implementations must be `Send + Sync`: every worker in the pool writes
//! through the same handle, each to its own `(repository, revision)` key.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{HashType, IndexPage};
use crate::revision::COMMIT_WIDTH;

/// Identity of one index entry. Pages hang off this key by page number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexKey {
    pub name: String,
    pub commit: [u8; COMMIT_WIDTH],
    pub hash_type: HashType,
}

impl IndexKey {
    pub fn new(name: impl Into<String>, commit: [u8; COMMIT_WIDTH], hash_type: HashType) -> Self {
        Self {
            name: name.into(),
            commit,
            hash_type,
        }
    }

    pub fn commit_hex(&self) -> String {
        hex::encode(self.commit)
    }
}

impl std::fmt::Display for IndexKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}/{}", self.name, self.commit_hex(), self.hash_type)
    }
}

/// Failure reported by a backend.
///
/// `Transient` failures may succeed on retry; `Malformed` ones will not.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transient store failure: {0}")]
    Transient(#[source] anyhow::Error),
    #[error("store rejected entry: {0}")]
    Malformed(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Abstract backend for persisted index pages.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`store`](IndexStore::store) | Replace every page for a key |
/// | [`load`](IndexStore::load) | Read back the pages for a key |
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Upsert `pages` under `key`.
    ///
    /// Replace-all semantics: afterwards the key holds exactly `pages`,
    /// and any previously stored page numbered past the new count is gone.
    /// Storing the same pages twice leaves identical state.
    async fn store(&self, key: &IndexKey, pages: &[IndexPage]) -> Result<(), StoreError>;

    /// Pages stored under `key`, ordered by page number. Empty if none.
    async fn load(&self, key: &IndexKey) -> Result<Vec<IndexPage>, StoreError>;
}
