//! In-memory [`IndexStore`] implementation for tests and dry runs.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`. Pages are kept in their
//! serialized form so equality checks compare exactly what a real backend
//! would have written.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use anyhow::anyhow;
use async_trait::async_trait;

use crate::models::IndexPage;

use super::{IndexKey, IndexStore, StoreError};

/// In-memory store.
pub struct InMemoryStore {
    entries: RwLock<HashMap<IndexKey, Vec<Vec<u8>>>>,
    writes: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of successful `store` calls.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of distinct keys held.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw serialized pages for `key`, as persisted.
    pub fn raw(&self, key: &IndexKey) -> Option<Vec<Vec<u8>>> {
        self.entries.read().ok()?.get(key).cloned()
    }

    /// All keys currently stored, sorted.
    pub fn keys(&self) -> Vec<IndexKey> {
        let mut keys: Vec<IndexKey> = self
            .entries
            .read()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IndexStore for InMemoryStore {
    async fn store(&self, key: &IndexKey, pages: &[IndexPage]) -> Result<(), StoreError> {
        let mut encoded = Vec::with_capacity(pages.len());
        for page in pages {
            let bytes = serde_json::to_vec(page)
                .map_err(|e| StoreError::Malformed(format!("page {}: {}", page.page, e)))?;
            encoded.push(bytes);
        }
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StoreError::Transient(anyhow!("store lock poisoned")))?;
        entries.insert(key.clone(), encoded);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self, key: &IndexKey) -> Result<Vec<IndexPage>, StoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StoreError::Transient(anyhow!("store lock poisoned")))?;
        let Some(raw) = entries.get(key) else {
            return Ok(Vec::new());
        };
        raw.iter()
            .map(|bytes| {
                serde_json::from_slice(bytes)
                    .map_err(|e| StoreError::Malformed(format!("corrupt page for {key}: {e}")))
            })
            .collect()
    }
}
