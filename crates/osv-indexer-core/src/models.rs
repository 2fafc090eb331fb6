//! Core data models used throughout the indexer.
//!
//! A [`WorkItem`] flows in from the preparation stage, the hasher turns a
//! checked-out tree into [`FileDigest`]s, and the writer persists those as
//! [`IndexPage`]s.

use std::fmt;

use chrono::{DateTime, Utc};
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Kind of repository a work item points at.
///
/// Only git is materializable today. Any other tag is preserved verbatim
/// so the failure message can name it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RepoType {
    Git,
    Other(String),
}

impl From<String> for RepoType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "git" | "GIT" => RepoType::Git,
            _ => RepoType::Other(s),
        }
    }
}

impl From<RepoType> for String {
    fn from(t: RepoType) -> Self {
        t.to_string()
    }
}

impl fmt::Display for RepoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepoType::Git => f.write_str("git"),
            RepoType::Other(s) => f.write_str(s),
        }
    }
}

/// What to check out in the materialized working tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutTarget {
    /// A commit identifier in hex; checked out as a detached HEAD.
    Commit(String),
    /// A branch or tag name.
    Branch(String),
}

impl CheckoutTarget {
    /// The ref-ish string handed to `git checkout`.
    pub fn refspec(&self) -> &str {
        match self {
            CheckoutTarget::Commit(c) => c,
            CheckoutTarget::Branch(b) => b,
        }
    }
}

/// One unit of indexing work, as produced by the preparation stage.
///
/// Immutable once enqueued. Serialized as one JSON object per line on the
/// pipeline's input stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Repository name; also the archive path the snapshot is fetched from.
    pub name: String,
    /// Release label the commit corresponds to (e.g. `"v3.21.0"`).
    #[serde(default)]
    pub version: Option<String>,
    /// Upstream address of the repository, recorded for provenance.
    #[serde(default)]
    pub repo_addr: Option<String>,
    #[serde(rename = "type")]
    pub repo_type: RepoType,
    /// The commit being indexed, as hex. Used for the index key.
    pub commit: String,
    /// What to check out. Defaults to the commit itself.
    #[serde(default)]
    pub checkout: Option<CheckoutTarget>,
    /// Commit time, when the producer knows it.
    #[serde(default)]
    pub when: Option<DateTime<Utc>>,
    /// File suffixes (with the leading dot, e.g. `".c"`) to index.
    pub file_exts: Vec<String>,
}

impl WorkItem {
    /// The checkout target, falling back to a detached checkout of `commit`.
    pub fn checkout_target(&self) -> CheckoutTarget {
        self.checkout
            .clone()
            .unwrap_or_else(|| CheckoutTarget::Commit(self.commit.clone()))
    }
}

/// Content hash algorithm. Fixed per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashType {
    Md5,
    Sha256,
}

impl HashType {
    /// The tag persisted next to every digest.
    pub fn tag(&self) -> &'static str {
        match self {
            HashType::Md5 => "MD5",
            HashType::Sha256 => "SHA256",
        }
    }

    /// Digest length in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            HashType::Md5 => 16,
            HashType::Sha256 => 32,
        }
    }

    /// Hash `data`. Depends only on the bytes.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            HashType::Md5 => Md5::digest(data).to_vec(),
            HashType::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}

impl fmt::Display for HashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Digest of a single file in a checked-out tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileDigest {
    /// Path relative to the working tree root, `/`-separated.
    pub path: String,
    pub hash_type: HashType,
    #[serde(with = "hex_bytes")]
    pub hash: Vec<u8>,
}

/// Repository metadata carried on the primary page of an index entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RepoMeta {
    pub version: Option<String>,
    pub repo_type: Option<String>,
    pub repo_addr: Option<String>,
    pub file_exts: Vec<String>,
    pub when: Option<DateTime<Utc>>,
}

impl RepoMeta {
    pub fn from_item(item: &WorkItem) -> Self {
        Self {
            version: item.version.clone(),
            repo_type: Some(item.repo_type.to_string()),
            repo_addr: item.repo_addr.clone(),
            file_exts: item.file_exts.clone(),
            when: item.when,
        }
    }
}

/// One storage-size-bounded shard of a `(repository, revision)` digest list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPage {
    pub name: String,
    /// Normalized, fixed-width commit key.
    #[serde(with = "hex_bytes")]
    pub commit: Vec<u8>,
    pub hash_type: HashType,
    /// 0 is the primary page; overflow pages count up from 1.
    pub page: u32,
    /// Only present on the primary page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<RepoMeta>,
    pub digests: Vec<FileDigest>,
}

/// Lifecycle of a single work item inside a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Queued,
    Materializing,
    Hashing,
    Writing,
    Done,
    Failed,
}

impl ItemState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemState::Done | ItemState::Failed)
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemState::Queued => "queued",
            ItemState::Materializing => "materializing",
            ItemState::Hashing => "hashing",
            ItemState::Writing => "writing",
            ItemState::Done => "done",
            ItemState::Failed => "failed",
        };
        f.write_str(s)
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
