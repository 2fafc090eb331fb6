//! Fixed-width revision keys.
//!
//! Every page of an index entry is keyed by the commit it was computed
//! from, stored as exactly [`COMMIT_WIDTH`] bytes regardless of how long
//! the identifier handed to the writer was. Shorter identifiers are
//! zero-padded on the right; longer ones keep their leading bytes. All
//! pages for a repository therefore share one key shape and stay
//! range-queryable.

use thiserror::Error;

/// Width of a git object id (SHA-1) in bytes.
pub const COMMIT_WIDTH: usize = 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RevisionError {
    #[error("empty commit identifier")]
    Empty,
    #[error("commit identifier '{0}' is not valid hex: {1}")]
    NotHex(String, String),
}

/// Left-align `revision` in a zeroed [`COMMIT_WIDTH`]-byte key.
pub fn normalize_revision(revision: &[u8]) -> [u8; COMMIT_WIDTH] {
    let mut key = [0u8; COMMIT_WIDTH];
    let n = revision.len().min(COMMIT_WIDTH);
    key[..n].copy_from_slice(&revision[..n]);
    key
}

/// Decode a hex commit identifier into raw bytes.
///
/// Abbreviated ids are accepted as long as they have an even number of
/// digits; the result is not normalized.
pub fn parse_revision(hex_id: &str) -> Result<Vec<u8>, RevisionError> {
    let trimmed = hex_id.trim();
    if trimmed.is_empty() {
        return Err(RevisionError::Empty);
    }
    hex::decode(trimmed).map_err(|e| RevisionError::NotHex(trimmed.to_string(), e.to_string()))
}
