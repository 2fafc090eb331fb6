//! Page partitioning for index entries.
//!
//! Splits the digest list of one `(repository, revision)` checkout into
//! [`IndexPage`]s that each stay below the backing store's maximum entity
//! size.
//!
//! # Algorithm
//!
//! 1. Walk the digests in the order the hasher produced them.
//! 2. Append each digest to the current page.
//! 3. Before appending, if the page already holds `capacity` entries, or
//!    the estimated serialized size would pass [`MAX_PAGE_BYTES`], close
//!    the page and start the next one.
//! 4. Always emit at least one (primary) page, even for an empty list.
//!
//! # Guarantees
//!
//! - Page indices are contiguous: `0, 1, 2, …, N-1`.
//! - Every page holds at most `capacity` digests.
//! - Concatenating the pages yields the input, in order, with nothing
//!   dropped or repeated.
//! - The same input always yields the same pages.

use crate::models::{FileDigest, HashType, IndexPage, RepoMeta};
use crate::revision::COMMIT_WIDTH;

/// Default number of digests per page.
///
/// Tunable through `indexer.page_capacity`. With paths averaging well
/// under 200 bytes this keeps a page far below [`MAX_PAGE_BYTES`].
pub const DEFAULT_PAGE_CAPACITY: usize = 1000;

/// Upper bound on the estimated serialized size of one page.
///
/// Kept under the 1 MiB entity limit of document stores.
pub const MAX_PAGE_BYTES: usize = 900_000;

/// Per-entry framing overhead assumed by the size estimate (field names,
/// quotes, separators, the hash type tag).
const ENTRY_OVERHEAD: usize = 64;

/// Fixed per-page overhead (name, commit, page number, metadata).
const PAGE_OVERHEAD: usize = 4096;

/// Estimated serialized size of one digest entry.
pub fn estimated_entry_size(digest: &FileDigest) -> usize {
    // hex-encoded hash
    digest.path.len() + digest.hash.len() * 2 + ENTRY_OVERHEAD
}

/// Split `digests` into consecutive groups bounded by `capacity` entries
/// and [`MAX_PAGE_BYTES`].
///
/// A `capacity` of zero is treated as one.
pub fn paginate(digests: &[FileDigest], capacity: usize) -> Vec<Vec<FileDigest>> {
    let capacity = capacity.max(1);
    let mut pages = Vec::with_capacity(digests.len() / capacity + 1);
    let mut current: Vec<FileDigest> = Vec::new();
    let mut current_bytes = PAGE_OVERHEAD;

    for digest in digests {
        let size = estimated_entry_size(digest);
        let full = current.len() >= capacity || current_bytes + size > MAX_PAGE_BYTES;
        if full && !current.is_empty() {
            pages.push(std::mem::take(&mut current));
            current_bytes = PAGE_OVERHEAD;
        }
        current.push(digest.clone());
        current_bytes += size;
    }

    if !current.is_empty() || pages.is_empty() {
        pages.push(current);
    }
    pages
}

/// Build the full set of pages for one index entry.
///
/// `commit` must already be normalized. `meta` is attached to the primary
/// page only.
pub fn build_pages(
    name: &str,
    commit: &[u8; COMMIT_WIDTH],
    hash_type: HashType,
    meta: Option<RepoMeta>,
    digests: &[FileDigest],
    capacity: usize,
) -> Vec<IndexPage> {
    let mut meta = meta;
    paginate(digests, capacity)
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| IndexPage {
            name: name.to_string(),
            commit: commit.to_vec(),
            hash_type,
            page: i as u32,
            meta: if i == 0 { meta.take() } else { None },
            digests: chunk,
        })
        .collect()
}
