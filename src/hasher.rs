//! Content hasher.
//!
//! Walks a materialized working tree and digests every file whose
//! extension is in the requested set. Traversal is sorted by file name so
//! the same tree always yields the same sequence, which keeps page layout
//! reproducible.
//!
//! A single unreadable file aborts the whole pass: a partial digest list
//! must never be persisted as if it were the full checkout.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

use osv_indexer_core::models::{FileDigest, HashType};

#[derive(Debug, Error)]
pub enum HashError {
    #[error("failed to walk {root}: {source}")]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The extension of `path` as matched against filters: the bytes of the
/// final component starting at its last `.`, or empty when there is none.
///
/// Case-sensitive, dot included: `foo/bar.tar.gz` has extension `.gz`.
/// Works on raw name bytes, so non-UTF-8 names still match.
pub fn file_ext(path: &Path) -> &[u8] {
    let name = match path.file_name() {
        Some(n) => n.as_encoded_bytes(),
        None => return &[],
    };
    match name.iter().rposition(|&b| b == b'.') {
        Some(i) => &name[i..],
        None => &[],
    }
}

/// Digest every matching file under `root`.
///
/// Directories are never hashed, and neither are symlinks that resolve to
/// one. Symlinks to files are followed; a dangling link is a read error.
/// The `.git` directory at the root is not part of the working tree and is
/// skipped.
pub fn hash_tree(
    root: &Path,
    exts: &[String],
    hash_type: HashType,
) -> Result<Vec<FileDigest>, HashError> {
    let mut digests = Vec::new();
    if exts.is_empty() {
        return Ok(digests);
    }

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !(e.depth() == 1 && e.file_type().is_dir() && e.file_name() == ".git"));

    for entry in walker {
        let entry = entry.map_err(|source| HashError::Walk {
            root: root.to_path_buf(),
            source,
        })?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }

        let path = entry.path();
        let ext = file_ext(path);
        if !exts.iter().any(|e| e.as_bytes() == ext) {
            continue;
        }

        if file_type.is_symlink() && path.is_dir() {
            continue;
        }

        let buf = std::fs::read(path).map_err(|source| HashError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let relative = path.strip_prefix(root).unwrap_or(path);
        digests.push(FileDigest {
            path: relative_path_string(relative),
            hash_type,
            hash: hash_type.digest(&buf),
        });
    }

    Ok(digests)
}

/// `/`-joined components. Bytes that are not valid UTF-8 are written as
/// `\xNN`, so distinct names stay distinct.
fn relative_path_string(relative: &Path) -> String {
    let mut out = String::new();
    for (i, c) in relative.components().enumerate() {
        if i > 0 {
            out.push('/');
        }
        push_escaped(c.as_os_str().as_encoded_bytes(), &mut out);
    }
    out
}

fn push_escaped(mut bytes: &[u8], out: &mut String) {
    loop {
        match std::str::from_utf8(bytes) {
            Ok(s) => {
                out.push_str(s);
                return;
            }
            Err(e) => {
                let (valid, rest) = bytes.split_at(e.valid_up_to());
                out.push_str(&String::from_utf8_lossy(valid));
                let bad = e.error_len().unwrap_or(rest.len());
                for b in &rest[..bad] {
                    let _ = write!(out, "\\x{:02x}", b);
                }
                bytes = &rest[bad..];
            }
        }
    }
}
