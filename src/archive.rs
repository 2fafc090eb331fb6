//! Archival storage for repository snapshots.
//!
//! The materializer does not know where snapshots live. It asks an
//! [`ArchiveSource`] to place the stored copy of a named repository into a
//! fresh local directory, and works from there.
//!
//! | Source | Backend | Module |
//! |--------|---------|--------|
//! | [`LocalArchive`] | A directory with one sub-directory per repository | here |
//! | [`S3Archive`](crate::archive_s3::S3Archive) | S3 / S3-compatible bucket | [`archive_s3`](crate::archive_s3) |

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use walkdir::WalkDir;

use crate::archive_s3::S3Archive;
use crate::config::ArchiveConfig;

/// Fetches a stored repository snapshot into a local directory.
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// Short label for logs (`"local"`, `"s3"`).
    fn kind(&self) -> &str;

    /// Copy the snapshot stored under `name` into `dest`.
    ///
    /// `dest` exists and is empty. On error the caller removes it.
    async fn fetch(&self, name: &str, dest: &Path) -> Result<()>;
}

/// Build the configured archive source.
pub fn from_config(config: &ArchiveConfig) -> Result<Arc<dyn ArchiveSource>> {
    Ok(match config {
        ArchiveConfig::Local { root } => Arc::new(LocalArchive::new(root.clone())),
        ArchiveConfig::S3(s3) => Arc::new(S3Archive::from_env(s3.clone())?),
    })
}

/// Reject names that would escape the archive root.
pub(crate) fn check_repo_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("empty repository name");
    }
    let path = Path::new(name);
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        bail!("repository name '{}' is not a plain relative path", name);
    }
    Ok(())
}

/// Snapshots stored as plain directories: `<root>/<name>/.git`, ...
pub struct LocalArchive {
    root: PathBuf,
}

impl LocalArchive {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl ArchiveSource for LocalArchive {
    fn kind(&self) -> &str {
        "local"
    }

    async fn fetch(&self, name: &str, dest: &Path) -> Result<()> {
        check_repo_name(name)?;
        let src = self.root.join(name);
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || copy_tree(&src, &dest))
            .await
            .context("archive copy task panicked")?
    }
}

/// Recursively copy `src` into the existing directory `dest`.
///
/// Symlinks are recreated as symlinks on Unix so a checkout sees the same
/// tree git would.
fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    if !src.is_dir() {
        bail!("no snapshot at {}", src.display());
    }

    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("{} escaped {}", entry.path().display(), src.display()))?;
        let target = dest.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target).with_context(|| {
                format!(
                    "Failed to copy {} to {}",
                    entry.path().display(),
                    target.display()
                )
            })?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, target: &Path) -> Result<()> {
    let link = std::fs::read_link(src)?;
    std::os::unix::fs::symlink(&link, target)
        .with_context(|| format!("Failed to link {}", target.display()))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, target: &Path) -> Result<()> {
    if src.is_file() {
        std::fs::copy(src, target)?;
    }
    Ok(())
}
