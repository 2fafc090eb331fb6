//! Repository materializer.
//!
//! Turns a [`WorkItem`] into an on-disk working tree at the requested
//! revision.
//!
//! Workflow:
//! 1. Create a private, uniquely named directory under the work dir.
//! 2. Fetch the stored snapshot of the repository into it.
//! 3. Open it as a git working tree.
//! 4. Force-check-out the target, then clean untracked files, so the tree
//!    reflects upstream state and nothing left over from earlier use of
//!    the snapshot.
//!
//! The returned [`Checkout`] owns the directory and removes it exactly
//! once: on [`Checkout::cleanup`], or when dropped on any other exit path
//! (errors, cancellation, a panic unwinding through the worker).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use osv_indexer_core::models::{CheckoutTarget, WorkItem};

use crate::archive::ArchiveSource;

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("failed to prepare work directory {path}: {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to fetch snapshot of '{name}': {source:#}")]
    Fetch {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to open repository '{name}': {detail}")]
    Open { name: String, detail: String },
    #[error("failed to check out '{target}' in '{name}': {detail}")]
    Checkout {
        name: String,
        target: String,
        detail: String,
    },
    #[error("materialization cancelled")]
    Cancelled,
}

/// A private working tree that is deleted when no longer needed.
#[derive(Debug)]
pub struct Checkout {
    path: Option<PathBuf>,
}

impl Checkout {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    /// Root of the working tree.
    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// Remove the directory now.
    pub async fn cleanup(mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = tokio::fs::remove_dir_all(&path).await {
                warn!(path = %path.display(), error = %e, "failed to remove checkout");
            }
        }
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_dir_all(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to remove checkout");
                }
            }
        }
    }
}

/// Obtains working trees for work items.
pub struct Materializer {
    archive: Arc<dyn ArchiveSource>,
    work_dir: PathBuf,
}

impl Materializer {
    pub fn new(archive: Arc<dyn ArchiveSource>, work_dir: PathBuf) -> Self {
        Self { archive, work_dir }
    }

    /// Fetch `item`'s repository and force-check-out its target.
    ///
    /// Every await point races `cancel`; a running git process is killed
    /// when its future is dropped.
    pub async fn materialize(
        &self,
        cancel: &CancellationToken,
        item: &WorkItem,
    ) -> Result<Checkout, MaterializeError> {
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|source| MaterializeError::WorkDir {
                path: self.work_dir.clone(),
                source,
            })?;

        let work_dir = tokio::fs::canonicalize(&self.work_dir)
            .await
            .map_err(|source| MaterializeError::WorkDir {
                path: self.work_dir.clone(),
                source,
            })?;
        let dir = work_dir.join(format!("{}-{}", sanitize(&item.name), Uuid::new_v4()));
        tokio::fs::create_dir(&dir)
            .await
            .map_err(|source| MaterializeError::WorkDir {
                path: dir.clone(),
                source,
            })?;
        let checkout = Checkout::new(dir);

        debug!(repo = %item.name, archive = self.archive.kind(), dir = %checkout.path().display(), "fetching snapshot");
        cancellable(cancel, self.archive.fetch(&item.name, checkout.path()))
            .await?
            .map_err(|source| MaterializeError::Fetch {
                name: item.name.clone(),
                source,
            })?;

        cancellable(cancel, open_repo(checkout.path()))
            .await?
            .map_err(|detail| MaterializeError::Open {
                name: item.name.clone(),
                detail,
            })?;

        let target = item.checkout_target();
        let checkout_err = |detail| MaterializeError::Checkout {
            name: item.name.clone(),
            target: target.refspec().to_string(),
            detail,
        };
        cancellable(cancel, git(checkout.path(), &checkout_args(&target)))
            .await?
            .map_err(checkout_err)?;
        cancellable(cancel, git(checkout.path(), &["clean", "-ffdx", "--quiet"]))
            .await?
            .map_err(checkout_err)?;

        Ok(checkout)
    }
}

fn checkout_args(target: &CheckoutTarget) -> Vec<&str> {
    match target {
        CheckoutTarget::Commit(c) => vec![
            "checkout",
            "--force",
            "--quiet",
            "--detach",
            "--end-of-options",
            c.as_str(),
        ],
        CheckoutTarget::Branch(b) => {
            vec!["checkout", "--force", "--quiet", "--end-of-options", b.as_str()]
        }
    }
}

async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T, MaterializeError>
where
    F: std::future::Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(MaterializeError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Check that `dir` is itself the top of a git working tree.
async fn open_repo(dir: &Path) -> Result<(), String> {
    let toplevel = git(dir, &["rev-parse", "--show-toplevel"]).await?;
    let want = tokio::fs::canonicalize(dir)
        .await
        .map_err(|e| format!("failed to resolve {}: {}", dir.display(), e))?;
    let got = tokio::fs::canonicalize(&toplevel)
        .await
        .map_err(|e| format!("failed to resolve {}: {}", toplevel, e))?;
    if got != want {
        return Err(format!("not a repository root (toplevel is {})", got.display()));
    }
    Ok(())
}

/// Run git in `dir`, returning trimmed stdout, or trimmed stderr on failure.
///
/// Repository discovery never climbs above `dir`, so a snapshot that is not
/// a repository cannot resolve to one that encloses the work dir.
async fn git(dir: &Path, args: &[&str]) -> Result<String, String> {
    let mut cmd = Command::new("git");
    cmd.arg("-c")
        .arg("advice.detachedHead=false")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .env_remove("GIT_DIR")
        .env_remove("GIT_WORK_TREE")
        .kill_on_drop(true);
    if let Some(parent) = dir.parent() {
        cmd.env("GIT_CEILING_DIRECTORIES", parent);
    }

    let output = cmd
        .output()
        .await
        .map_err(|e| format!("failed to execute 'git {}': {}", args.join(" "), e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("git {} failed: {}", args.join(" "), stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Directory-safe rendering of a repository name.
fn sanitize(name: &str) -> String {
    let s: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect();
    s.trim_start_matches('.').chars().take(64).collect()
}
