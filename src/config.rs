//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/index.sqlite"
//!
//! [indexer]
//! workers = 25
//! hash_type = "md5"
//! page_capacity = 1000
//! # work_dir = "/var/tmp/osv-indexer"
//!
//! [archive]
//! kind = "local"
//! root = "/srv/repo-archive"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use osv_indexer_core::models::HashType;
use osv_indexer_core::paging::DEFAULT_PAGE_CAPACITY;

use crate::pipeline::MAX_WORKERS;

/// Upper bound for `indexer.write_retries`.
pub const MAX_WRITE_RETRIES: u32 = 10;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub indexer: IndexerConfig,
    pub archive: ArchiveConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexerConfig {
    /// Maximum number of work items processed concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_hash_type")]
    pub hash_type: HashType,
    /// Maximum digests per persisted page.
    #[serde(default = "default_page_capacity")]
    pub page_capacity: usize,
    /// Parent of the per-item private checkout directories.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    /// Extra attempts for a page write that failed transiently.
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            hash_type: default_hash_type(),
            page_capacity: default_page_capacity(),
            work_dir: None,
            write_retries: default_write_retries(),
            progress_interval_secs: default_progress_interval_secs(),
            log_level: default_log_level(),
        }
    }
}

impl IndexerConfig {
    /// Resolved parent directory for checkouts.
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("osv-indexer"))
    }
}

fn default_workers() -> usize {
    25
}
fn default_hash_type() -> HashType {
    HashType::Md5
}
fn default_page_capacity() -> usize {
    DEFAULT_PAGE_CAPACITY
}
fn default_write_retries() -> u32 {
    2
}
fn default_progress_interval_secs() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Where repository snapshots are fetched from.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ArchiveConfig {
    /// A directory holding one sub-directory per repository name.
    Local { root: PathBuf },
    S3(S3ArchiveConfig),
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3ArchiveConfig {
    pub bucket: String,
    /// Key prefix under which `<name>/` snapshots live.
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.indexer.workers == 0 {
        anyhow::bail!("indexer.workers must be > 0");
    }
    if config.indexer.workers > MAX_WORKERS {
        anyhow::bail!("indexer.workers must be <= {}", MAX_WORKERS);
    }
    if config.indexer.write_retries > MAX_WRITE_RETRIES {
        anyhow::bail!("indexer.write_retries must be <= {}", MAX_WRITE_RETRIES);
    }
    if config.indexer.page_capacity == 0 {
        anyhow::bail!("indexer.page_capacity must be > 0");
    }
    if config.indexer.progress_interval_secs == 0 {
        anyhow::bail!("indexer.progress_interval_secs must be > 0");
    }

    match &config.archive {
        ArchiveConfig::Local { root } if root.as_os_str().is_empty() => {
            anyhow::bail!("archive.root must not be empty");
        }
        ArchiveConfig::S3(s3) if s3.bucket.is_empty() => {
            anyhow::bail!("archive.bucket must not be empty");
        }
        _ => {}
    }

    Ok(config)
}
