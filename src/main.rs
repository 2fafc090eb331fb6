//! # OSV Indexer CLI (`osv-indexer`)
//!
//! Builds and inspects the repository content index.
//!
//! ## Usage
//!
//! ```bash
//! osv-indexer --config ./config/osv-indexer.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `osv-indexer init` | Create the SQLite database and run schema migrations |
//! | `osv-indexer run` | Index every work item read from a JSON-lines stream |
//! | `osv-indexer hash <dir>` | Print content digests for a local tree |
//! | `osv-indexer show <name> <commit>` | Print the stored index for one revision |
//! | `osv-indexer stats` | Summarize what has been indexed |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! osv-indexer init
//!
//! # Index the output of the preparation stage
//! prepare-items | osv-indexer run --items -
//!
//! # Digest C sources in a local checkout
//! osv-indexer hash ./zlib --ext .c --ext .h
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use osv_indexer::core::models::HashType;
use osv_indexer::progress::ProgressMode;
use osv_indexer::{config, hasher, ingest, logging, migrate, show, stats};

/// OSV Indexer: content-level index of repository snapshots.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "osv-indexer",
    about = "Content-level index of repository snapshots",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/osv-indexer.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Index work items.
    ///
    /// Reads one JSON work item per line, then materializes, hashes, and
    /// stores each one on a bounded worker pool. Ctrl-C cancels the run.
    Run {
        /// JSON-lines file of work items, or `-` for stdin.
        #[arg(long)]
        items: Option<PathBuf>,

        /// Override `indexer.workers`.
        #[arg(long)]
        workers: Option<usize>,

        /// Stop after this many work items.
        #[arg(long)]
        limit: Option<usize>,

        /// Progress output. Defaults to `human` on a terminal, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Print digests for every matching file under a local directory.
    ///
    /// Does not need a config file.
    Hash {
        dir: PathBuf,

        /// File extension to include, dot included (repeatable).
        #[arg(long = "ext", required = true)]
        exts: Vec<String>,

        #[arg(long, value_enum, default_value = "md5")]
        hash_type: HashTypeArg,
    },

    /// Print the stored index for one repository revision.
    Show {
        name: String,

        /// Commit id in hex, abbreviated or full.
        commit: String,

        /// Hash type of the entry. Defaults to `indexer.hash_type`.
        #[arg(long, value_enum)]
        hash_type: Option<HashTypeArg>,

        /// Print the raw pages as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show index statistics.
    Stats,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum HashTypeArg {
    Md5,
    Sha256,
}

impl From<HashTypeArg> for HashType {
    fn from(h: HashTypeArg) -> Self {
        match h {
            HashTypeArg::Md5 => HashType::Md5,
            HashTypeArg::Sha256 => HashType::Sha256,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Hash {
        dir,
        exts,
        hash_type,
    } = &cli.command
    {
        logging::init_tracing(cli.log_json, "warn");
        let digests = hasher::hash_tree(dir, exts, (*hash_type).into())?;
        for d in &digests {
            println!("{}  {}", hex::encode(&d.hash), d.path);
        }
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    logging::init_tracing(cli.log_json, &cfg.indexer.log_level);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Run {
            items,
            workers,
            limit,
            progress,
        } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            let opts = ingest::RunOptions {
                items,
                workers,
                limit,
            };
            let snapshot = ingest::run_index(&cfg, opts, mode.reporter()).await?;
            println!(
                "{} indexed, {} failed",
                snapshot.succeeded, snapshot.failed
            );
        }
        Commands::Show {
            name,
            commit,
            hash_type,
            json,
        } => {
            let hash_type = hash_type.map(HashType::from).unwrap_or(cfg.indexer.hash_type);
            show::run_show(&cfg, &name, &commit, hash_type, json).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Hash { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
