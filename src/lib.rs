//! # OSV Indexer
//!
//! Builds a content-level index of repository snapshots: for each
//! `(repository, revision)` it checks out the tree, digests every file with
//! a selected extension, and persists the digests as paged entries keyed by
//! repository name, normalized revision, and hash type. A lookup service can
//! then match a vendored copy of some library to the upstream revision it
//! came from.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌─────────┐   ┌────────┐   ┌────────┐
//! │ Work items │──▶│  Pipeline    │──▶│Material-│──▶│ Hasher │──▶│ Writer │──▶ SQLite
//! │  (JSONL)   │   │ (K workers)  │   │  izer   │   │        │   │ (pages)│
//! └────────────┘   └──────────────┘   └────┬────┘   └────────┘   └────────┘
//!                                          │
//!                                   ┌──────┴──────┐
//!                                   │   Archive   │
//!                                   │  local / S3 │
//!                                   └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! osv-indexer init                          # create database
//! osv-indexer run --items work.jsonl        # index every listed revision
//! osv-indexer show zlib cacf7f1d4e3d44d8
//! osv-indexer stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | Tracing subscriber setup |
//! | [`progress`] | Per-item and periodic run reporting |
//! | [`archive`] | Snapshot sources (local directory) |
//! | [`archive_s3`] | Snapshot source backed by S3 |
//! | [`materialize`] | Private working tree at a target revision |
//! | [`hasher`] | Extension-filtered content digests |
//! | [`writer`] | Revision normalization and paged persistence |
//! | [`pipeline`] | Bounded worker pool over work items |
//! | [`ingest`] | Run wiring and work-item input |
//! | [`sqlite_store`] | SQLite implementation of the index store |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`show`] | Stored entry retrieval |
//! | [`stats`] | Index statistics |
//!
//! The data model, revision handling, paging, and the store trait live in
//! the `osv-indexer-core` crate.

pub mod archive;
pub mod archive_s3;
pub mod config;
pub mod db;
pub mod hasher;
pub mod ingest;
pub mod logging;
pub mod materialize;
pub mod migrate;
pub mod pipeline;
pub mod progress;
pub mod show;
pub mod sqlite_store;
pub mod stats;
pub mod writer;

pub use osv_indexer_core as core;
