//! # OSV Indexer Core
//!
//! Shared, I/O-free logic for the repository indexer: data models,
//! fixed-width revision keys, page partitioning, and the store
//! abstraction the pipeline writes through.
//!
//! This crate contains no tokio, sqlx, process spawning, or filesystem
//! access. Everything that touches a working tree or a database lives in
//! the `osv-indexer` crate.

pub mod models;
pub mod paging;
pub mod revision;
pub mod store;
