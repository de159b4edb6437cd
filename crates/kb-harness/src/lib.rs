//! # KB Harness
//!
//! **A local-first knowledge base that grounds generated social posts in
//! retrieved source passages.**
//!
//! KB Harness syncs source documents into a SQLite index (chunk text, FTS5
//! postings, and embedding vectors) and answers hybrid queries that blend
//! BM25 relevance with cosine similarity. The retrieved chunks are handed to
//! a post generator as prompt context.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────┐
//! │   Source    │──▶│    Sync      │──▶│  SQLite   │
//! │ (files)     │   │ Chunk+Embed  │   │ FTS5+Vec  │
//! └─────────────┘   └──────────────┘   └─────┬─────┘
//!                                            │ snapshot
//!                                            ▼
//!                                     ┌────────────┐
//!                                     │ Retriever  │──▶ prompt context
//!                                     └────────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. A [`source::DocumentSource`] returns the current text of a `source_id`.
//! 2. [`ingest`] chunks it, embeds every chunk, and replaces the source's
//!    previous contents in one transaction ([`sqlite_store`]).
//! 3. [`search`] runs the hybrid retriever from `kb-harness-core` on a read
//!    snapshot and prints results or a context block.
//!
//! ## Quick Start
//!
//! ```bash
//! kb init                              # create database and stamp the model
//! kb sync --all                        # index every file under [source].root
//! kb search "launch checklist" --explain
//! kb context "what changed in v2?"     # prompt-ready context block
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Database schema migrations (idempotent) |
//! | [`sqlite_store`] | SQLite implementation of the core `IndexStore` |
//! | [`embedding`] | Provider construction and the local fastembed model |
//! | [`source`] | Document sources: the filesystem root |
//! | [`ingest`] | Sync and rebuild: fetch → chunk → embed → store |
//! | [`search`] | Hybrid retrieval and context formatting for the CLI |
//! | [`get`] | Chunk and document lookup |
//! | [`sources`] | Indexed source listing and removal |
//! | [`stats`] | Index statistics |

pub mod config;
pub mod db;
pub mod embedding;
pub mod get;
pub mod ingest;
pub mod migrate;
pub mod search;
pub mod source;
pub mod sources;
pub mod sqlite_store;
pub mod stats;

pub use kb_harness_core::store;
pub use kb_harness_core::{Error, SyncError, SyncStage};
