//! # KB Harness Core
//!
//! Retrieval logic for KB Harness: data models, chunking, the embedding
//! trait, the index store abstraction, hybrid search, sync orchestration,
//! and prompt context formatting.
//!
//! This crate contains no sqlx, filesystem I/O, or model runtime. The
//! `kb-harness` application supplies the SQLite store, the local embedding
//! model, and document sources.
//!
//! # Example
//!
//! ```rust
//! use kb_harness_core::embedding::{EmbeddingProvider, HashingProvider};
//! use kb_harness_core::search::{RetrievalParams, Retriever};
//! use kb_harness_core::store::{memory::InMemoryStore, IndexSchema};
//! use kb_harness_core::sync::sync_document;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let embedder = HashingProvider::default();
//! let store = InMemoryStore::new(IndexSchema::new(embedder.model_name(), embedder.dims()));
//!
//! sync_document(&store, &embedder, "notes", "Cats nap.\n\nDogs bark.", 800).await?;
//!
//! let retriever = Retriever::new(&store, &embedder, RetrievalParams::default());
//! let hits = retriever.retrieve("dogs", 1).await?;
//! assert_eq!(hits[0].chunk.text, "Dogs bark.");
//! # Ok(())
//! # }
//! ```

pub mod chunk;
pub mod context;
pub mod embedding;
pub mod error;
pub mod lexical;
pub mod models;
pub mod search;
pub mod store;
pub mod sync;

pub use error::{Error, Result, SyncError, SyncStage};
