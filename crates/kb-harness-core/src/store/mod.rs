//! Storage abstraction for KB Harness.
//!
//! The index is split into two traits:
//!
//! - [`IndexReader`]: lexical search, vector search, and chunk lookup.
//! - [`IndexStore`]: atomic per-source replacement plus [`snapshot`](IndexStore::snapshot),
//!   which hands out an [`IndexReader`] bound to one consistent view of the
//!   index.
//!
//! A retrieval performs all of its reads on a single snapshot, so a sync
//! that commits mid-retrieval is either fully visible or not visible at all.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::models::{Chunk, Document};

/// A candidate chunk returned from lexical or vector search.
///
/// Carries what the retriever needs to merge and order candidates without
/// another round-trip; the full [`Chunk`] is resolved only for the final
/// top-k.
#[derive(Debug, Clone)]
pub struct ChunkCandidate {
    pub chunk_id: String,
    pub source_id: String,
    pub ordinal: i64,
    /// Raw score from the backend (BM25 or cosine in `[0, 1]`). Higher is better.
    pub raw_score: f64,
}

/// Embedding model identity recorded alongside an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexSchema {
    pub model: String,
    pub dims: usize,
}

impl IndexSchema {
    pub fn new(model: &str, dims: usize) -> Self {
        Self {
            model: model.to_string(),
            dims,
        }
    }
}

/// Per-source summary for listings.
#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    pub source_id: String,
    pub chunk_count: i64,
    pub char_len: i64,
    pub synced_at: i64,
}

/// Whole-index counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub documents: i64,
    pub chunks: i64,
    pub vectors: i64,
    pub model: String,
    pub dims: usize,
}

/// Read operations over one consistent view of the index.
#[async_trait]
pub trait IndexReader: Send + Sync {
    /// Full-text search. Scores are BM25-style: they grow with term
    /// frequency and shrink with document frequency.
    async fn lexical_search(
        &self,
        query: &str,
        limit: usize,
        source: Option<&str>,
    ) -> Result<Vec<ChunkCandidate>>;

    /// Nearest-neighbour search by cosine similarity, scores in `[0, 1]`.
    async fn vector_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        source: Option<&str>,
    ) -> Result<Vec<ChunkCandidate>>;

    /// Fetch a chunk by id. Fails with `NotFound` if absent.
    async fn get_chunk(&self, chunk_id: &str) -> Result<Chunk>;

    /// Number of chunks visible in this view, optionally for one source.
    async fn chunk_count(&self, source: Option<&str>) -> Result<i64>;
}

/// Abstract, durable index backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`replace_source`](IndexStore::replace_source) | Atomically swap a source's document, chunks, postings, and vectors |
/// | [`remove_source`](IndexStore::remove_source) | Atomically delete a source |
/// | [`snapshot`](IndexStore::snapshot) | Open a consistent read view |
/// | [`get_document`](IndexStore::get_document) | Stored text of a source |
/// | [`list_sources`](IndexStore::list_sources) | Per-source summaries |
/// | [`stats`](IndexStore::stats) | Whole-index counters |
/// | [`reset`](IndexStore::reset) | Drop everything and re-stamp the schema |
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Embedding model identity this index was built with.
    fn schema(&self) -> IndexSchema;

    /// Replace everything stored for `document.source_id` with `chunks` and
    /// their `vectors` (positionally aligned). Readers observe either the
    /// previous complete set or the new one.
    async fn replace_source(
        &self,
        document: &Document,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<()>;

    /// Delete a source. Returns whether anything was stored for it.
    async fn remove_source(&self, source_id: &str) -> Result<bool>;

    /// Open a consistent read view.
    async fn snapshot(&self) -> Result<Box<dyn IndexReader>>;

    /// Stored document for a source. Fails with `NotFound` if absent.
    async fn get_document(&self, source_id: &str) -> Result<Document>;

    async fn list_sources(&self) -> Result<Vec<SourceSummary>>;

    async fn stats(&self) -> Result<IndexStats>;

    /// Delete all content and record `schema` as the index's model.
    /// Used to rebuild after an embedding model change.
    async fn reset(&self, schema: &IndexSchema) -> Result<()>;
}

/// Check that `chunks` and `vectors` line up and match the index dimension.
pub fn validate_vectors(schema: &IndexSchema, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
    use crate::error::Error;

    if chunks.len() != vectors.len() {
        return Err(Error::InvalidInput(format!(
            "{} chunks but {} vectors",
            chunks.len(),
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != schema.dims) {
        return Err(Error::SchemaMismatch(format!(
            "vector has {} dims, index '{}' expects {}",
            bad.len(),
            schema.model,
            schema.dims
        )));
    }
    Ok(())
}

/// Sort candidates best-first, breaking score ties by ordinal, source id,
/// then chunk id, and keep the first `limit`.
pub fn rank_candidates(candidates: &mut Vec<ChunkCandidate>, limit: usize) {
    candidates.sort_by(|a, b| {
        b.raw_score
            .total_cmp(&a.raw_score)
            .then(a.ordinal.cmp(&b.ordinal))
            .then_with(|| a.source_id.cmp(&b.source_id))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    candidates.truncate(limit);
}
