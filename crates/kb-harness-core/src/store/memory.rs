//! In-memory [`IndexStore`] implementation for tests and embedding hosts
//! that do not need persistence.
//!
//! The whole index lives in an immutable [`IndexState`] behind
//! `RwLock<Arc<_>>`. Writers clone the state, apply their change, and swap
//! the `Arc`; a snapshot is just a clone of the current `Arc`, so it never
//! observes a half-applied replacement. Per-source entries are themselves
//! `Arc`ed, which keeps the clone proportional to the number of sources.
//!
//! Lexical search is an in-process BM25 over all stored chunks; vector search
//! is brute-force cosine similarity.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::embedding::unit_similarity;
use crate::error::{Error, Result};
use crate::lexical::{bm25_scores, TermCounts};
use crate::models::{Chunk, Document};

use super::{
    rank_candidates, validate_vectors, ChunkCandidate, IndexReader, IndexSchema, IndexStats,
    IndexStore, SourceSummary,
};

struct StoredChunk {
    chunk: Chunk,
    terms: TermCounts,
    vector: Vec<f32>,
}

struct SourceEntry {
    document: Document,
    chunks: Vec<StoredChunk>,
}

#[derive(Clone)]
struct IndexState {
    schema: IndexSchema,
    sources: BTreeMap<String, Arc<SourceEntry>>,
}

impl IndexState {
    fn chunks<'a>(&'a self, source: Option<&'a str>) -> impl Iterator<Item = &'a StoredChunk> {
        self.sources
            .iter()
            .filter(move |(id, _)| source.map_or(true, |s| s == id.as_str()))
            .flat_map(|(_, entry)| entry.chunks.iter())
    }
}

fn poisoned<T>(_: PoisonError<T>) -> Error {
    Error::Storage("index lock poisoned".to_string())
}

fn candidate(stored: &StoredChunk, raw_score: f64) -> ChunkCandidate {
    ChunkCandidate {
        chunk_id: stored.chunk.id.clone(),
        source_id: stored.chunk.source_id.clone(),
        ordinal: stored.chunk.ordinal,
        raw_score,
    }
}

/// In-memory index store.
pub struct InMemoryStore {
    state: RwLock<Arc<IndexState>>,
}

impl InMemoryStore {
    pub fn new(schema: IndexSchema) -> Self {
        Self {
            state: RwLock::new(Arc::new(IndexState {
                schema,
                sources: BTreeMap::new(),
            })),
        }
    }

    fn current(&self) -> Result<Arc<IndexState>> {
        Ok(self.state.read().map_err(poisoned)?.clone())
    }

    /// Apply `f` to a private copy of the state and publish it.
    fn update<T>(&self, f: impl FnOnce(&mut IndexState) -> Result<T>) -> Result<T> {
        let mut guard = self.state.write().map_err(poisoned)?;
        let mut next = IndexState::clone(&guard);
        let out = f(&mut next)?;
        *guard = Arc::new(next);
        Ok(out)
    }
}

/// A frozen view of an [`InMemoryStore`].
pub struct MemorySnapshot {
    state: Arc<IndexState>,
}

#[async_trait]
impl IndexReader for MemorySnapshot {
    async fn lexical_search(
        &self,
        query: &str,
        limit: usize,
        source: Option<&str>,
    ) -> Result<Vec<ChunkCandidate>> {
        let all: Vec<&StoredChunk> = self.state.chunks(None).collect();
        let terms: Vec<&TermCounts> = all.iter().map(|c| &c.terms).collect();

        let mut out: Vec<ChunkCandidate> = bm25_scores(query, &terms)
            .into_iter()
            .map(|(i, score)| (all[i], score))
            .filter(|(c, _)| source.map_or(true, |s| c.chunk.source_id == s))
            .map(|(c, score)| candidate(c, score))
            .collect();
        rank_candidates(&mut out, limit);
        Ok(out)
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        source: Option<&str>,
    ) -> Result<Vec<ChunkCandidate>> {
        if query_vec.len() != self.state.schema.dims {
            return Err(Error::SchemaMismatch(format!(
                "query vector has {} dims, index expects {}",
                query_vec.len(),
                self.state.schema.dims
            )));
        }
        let mut out: Vec<ChunkCandidate> = self
            .state
            .chunks(source)
            .map(|c| candidate(c, unit_similarity(query_vec, &c.vector)))
            .collect();
        rank_candidates(&mut out, limit);
        Ok(out)
    }

    async fn get_chunk(&self, chunk_id: &str) -> Result<Chunk> {
        self.state
            .chunks(None)
            .find(|c| c.chunk.id == chunk_id)
            .map(|c| c.chunk.clone())
            .ok_or_else(|| Error::NotFound(format!("chunk {}", chunk_id)))
    }

    async fn chunk_count(&self, source: Option<&str>) -> Result<i64> {
        Ok(self.state.chunks(source).count() as i64)
    }
}

#[async_trait]
impl IndexStore for InMemoryStore {
    fn schema(&self) -> IndexSchema {
        match self.state.read() {
            Ok(guard) => guard.schema.clone(),
            Err(poison) => poison.into_inner().schema.clone(),
        }
    }

    async fn replace_source(
        &self,
        document: &Document,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        self.update(|state| {
            validate_vectors(&state.schema, chunks, vectors)?;
            if let Some(stray) = chunks.iter().find(|c| c.source_id != document.source_id) {
                return Err(Error::InvalidInput(format!(
                    "chunk {} belongs to '{}', not '{}'",
                    stray.id, stray.source_id, document.source_id
                )));
            }

            let stored = chunks
                .iter()
                .zip(vectors)
                .map(|(chunk, vector)| StoredChunk {
                    terms: TermCounts::new(&chunk.text),
                    chunk: chunk.clone(),
                    vector: vector.clone(),
                })
                .collect();
            state.sources.insert(
                document.source_id.clone(),
                Arc::new(SourceEntry {
                    document: document.clone(),
                    chunks: stored,
                }),
            );
            Ok(())
        })
    }

    async fn remove_source(&self, source_id: &str) -> Result<bool> {
        self.update(|state| Ok(state.sources.remove(source_id).is_some()))
    }

    async fn snapshot(&self) -> Result<Box<dyn IndexReader>> {
        Ok(Box::new(MemorySnapshot {
            state: self.current()?,
        }))
    }

    async fn get_document(&self, source_id: &str) -> Result<Document> {
        self.current()?
            .sources
            .get(source_id)
            .map(|entry| entry.document.clone())
            .ok_or_else(|| Error::NotFound(format!("source {}", source_id)))
    }

    async fn list_sources(&self) -> Result<Vec<SourceSummary>> {
        Ok(self
            .current()?
            .sources
            .values()
            .map(|entry| SourceSummary {
                source_id: entry.document.source_id.clone(),
                chunk_count: entry.chunks.len() as i64,
                char_len: entry.document.text.chars().count() as i64,
                synced_at: entry.document.synced_at,
            })
            .collect())
    }

    async fn stats(&self) -> Result<IndexStats> {
        let state = self.current()?;
        let chunks = state.chunks(None).count() as i64;
        Ok(IndexStats {
            documents: state.sources.len() as i64,
            chunks,
            vectors: chunks,
            model: state.schema.model.clone(),
            dims: state.schema.dims,
        })
    }

    async fn reset(&self, schema: &IndexSchema) -> Result<()> {
        let mut guard = self.state.write().map_err(poisoned)?;
        *guard = Arc::new(IndexState {
            schema: schema.clone(),
            sources: BTreeMap::new(),
        });
        Ok(())
    }
}
