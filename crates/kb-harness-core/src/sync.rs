//! Sync orchestration: chunk a document, embed every chunk, and atomically
//! replace the source's contents in the index.
//!
//! The index is only touched after every chunk has a vector of the right
//! shape, so a failed embedding run leaves the previously indexed set intact.

use tracing::{debug, info};

use crate::chunk::chunk_text;
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, SyncError, SyncStage};
use crate::models::{Chunk, Document};
use crate::store::IndexStore;

/// Texts sent to the embedder per call unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Chunk, embed, and store `text` as the new contents of `source_id`.
///
/// Returns the number of chunks written. Re-syncing unchanged text produces
/// the same chunk texts and ordinals (with fresh chunk ids).
pub async fn sync_document(
    store: &dyn IndexStore,
    embedder: &dyn EmbeddingProvider,
    source_id: &str,
    text: &str,
    max_chars: usize,
) -> Result<usize, SyncError> {
    sync_document_batched(store, embedder, source_id, text, max_chars, DEFAULT_BATCH_SIZE).await
}

/// [`sync_document`] with an explicit embedding batch size.
pub async fn sync_document_batched(
    store: &dyn IndexStore,
    embedder: &dyn EmbeddingProvider,
    source_id: &str,
    text: &str,
    max_chars: usize,
    batch_size: usize,
) -> Result<usize, SyncError> {
    let prepared = prepare_document(
        embedder,
        store.schema().dims,
        source_id,
        text,
        max_chars,
        batch_size,
    )
    .await?;
    prepared.store(store).await
}

/// A chunked and embedded document, ready to be written.
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    pub document: Document,
    pub chunks: Vec<Chunk>,
    pub vectors: Vec<Vec<f32>>,
}

impl PreparedDocument {
    /// Replace the source's contents with this document. Returns the chunk count.
    pub async fn store(&self, store: &dyn IndexStore) -> Result<usize, SyncError> {
        let source_id = &self.document.source_id;
        store
            .replace_source(&self.document, &self.chunks, &self.vectors)
            .await
            .map_err(|e| SyncError::new(source_id, SyncStage::Store, e))?;

        info!(source_id = %source_id, chunks = self.chunks.len(), "synced source");
        Ok(self.chunks.len())
    }
}

/// Chunk and embed `text` without touching any index.
///
/// Every vector is checked against `dims` so that a later
/// [`PreparedDocument::store`] cannot fail on shape.
pub async fn prepare_document(
    embedder: &dyn EmbeddingProvider,
    dims: usize,
    source_id: &str,
    text: &str,
    max_chars: usize,
    batch_size: usize,
) -> Result<PreparedDocument, SyncError> {
    let fail = |stage: SyncStage, err: Error| SyncError::new(source_id, stage, err);

    if max_chars == 0 {
        return Err(fail(
            SyncStage::Chunk,
            Error::InvalidInput("max_chars must be at least 1".to_string()),
        ));
    }

    let document = Document::new(source_id, text);
    let chunks: Vec<Chunk> = chunk_text(text, max_chars)
        .into_iter()
        .map(|tc| Chunk::from_text_chunk(source_id, tc))
        .collect();
    debug!(source_id, chunks = chunks.len(), "chunked document");

    let vectors = embed_chunks(embedder, dims, &chunks, batch_size.max(1))
        .await
        .map_err(|e| fail(SyncStage::Embed, e))?;

    Ok(PreparedDocument {
        document,
        chunks,
        vectors,
    })
}

async fn embed_chunks(
    embedder: &dyn EmbeddingProvider,
    dims: usize,
    chunks: &[Chunk],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>, Error> {
    let mut vectors = Vec::with_capacity(chunks.len());

    for batch in chunks.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let out = embedder.embed_batch(&texts).await?;
        if out.len() != texts.len() {
            return Err(Error::EmbeddingUnavailable(format!(
                "embedder returned {} vectors for {} texts",
                out.len(),
                texts.len()
            )));
        }
        if let Some(bad) = out.iter().find(|v| v.len() != dims) {
            return Err(Error::SchemaMismatch(format!(
                "model '{}' produced {} dims, index expects {}",
                embedder.model_name(),
                bad.len(),
                dims
            )));
        }
        vectors.extend(out);
    }

    Ok(vectors)
}
