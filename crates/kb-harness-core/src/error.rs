//! Error taxonomy shared by every index, embedding, and sync operation.
//!
//! Library code returns [`Error`]; the `kb-harness` application wraps these
//! in `anyhow` with additional context. Callers that need to branch on the
//! failure kind (e.g. "no such chunk" vs. "rebuild required") match on the
//! variants directly or downcast from `anyhow::Error`.

use std::fmt;

use thiserror::Error;

/// Failure kinds surfaced by the retrieval core.
#[derive(Debug, Error)]
pub enum Error {
    /// The embedding model could not be loaded or failed to produce output.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Stored schema or vector dimension disagrees with the active model.
    /// Resolved only by a full rebuild.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// The index has no schema yet (`kb init` has not run).
    #[error("index not initialised: {0}")]
    NotInitialized(String),

    /// A chunk, source, or document does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The document source refused the request.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Caller-supplied value is unusable (e.g. misaligned chunk/vector sets).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The storage engine failed (I/O, SQL, lock poisoning).
    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline stage at which a sync failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    Fetch,
    Chunk,
    Embed,
    Store,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStage::Fetch => "fetch",
            SyncStage::Chunk => "chunk",
            SyncStage::Embed => "embed",
            SyncStage::Store => "store",
        };
        f.write_str(name)
    }
}

/// A sync failure tagged with the stage that produced it.
#[derive(Debug, Error)]
#[error("sync of '{source_id}' failed at stage '{stage}': {source}")]
pub struct SyncError {
    pub source_id: String,
    pub stage: SyncStage,
    #[source]
    pub source: Error,
}

impl SyncError {
    pub fn new(source_id: &str, stage: SyncStage, source: Error) -> Self {
        Self {
            source_id: source_id.to_string(),
            stage,
            source,
        }
    }
}
