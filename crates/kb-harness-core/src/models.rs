//! Core data models used throughout KB Harness.
//!
//! These types represent the source documents and the chunks that flow
//! through the sync and retrieval pipeline.

use std::ops::Range;

use serde::Serialize;

/// A source document as fetched for one sync pass.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    /// Stable identifier of the source (e.g. a page id or relative path).
    pub source_id: String,
    /// Raw text as fetched.
    pub text: String,
    /// Unix timestamp of the sync that stored this text.
    pub synced_at: i64,
}

impl Document {
    pub fn new(source_id: &str, text: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            text: text.to_string(),
            synced_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Chunker output before identifiers are assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Position within the document, starting at 0.
    pub ordinal: i64,
    /// Trimmed chunk text.
    pub text: String,
    /// Byte range of `text` within the source document.
    pub span: Range<usize>,
}

/// A stored, retrievable unit of document text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    /// Chunk UUID, reassigned on every sync.
    pub id: String,
    pub source_id: String,
    pub ordinal: i64,
    pub text: String,
    /// Length of `text` in characters.
    pub char_len: i64,
    /// Byte offset of the chunk's first character in the source document.
    pub span_start: i64,
    /// Byte offset one past the chunk's last character.
    pub span_end: i64,
}

impl Chunk {
    /// Give a chunker output an identity within `source_id`.
    pub fn from_text_chunk(source_id: &str, tc: TextChunk) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_id: source_id.to_string(),
            ordinal: tc.ordinal,
            char_len: tc.text.chars().count() as i64,
            span_start: tc.span.start as i64,
            span_end: tc.span.end as i64,
            text: tc.text,
        }
    }
}
