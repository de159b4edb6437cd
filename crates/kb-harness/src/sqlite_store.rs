//! SQLite-backed [`IndexStore`] implementation.
//!
//! Layout is created by [`crate::migrate`]. Each `replace_source` runs as one
//! transaction (delete the source's vectors, FTS rows, and chunks, upsert the
//! document, insert the new set), so a failure at any step rolls back to the
//! previous complete set. Writers inside the process are serialized by an
//! async mutex; readers use a snapshot (a read transaction under WAL) and
//! never see a partial replacement.
//!
//! # Schema guard
//!
//! `index_meta` records the schema version and the embedding model and
//! dimension the index was built with. [`SqliteStore::open`] compares them
//! with the active provider; on disagreement every operation except
//! [`reset`](IndexStore::reset) fails with [`Error::SchemaMismatch`].

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use kb_harness_core::embedding::{blob_to_vec, unit_similarity, vec_to_blob};
use kb_harness_core::error::{Error, Result};
use kb_harness_core::lexical::fts5_match_query;
use kb_harness_core::models::{Chunk, Document};
use kb_harness_core::store::{
    rank_candidates, validate_vectors, ChunkCandidate, IndexReader, IndexSchema, IndexStats,
    IndexStore, SourceSummary,
};
use kb_harness_core::sync::PreparedDocument;

use crate::migrate::{run_migrations, SCHEMA_VERSION};

fn storage(e: sqlx::Error) -> Error {
    Error::Storage(e.to_string())
}

#[derive(Debug, Clone)]
enum Status {
    Ready,
    Mismatched(String),
    Uninitialized,
}

struct Meta {
    schema: IndexSchema,
    status: Status,
}

/// SQLite implementation of [`IndexStore`].
pub struct SqliteStore {
    pool: SqlitePool,
    meta: RwLock<Meta>,
    write_lock: Mutex<()>,
}

impl SqliteStore {
    /// Open the index in `pool` for the embedding model described by
    /// `schema`. Does not create tables; see [`SqliteStore::initialize`].
    pub async fn open(pool: SqlitePool, schema: IndexSchema) -> Result<Self> {
        let status = evaluate(&schema, read_meta(&pool).await?);
        match &status {
            Status::Mismatched(msg) => warn!("{}", msg),
            Status::Uninitialized => debug!("index has no metadata yet"),
            Status::Ready => {}
        }
        Ok(Self {
            pool,
            meta: RwLock::new(Meta { schema, status }),
            write_lock: Mutex::new(()),
        })
    }

    /// Create tables if needed and stamp the index with the active model.
    ///
    /// An index already stamped with a different model is left untouched
    /// and reported as [`Error::SchemaMismatch`].
    pub async fn initialize(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        run_migrations(&self.pool).await.map_err(storage)?;

        let schema = self.schema();
        let stored = read_meta(&self.pool).await?;
        if stored.is_none() {
            let mut tx = self.pool.begin().await.map_err(storage)?;
            stamp(&mut tx, &schema).await.map_err(storage)?;
            tx.commit().await.map_err(storage)?;
            info!(model = %schema.model, dims = schema.dims, "initialised index");
        }

        let status = evaluate(&schema, read_meta(&self.pool).await?);
        self.set_status(status);
        self.ready()
    }

    /// Close the underlying pool, waiting for open connections to finish.
    pub async fn close(self) {
        self.pool.close().await;
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Every stored document, whatever model the index was built with.
    ///
    /// Unlike the [`IndexStore`] reads this ignores the schema guard, so a
    /// rebuild can recover the text of a mismatched index.
    pub async fn stored_documents(&self) -> Result<Vec<Document>> {
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='documents'",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;
        if !exists {
            return Ok(Vec::new());
        }

        let rows = sqlx::query("SELECT source_id, text, synced_at FROM documents ORDER BY source_id")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        Ok(rows
            .iter()
            .map(|r| Document {
                source_id: r.get("source_id"),
                text: r.get("text"),
                synced_at: r.get("synced_at"),
            })
            .collect())
    }

    /// Swap the whole index for `documents`, stamped with `schema`.
    ///
    /// Clearing, stamping, and every insert share one transaction, so a
    /// failure leaves the previous index (and its schema) exactly as it was.
    pub async fn replace_all(
        &self,
        schema: &IndexSchema,
        documents: &[PreparedDocument],
    ) -> Result<()> {
        for p in documents {
            validate_vectors(schema, &p.chunks, &p.vectors)?;
            check_owner(&p.document, &p.chunks)?;
        }

        let _guard = self.write_lock.lock().await;
        run_migrations(&self.pool).await.map_err(storage)?;

        let mut tx = self.pool.begin().await.map_err(storage)?;
        let outcome: sqlx::Result<()> = async {
            for table in ["chunk_vectors", "chunks_fts", "chunks", "documents"] {
                sqlx::query(&format!("DELETE FROM {}", table))
                    .execute(&mut *tx)
                    .await?;
            }
            stamp(&mut tx, schema).await?;
            for p in documents {
                write_source(&mut tx, &p.document, &p.chunks, &p.vectors).await?;
            }
            Ok(())
        }
        .await;
        finish(tx, outcome).await?;

        match self.meta.write() {
            Ok(mut meta) => {
                meta.schema = schema.clone();
                meta.status = Status::Ready;
            }
            Err(poison) => {
                let mut meta = poison.into_inner();
                meta.schema = schema.clone();
                meta.status = Status::Ready;
            }
        }
        info!(
            model = %schema.model,
            dims = schema.dims,
            documents = documents.len(),
            "reset index"
        );
        Ok(())
    }

    fn ready(&self) -> Result<()> {
        let status = match self.meta.read() {
            Ok(meta) => meta.status.clone(),
            Err(poison) => poison.into_inner().status.clone(),
        };
        match status {
            Status::Ready => Ok(()),
            Status::Mismatched(msg) => Err(Error::SchemaMismatch(msg)),
            Status::Uninitialized => Err(Error::NotInitialized(
                "run `kb init` to create the index".to_string(),
            )),
        }
    }

    fn set_status(&self, status: Status) {
        match self.meta.write() {
            Ok(mut meta) => meta.status = status,
            Err(poison) => poison.into_inner().status = status,
        }
    }
}

/// Model identity as recorded in `index_meta`.
struct StoredMeta {
    version: i64,
    model: String,
    dims: usize,
}

async fn read_meta(pool: &SqlitePool) -> Result<Option<StoredMeta>> {
    let exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='index_meta'",
    )
    .fetch_one(pool)
    .await
    .map_err(storage)?;
    if !exists {
        return Ok(None);
    }

    let rows = sqlx::query("SELECT key, value FROM index_meta")
        .fetch_all(pool)
        .await
        .map_err(storage)?;
    if rows.is_empty() {
        return Ok(None);
    }

    let values: HashMap<String, String> = rows
        .iter()
        .map(|r| (r.get("key"), r.get("value")))
        .collect();
    let field = |key: &str| {
        values
            .get(key)
            .cloned()
            .ok_or_else(|| Error::SchemaMismatch(format!("index_meta is missing '{}'", key)))
    };
    let parse_err = |key: &str| Error::SchemaMismatch(format!("index_meta '{}' is malformed", key));

    Ok(Some(StoredMeta {
        version: field("schema_version")?
            .parse()
            .map_err(|_| parse_err("schema_version"))?,
        model: field("embedding_model")?,
        dims: field("dims")?.parse().map_err(|_| parse_err("dims"))?,
    }))
}

fn evaluate(active: &IndexSchema, stored: Option<StoredMeta>) -> Status {
    let Some(stored) = stored else {
        return Status::Uninitialized;
    };
    if stored.version != SCHEMA_VERSION {
        return Status::Mismatched(format!(
            "index schema version {} is not supported (expected {}); run `kb rebuild`",
            stored.version, SCHEMA_VERSION
        ));
    }
    if stored.model != active.model || stored.dims != active.dims {
        return Status::Mismatched(format!(
            "index was built with '{}' ({} dims) but the active model is '{}' ({} dims); run `kb rebuild`",
            stored.model, stored.dims, active.model, active.dims
        ));
    }
    Status::Ready
}

async fn stamp(tx: &mut Transaction<'_, Sqlite>, schema: &IndexSchema) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM index_meta")
        .execute(&mut **tx)
        .await?;
    for (key, value) in [
        ("schema_version", SCHEMA_VERSION.to_string()),
        ("embedding_model", schema.model.clone()),
        ("dims", schema.dims.to_string()),
    ] {
        sqlx::query("INSERT INTO index_meta (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

async fn delete_source(tx: &mut Transaction<'_, Sqlite>, source_id: &str) -> sqlx::Result<u64> {
    sqlx::query("DELETE FROM chunk_vectors WHERE source_id = ?")
        .bind(source_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM chunks_fts WHERE source_id = ?")
        .bind(source_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM chunks WHERE source_id = ?")
        .bind(source_id)
        .execute(&mut **tx)
        .await?;
    let removed = sqlx::query("DELETE FROM documents WHERE source_id = ?")
        .bind(source_id)
        .execute(&mut **tx)
        .await?;
    Ok(removed.rows_affected())
}

fn check_owner(document: &Document, chunks: &[Chunk]) -> Result<()> {
    match chunks.iter().find(|c| c.source_id != document.source_id) {
        Some(stray) => Err(Error::InvalidInput(format!(
            "chunk {} belongs to '{}', not '{}'",
            stray.id, stray.source_id, document.source_id
        ))),
        None => Ok(()),
    }
}

async fn write_source(
    tx: &mut Transaction<'_, Sqlite>,
    document: &Document,
    chunks: &[Chunk],
    vectors: &[Vec<f32>],
) -> sqlx::Result<()> {
    delete_source(tx, &document.source_id).await?;

    sqlx::query("INSERT INTO documents (source_id, text, synced_at) VALUES (?, ?, ?)")
        .bind(&document.source_id)
        .bind(&document.text)
        .bind(document.synced_at)
        .execute(&mut **tx)
        .await?;

    for (chunk, vector) in chunks.iter().zip(vectors) {
        sqlx::query(
            r#"
            INSERT INTO chunks (id, source_id, ordinal, text, char_len, span_start, span_end)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.source_id)
        .bind(chunk.ordinal)
        .bind(&chunk.text)
        .bind(chunk.char_len)
        .bind(chunk.span_start)
        .bind(chunk.span_end)
        .execute(&mut **tx)
        .await?;

        sqlx::query("INSERT INTO chunks_fts (chunk_id, source_id, text) VALUES (?, ?, ?)")
            .bind(&chunk.id)
            .bind(&chunk.source_id)
            .bind(&chunk.text)
            .execute(&mut **tx)
            .await?;

        sqlx::query("INSERT INTO chunk_vectors (chunk_id, source_id, embedding) VALUES (?, ?, ?)")
            .bind(&chunk.id)
            .bind(&chunk.source_id)
            .bind(vec_to_blob(vector))
            .execute(&mut **tx)
            .await?;
    }

    Ok(())
}

async fn finish(tx: Transaction<'static, Sqlite>, outcome: sqlx::Result<()>) -> Result<()> {
    match outcome {
        Ok(()) => tx.commit().await.map_err(storage),
        Err(e) => {
            if let Err(rb) = tx.rollback().await {
                warn!("rollback failed: {}", rb);
            }
            Err(storage(e))
        }
    }
}

#[async_trait]
impl IndexStore for SqliteStore {
    fn schema(&self) -> IndexSchema {
        match self.meta.read() {
            Ok(meta) => meta.schema.clone(),
            Err(poison) => poison.into_inner().schema.clone(),
        }
    }

    async fn replace_source(
        &self,
        document: &Document,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.ready()?;
        validate_vectors(&self.schema(), chunks, vectors)?;
        check_owner(document, chunks)?;

        let mut tx = self.pool.begin().await.map_err(storage)?;
        let outcome = write_source(&mut tx, document, chunks, vectors).await;
        finish(tx, outcome).await?;

        debug!(source_id = %document.source_id, chunks = chunks.len(), "replaced source");
        Ok(())
    }

    async fn remove_source(&self, source_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        self.ready()?;

        let mut tx = self.pool.begin().await.map_err(storage)?;
        let outcome = delete_source(&mut tx, source_id).await;
        let removed = *outcome.as_ref().unwrap_or(&0);
        finish(tx, outcome.map(|_| ())).await?;
        Ok(removed > 0)
    }

    async fn snapshot(&self) -> Result<Box<dyn IndexReader>> {
        self.ready()?;
        let mut tx = self.pool.begin().await.map_err(storage)?;
        // A deferred transaction takes its read snapshot at the first read.
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM index_meta")
            .fetch_one(&mut *tx)
            .await
            .map_err(storage)?;
        Ok(Box::new(SqliteSnapshot {
            tx: Mutex::new(tx),
            dims: self.schema().dims,
        }))
    }

    async fn get_document(&self, source_id: &str) -> Result<Document> {
        self.ready()?;
        let row = sqlx::query("SELECT source_id, text, synced_at FROM documents WHERE source_id = ?")
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.map(|r| Document {
            source_id: r.get("source_id"),
            text: r.get("text"),
            synced_at: r.get("synced_at"),
        })
        .ok_or_else(|| Error::NotFound(format!("source {}", source_id)))
    }

    async fn list_sources(&self) -> Result<Vec<SourceSummary>> {
        self.ready()?;
        let rows = sqlx::query(
            r#"
            SELECT d.source_id, d.synced_at, length(d.text) AS char_len,
                   (SELECT COUNT(*) FROM chunks c WHERE c.source_id = d.source_id) AS chunk_count
            FROM documents d
            ORDER BY d.source_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        Ok(rows
            .iter()
            .map(|r| SourceSummary {
                source_id: r.get("source_id"),
                chunk_count: r.get("chunk_count"),
                char_len: r.get("char_len"),
                synced_at: r.get("synced_at"),
            })
            .collect())
    }

    async fn stats(&self) -> Result<IndexStats> {
        self.ready()?;
        let count = |sql: &'static str| async move {
            sqlx::query_scalar::<_, i64>(sql)
                .fetch_one(&self.pool)
                .await
                .map_err(storage)
        };
        let schema = self.schema();
        Ok(IndexStats {
            documents: count("SELECT COUNT(*) FROM documents").await?,
            chunks: count("SELECT COUNT(*) FROM chunks").await?,
            vectors: count("SELECT COUNT(*) FROM chunk_vectors").await?,
            model: schema.model,
            dims: schema.dims,
        })
    }

    async fn reset(&self, schema: &IndexSchema) -> Result<()> {
        self.replace_all(schema, &[]).await
    }
}

/// A read transaction pinned to one point in the index's history.
pub struct SqliteSnapshot {
    tx: Mutex<Transaction<'static, Sqlite>>,
    dims: usize,
}

#[async_trait]
impl IndexReader for SqliteSnapshot {
    async fn lexical_search(
        &self,
        query: &str,
        limit: usize,
        source: Option<&str>,
    ) -> Result<Vec<ChunkCandidate>> {
        let Some(match_expr) = fts5_match_query(query) else {
            return Ok(Vec::new());
        };

        let mut tx = self.tx.lock().await;
        let rows = sqlx::query(
            r#"
            SELECT chunks_fts.chunk_id AS chunk_id, chunks_fts.source_id AS source_id,
                   c.ordinal AS ordinal, bm25(chunks_fts) AS score
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.chunk_id
            WHERE chunks_fts MATCH ?
              AND (? IS NULL OR chunks_fts.source_id = ?)
            ORDER BY score
            LIMIT ?
            "#,
        )
        .bind(&match_expr)
        .bind(source)
        .bind(source)
        .bind(limit as i64)
        .fetch_all(&mut **tx)
        .await
        .map_err(storage)?;

        // FTS5 bm25() is lower-is-better; negate so higher is better.
        let mut out: Vec<ChunkCandidate> = rows
            .iter()
            .map(|r| {
                let score: f64 = r.get("score");
                ChunkCandidate {
                    chunk_id: r.get("chunk_id"),
                    source_id: r.get("source_id"),
                    ordinal: r.get("ordinal"),
                    raw_score: -score,
                }
            })
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
        if query_vec.len() != self.dims {
            return Err(Error::SchemaMismatch(format!(
                "query vector has {} dims, index expects {}",
                query_vec.len(),
                self.dims
            )));
        }

        let mut tx = self.tx.lock().await;
        let rows = sqlx::query(
            r#"
            SELECT cv.chunk_id, cv.source_id, c.ordinal, cv.embedding
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            WHERE (? IS NULL OR cv.source_id = ?)
            "#,
        )
        .bind(source)
        .bind(source)
        .fetch_all(&mut **tx)
        .await
        .map_err(storage)?;

        let mut out: Vec<ChunkCandidate> = rows
            .iter()
            .map(|r| {
                let blob: Vec<u8> = r.get("embedding");
                ChunkCandidate {
                    chunk_id: r.get("chunk_id"),
                    source_id: r.get("source_id"),
                    ordinal: r.get("ordinal"),
                    raw_score: unit_similarity(query_vec, &blob_to_vec(&blob)),
                }
            })
            .collect();
        rank_candidates(&mut out, limit);
        Ok(out)
    }

    async fn get_chunk(&self, chunk_id: &str) -> Result<Chunk> {
        let mut tx = self.tx.lock().await;
        let row = sqlx::query(
            r#"
            SELECT id, source_id, ordinal, text, char_len, span_start, span_end
            FROM chunks WHERE id = ?
            "#,
        )
        .bind(chunk_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(storage)?;

        row.map(|r| Chunk {
            id: r.get("id"),
            source_id: r.get("source_id"),
            ordinal: r.get("ordinal"),
            text: r.get("text"),
            char_len: r.get("char_len"),
            span_start: r.get("span_start"),
            span_end: r.get("span_end"),
        })
        .ok_or_else(|| Error::NotFound(format!("chunk {}", chunk_id)))
    }

    async fn chunk_count(&self, source: Option<&str>) -> Result<i64> {
        let mut tx = self.tx.lock().await;
        sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE (? IS NULL OR source_id = ?)")
            .bind(source)
            .bind(source)
            .fetch_one(&mut **tx)
            .await
            .map_err(storage)
    }
}
