//! Ingestion: fetch → chunk → embed → store.
//!
//! The chunk/embed/store stages live in `kb_harness_core::sync`; this module
//! adds fetching from a [`DocumentSource`] and the whole-index rebuild.

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use kb_harness_core::embedding::EmbeddingProvider;
use kb_harness_core::error::{SyncError, SyncStage};
use kb_harness_core::store::IndexStore;
use kb_harness_core::sync::{prepare_document, sync_document_batched, PreparedDocument};

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::source::{DocumentSource, FileSource};
use crate::sqlite_store::SqliteStore;

/// Outcome of a multi-source sync.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// `(source_id, chunks written)` for each successful source.
    pub synced: Vec<(String, usize)>,
    pub failed: Vec<SyncError>,
}

/// Fetch `source_id` from `source` and sync it into `store`.
pub async fn sync_source(
    store: &dyn IndexStore,
    embedder: &dyn EmbeddingProvider,
    source: &dyn DocumentSource,
    source_id: &str,
    config: &Config,
) -> std::result::Result<usize, SyncError> {
    let text = source
        .fetch(source_id)
        .await
        .map_err(|e| SyncError::new(source_id, SyncStage::Fetch, e))?;

    sync_document_batched(
        store,
        embedder,
        source_id,
        &text,
        config.chunking.max_chars,
        config.embedding.batch_size,
    )
    .await
}

/// Sync every document the source lists. A failing source is recorded and
/// the rest still sync.
pub async fn sync_all(
    store: &dyn IndexStore,
    embedder: &dyn EmbeddingProvider,
    source: &dyn DocumentSource,
    config: &Config,
) -> Result<SyncReport> {
    let ids = source.list().await.context("Failed to list source documents")?;
    info!(documents = ids.len(), "syncing all sources");

    let mut report = SyncReport::default();
    for id in ids {
        match sync_source(store, embedder, source, &id, config).await {
            Ok(n) => report.synced.push((id, n)),
            Err(e) => {
                warn!("{}", e);
                report.failed.push(e);
            }
        }
    }
    Ok(report)
}

/// Re-index every stored document with the active embedding model.
///
/// All documents are chunked and embedded before anything is written, and
/// the reset plus every insert commit as one transaction, so any failure
/// leaves the existing index as it was. Returns the number of documents
/// re-indexed.
pub async fn rebuild(
    store: &SqliteStore,
    embedder: &dyn EmbeddingProvider,
    config: &Config,
) -> Result<usize> {
    let schema = config.embedding.schema();
    let documents = store.stored_documents().await?;
    info!(
        documents = documents.len(),
        model = %schema.model,
        "rebuilding index"
    );

    let mut prepared: Vec<PreparedDocument> = Vec::with_capacity(documents.len());
    for doc in &documents {
        prepared.push(
            prepare_document(
                embedder,
                schema.dims,
                &doc.source_id,
                &doc.text,
                config.chunking.max_chars,
                config.embedding.batch_size,
            )
            .await?,
        );
    }

    store
        .replace_all(&schema, &prepared)
        .await
        .context("Failed to write rebuilt index")?;

    Ok(prepared.len())
}

/// CLI entry point for `kb sync [<source_id>] [--all]`.
///
/// Fails (non-zero exit) if any source failed; the stage it failed at is
/// printed for each one.
pub async fn run_sync(config: &Config, source_id: Option<&str>, all: bool) -> Result<()> {
    let ids: Option<Vec<String>> = match (source_id, all) {
        (Some(_), true) => bail!("Pass either a source id or --all, not both"),
        (None, false) => bail!("Nothing to sync. Pass a source id or --all"),
        (Some(id), false) => Some(vec![id.to_string()]),
        (None, true) => None,
    };

    let store = db::open_store(config).await?;
    let embedder = embedding::create_provider(&config.embedding)?;
    let source = FileSource::new(&config.source.root);

    let report = match ids {
        None => sync_all(&store, embedder.as_ref(), &source, config).await?,
        Some(ids) => {
            let mut report = SyncReport::default();
            for id in ids {
                match sync_source(&store, embedder.as_ref(), &source, &id, config).await {
                    Ok(n) => report.synced.push((id, n)),
                    Err(e) => report.failed.push(e),
                }
            }
            report
        }
    };
    store.close().await;

    println!("sync");
    for (id, n) in &report.synced {
        println!("  {:<40} {} chunk{}", id, n, if *n == 1 { "" } else { "s" });
    }
    for e in &report.failed {
        println!("  {:<40} FAILED at {}: {}", e.source_id, e.stage, e.source);
    }
    println!("  synced: {}", report.synced.len());
    println!("  failed: {}", report.failed.len());

    if !report.failed.is_empty() {
        bail!("{} source(s) failed to sync", report.failed.len());
    }
    Ok(())
}

/// CLI entry point for `kb rebuild`.
pub async fn run_rebuild(config: &Config) -> Result<()> {
    let store = db::open_store(config).await?;
    let embedder = embedding::create_provider(&config.embedding)?;

    let n = rebuild(&store, embedder.as_ref(), config).await?;
    let stats = store.stats().await?;
    store.close().await;

    println!("rebuild");
    println!("  model: {} ({} dims)", stats.model, stats.dims);
    println!("  documents: {}", n);
    println!("  chunks: {}", stats.chunks);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use kb_harness_core::embedding::HashingProvider;
    use kb_harness_core::error::Error;
    use kb_harness_core::store::memory::InMemoryStore;
    use kb_harness_core::store::IndexSchema;

    struct MapSource(BTreeMap<String, String>);

    #[async_trait]
    impl DocumentSource for MapSource {
        async fn fetch(&self, source_id: &str) -> kb_harness_core::Result<String> {
            self.0
                .get(source_id)
                .cloned()
                .ok_or_else(|| Error::NotFound(source_id.to_string()))
        }

        async fn list(&self) -> kb_harness_core::Result<Vec<String>> {
            let mut ids: Vec<String> = self.0.keys().cloned().collect();
            ids.push("ghost.md".to_string());
            Ok(ids)
        }
    }

    fn config() -> Config {
        crate::config::parse_config(
            r#"
[db]
path = "unused.sqlite"

[embedding]
provider = "hashing"
dims = 32
"#,
        )
        .unwrap()
    }

    fn source() -> MapSource {
        MapSource(BTreeMap::from([
            ("a.md".to_string(), "Alpha one.\n\nAlpha two.".to_string()),
            ("b.md".to_string(), "Beta.".to_string()),
        ]))
    }

    #[tokio::test]
    async fn test_sync_source_fetch_failure_reports_stage() {
        let store = InMemoryStore::new(IndexSchema::new("hashing-32", 32));
        let embedder = HashingProvider::new(32);
        let err = sync_source(&store, &embedder, &source(), "missing.md", &config())
            .await
            .unwrap_err();
        assert_eq!(err.stage, SyncStage::Fetch);
        assert_eq!(err.source_id, "missing.md");
        assert!(matches!(err.source, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_sync_all_continues_past_failures() {
        let store = InMemoryStore::new(IndexSchema::new("hashing-32", 32));
        let embedder = HashingProvider::new(32);
        let report = sync_all(&store, &embedder, &source(), &config()).await.unwrap();

        assert_eq!(
            report.synced,
            vec![("a.md".to_string(), 2), ("b.md".to_string(), 1)]
        );
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].source_id, "ghost.md");
        assert_eq!(store.stats().await.unwrap().chunks, 3);
    }

    #[tokio::test]
    async fn test_file_is_indexed_under_one_id() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("launch.md"), "The launch is in June.").unwrap();
        let files = FileSource::new(tmp.path());
        let store = InMemoryStore::new(IndexSchema::new("hashing-32", 32));
        let embedder = HashingProvider::new(32);

        let err = sync_source(&store, &embedder, &files, "./launch.md", &config())
            .await
            .unwrap_err();
        assert_eq!(err.stage, SyncStage::Fetch);
        assert!(matches!(err.source, Error::InvalidInput(_)));

        sync_source(&store, &embedder, &files, "launch.md", &config())
            .await
            .unwrap();
        let ids: Vec<String> = store
            .list_sources()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.source_id)
            .collect();
        assert_eq!(ids, vec!["launch.md"]);
    }
}
