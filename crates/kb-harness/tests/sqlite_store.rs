use kb_harness::config::parse_config;
use kb_harness::db;
use kb_harness::ingest::rebuild;
use kb_harness::sqlite_store::SqliteStore;
use kb_harness_core::embedding::{EmbeddingProvider, HashingProvider};
use kb_harness_core::error::{Error, SyncStage};
use kb_harness_core::search::{RetrievalParams, Retriever};
use kb_harness_core::store::{IndexSchema, IndexStore};
use kb_harness_core::sync::sync_document;
use tempfile::TempDir;

const DIMS: usize = 16;

fn schema() -> IndexSchema {
    IndexSchema::new("hashing-16", DIMS)
}

async fn open(tmp: &TempDir, schema: IndexSchema) -> SqliteStore {
    let pool = db::connect_path(&tmp.path().join("kb.sqlite")).await.unwrap();
    SqliteStore::open(pool, schema).await.unwrap()
}

async fn ready_store(tmp: &TempDir) -> SqliteStore {
    let store = open(tmp, schema()).await;
    store.initialize().await.unwrap();
    store
}

async fn texts(store: &SqliteStore, source_id: &str) -> Vec<String> {
    let snap = store.snapshot().await.unwrap();
    let mut hits = snap
        .vector_search(&[0.0; DIMS], 100, Some(source_id))
        .await
        .unwrap();
    hits.sort_by_key(|h| h.ordinal);
    let mut out = Vec::new();
    for h in hits {
        out.push(snap.get_chunk(&h.chunk_id).await.unwrap().text);
    }
    out
}

#[tokio::test]
async fn test_uninitialized_index() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp, schema()).await;

    assert!(matches!(
        store.snapshot().await,
        Err(Error::NotInitialized(_))
    ));

    let embedder = HashingProvider::new(DIMS);
    let retriever = Retriever::new(&store, &embedder, RetrievalParams::default());
    assert!(retriever.retrieve("anything", 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_initialize_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let store = ready_store(&tmp).await;
    store.initialize().await.unwrap();
    assert_eq!(store.stats().await.unwrap().documents, 0);
}

#[tokio::test]
async fn test_sync_and_search() {
    let tmp = TempDir::new().unwrap();
    let store = ready_store(&tmp).await;
    let embedder = HashingProvider::new(DIMS);

    sync_document(
        &store,
        &embedder,
        "pets.md",
        "Cats sleep all day.\n\nDogs chase balls in the park.\n\nBirds sing at dawn.",
        800,
    )
    .await
    .unwrap();

    let snap = store.snapshot().await.unwrap();
    let lexical = snap.lexical_search("dogs park", 10, None).await.unwrap();
    assert_eq!(lexical.len(), 1);
    assert_eq!(lexical[0].ordinal, 1);
    assert!(lexical[0].raw_score > 0.0);
    assert_eq!(snap.chunk_count(Some("pets.md")).await.unwrap(), 3);

    let query_vec = embedder.embed("dogs chase balls in the park").await.unwrap();
    let semantic = snap.vector_search(&query_vec, 1, None).await.unwrap();
    assert_eq!(semantic[0].chunk_id, lexical[0].chunk_id);

    assert!(matches!(
        snap.get_chunk("no-such-chunk").await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_failed_write_keeps_previous_set() {
    let tmp = TempDir::new().unwrap();
    let store = ready_store(&tmp).await;
    let embedder = HashingProvider::new(DIMS);

    sync_document(&store, &embedder, "doc", "first version\n\nstill first", 800)
        .await
        .unwrap();

    sqlx::query(
        "CREATE TRIGGER poison BEFORE INSERT ON chunks WHEN NEW.text = 'poison' \
         BEGIN SELECT RAISE(ABORT, 'poisoned chunk'); END",
    )
    .execute(store.pool())
    .await
    .unwrap();

    let err = sync_document(&store, &embedder, "doc", "second version\n\npoison", 800)
        .await
        .unwrap_err();
    assert_eq!(err.stage, SyncStage::Store);
    assert!(matches!(err.source, Error::Storage(_)));

    assert_eq!(texts(&store, "doc").await, vec!["first version", "still first"]);
    assert_eq!(
        store.get_document("doc").await.unwrap().text,
        "first version\n\nstill first"
    );
    let snap = store.snapshot().await.unwrap();
    assert!(snap.lexical_search("second", 10, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_snapshot_does_not_see_later_writes() {
    let tmp = TempDir::new().unwrap();
    let store = ready_store(&tmp).await;
    let embedder = HashingProvider::new(DIMS);

    sync_document(&store, &embedder, "doc", "old text", 800).await.unwrap();
    let before = store.snapshot().await.unwrap();

    sync_document(&store, &embedder, "doc", "new text\n\nmore new text", 800)
        .await
        .unwrap();

    assert_eq!(before.chunk_count(None).await.unwrap(), 1);
    assert_eq!(before.lexical_search("old", 10, None).await.unwrap().len(), 1);
    assert!(before.lexical_search("new", 10, None).await.unwrap().is_empty());
    drop(before);

    let after = store.snapshot().await.unwrap();
    assert_eq!(after.chunk_count(None).await.unwrap(), 2);
    assert!(after.lexical_search("old", 10, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_model_change_requires_reset() {
    let tmp = TempDir::new().unwrap();
    {
        let store = ready_store(&tmp).await;
        sync_document(&store, &HashingProvider::new(DIMS), "doc", "text", 800)
            .await
            .unwrap();
        store.close().await;
    }

    let other = IndexSchema::new("hashing-32", 32);
    let store = open(&tmp, other.clone()).await;
    assert!(matches!(store.snapshot().await, Err(Error::SchemaMismatch(_))));
    assert!(matches!(store.initialize().await, Err(Error::SchemaMismatch(_))));

    let err = sync_document(&store, &HashingProvider::new(32), "doc", "text", 800)
        .await
        .unwrap_err();
    assert!(matches!(err.source, Error::SchemaMismatch(_)));

    // Text survives for a rebuild.
    assert_eq!(store.stored_documents().await.unwrap().len(), 1);

    store.reset(&other).await.unwrap();
    assert_eq!(store.schema(), other);
    let stats = store.stats().await.unwrap();
    assert_eq!((stats.documents, stats.chunks, stats.dims), (0, 0, 32));
}

#[tokio::test]
async fn test_remove_and_list_sources() {
    let tmp = TempDir::new().unwrap();
    let store = ready_store(&tmp).await;
    let embedder = HashingProvider::new(DIMS);

    sync_document(&store, &embedder, "b.md", "Beta.", 800).await.unwrap();
    sync_document(&store, &embedder, "a.md", "Alpha.\n\nAgain.", 800)
        .await
        .unwrap();

    let sources = store.list_sources().await.unwrap();
    let rows: Vec<(&str, i64, i64)> = sources
        .iter()
        .map(|s| (s.source_id.as_str(), s.chunk_count, s.char_len))
        .collect();
    assert_eq!(rows, vec![("a.md", 2, 14), ("b.md", 1, 5)]);

    assert!(store.remove_source("a.md").await.unwrap());
    assert!(!store.remove_source("a.md").await.unwrap());
    let stats = store.stats().await.unwrap();
    assert_eq!((stats.documents, stats.chunks, stats.vectors), (1, 1, 1));
    assert!(matches!(
        store.get_document("a.md").await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_wrong_dims_rejected_before_write() {
    let tmp = TempDir::new().unwrap();
    let store = ready_store(&tmp).await;
    let doc = kb_harness_core::models::Document::new("doc", "x");
    let chunk = kb_harness_core::models::Chunk::from_text_chunk(
        "doc",
        kb_harness_core::models::TextChunk {
            ordinal: 0,
            text: "x".to_string(),
            span: 0..1,
        },
    );
    let err = store
        .replace_source(&doc, &[chunk], &[vec![0.0; 3]])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SchemaMismatch(_)));
    assert!(store.list_sources().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_rebuild_keeps_every_document() {
    let tmp = TempDir::new().unwrap();
    let store = ready_store(&tmp).await;
    let embedder = HashingProvider::new(DIMS);

    sync_document(&store, &embedder, "a.md", "Alpha text.", 800).await.unwrap();
    sync_document(&store, &embedder, "b.md", "Beta text.\n\npoison", 800)
        .await
        .unwrap();

    sqlx::query(
        "CREATE TRIGGER poison BEFORE INSERT ON chunks WHEN NEW.text = 'poison' \
         BEGIN SELECT RAISE(ABORT, 'poisoned chunk'); END",
    )
    .execute(store.pool())
    .await
    .unwrap();

    let config = parse_config(
        "[db]\npath = \"unused\"\n[embedding]\nprovider = \"hashing\"\ndims = 32\n",
    )
    .unwrap();
    assert!(rebuild(&store, &HashingProvider::new(32), &config).await.is_err());

    // Old index, old schema, every source intact.
    assert_eq!(store.schema(), schema());
    let ids: Vec<String> = store
        .list_sources()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.source_id)
        .collect();
    assert_eq!(ids, vec!["a.md", "b.md"]);
    assert_eq!(texts(&store, "b.md").await, vec!["Beta text.", "poison"]);
    assert_eq!(store.stats().await.unwrap().vectors, 3);
}

#[tokio::test]
async fn test_rebuild_switches_model() {
    let tmp = TempDir::new().unwrap();
    let store = ready_store(&tmp).await;
    sync_document(&store, &HashingProvider::new(DIMS), "a.md", "One.\n\nTwo.", 800)
        .await
        .unwrap();

    let config = parse_config(
        "[db]\npath = \"unused\"\n[embedding]\nprovider = \"hashing\"\ndims = 32\n",
    )
    .unwrap();
    assert_eq!(
        rebuild(&store, &HashingProvider::new(32), &config).await.unwrap(),
        1
    );

    let stats = store.stats().await.unwrap();
    assert_eq!((stats.model.as_str(), stats.dims), ("hashing-32", 32));
    assert_eq!((stats.documents, stats.chunks, stats.vectors), (1, 2, 2));
}
