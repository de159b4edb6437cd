//! Chunk and document lookup.
//!
//! `kb get <chunk_id>` prints one chunk as returned by `kb search`;
//! `kb get --source <source_id>` prints the stored document text.
//!
//! # Usage
//!
//! ```bash
//! kb get 550e8400-e29b-41d4-a716-446655440000
//! kb get --source notes/launch.md
//! ```

use anyhow::Result;

use kb_harness_core::models::{Chunk, Document};
use kb_harness_core::store::IndexStore;

use crate::config::Config;
use crate::db;

/// Fetch a chunk by id from a fresh snapshot.
pub async fn get_chunk(config: &Config, chunk_id: &str) -> Result<Chunk> {
    let store = db::open_store(config).await?;
    let result = match store.snapshot().await {
        Ok(snapshot) => snapshot.get_chunk(chunk_id).await,
        Err(e) => Err(e),
    };
    store.close().await;
    Ok(result?)
}

/// Fetch the stored text of a source.
pub async fn get_document(config: &Config, source_id: &str) -> Result<Document> {
    let store = db::open_store(config).await?;
    let result = store.get_document(source_id).await;
    store.close().await;
    Ok(result?)
}

/// CLI entry point for `kb get`.
pub async fn run_get(config: &Config, id: &str, by_source: bool, json: bool) -> Result<()> {
    if by_source {
        let doc = get_document(config, id).await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&doc)?);
            return Ok(());
        }
        println!("--- Document ---");
        println!("source_id:  {}", doc.source_id);
        println!("synced_at:  {}", crate::stats::format_ts_iso(doc.synced_at));
        println!();
        println!("{}", doc.text);
        return Ok(());
    }

    let chunk = get_chunk(config, id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&chunk)?);
        return Ok(());
    }

    println!("--- Chunk ---");
    println!("id:         {}", chunk.id);
    println!("source_id:  {}", chunk.source_id);
    println!("ordinal:    {}", chunk.ordinal);
    println!("chars:      {}", chunk.char_len);
    println!("span:       {}..{}", chunk.span_start, chunk.span_end);
    println!();
    println!("{}", chunk.text);

    Ok(())
}
