//! Indexed source listing and removal.
//!
//! `kb sources` reports what is in the index (one row per synced source),
//! together with the documents the configured source root offers that have
//! never been synced.

use anyhow::Result;

use kb_harness_core::store::{IndexStore, SourceSummary};

use crate::config::Config;
use crate::db;
use crate::source::{DocumentSource, FileSource};
use crate::stats::format_ts_relative;

/// Summaries of every indexed source, ordered by `source_id`.
pub async fn get_sources(config: &Config) -> Result<Vec<SourceSummary>> {
    let store = db::open_store(config).await?;
    let result = store.list_sources().await;
    store.close().await;
    Ok(result?)
}

/// CLI entry point for `kb sources`.
pub async fn list_sources(config: &Config) -> Result<()> {
    let sources = get_sources(config).await?;

    println!(
        "{:<40} {:>7} {:>9}   SYNCED",
        "SOURCE", "CHUNKS", "CHARS"
    );
    for s in &sources {
        println!(
            "{:<40} {:>7} {:>9}   {}",
            s.source_id,
            s.chunk_count,
            s.char_len,
            format_ts_relative(s.synced_at)
        );
    }

    // Documents under the source root that were never synced.
    let available = match FileSource::new(&config.source.root).list().await {
        Ok(ids) => ids,
        Err(e) => {
            tracing::debug!("source root not listable: {}", e);
            Vec::new()
        }
    };
    let pending: Vec<&String> = available
        .iter()
        .filter(|id| sources.binary_search_by(|s| s.source_id.cmp(*id)).is_err())
        .collect();
    if !pending.is_empty() {
        println!();
        println!("Not yet synced ({}):", pending.len());
        for id in pending {
            println!("  {}", id);
        }
    }

    Ok(())
}

/// CLI entry point for `kb remove <source_id>`.
pub async fn run_remove(config: &Config, source_id: &str) -> Result<()> {
    let store = db::open_store(config).await?;
    let removed = store.remove_source(source_id).await;
    store.close().await;

    if removed? {
        println!("Removed {}.", source_id);
    } else {
        println!("{} is not indexed.", source_id);
    }
    Ok(())
}
