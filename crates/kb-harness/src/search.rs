//! Hybrid retrieval from the command line.
//!
//! The ranking algorithm (normalization, weighted merge, deterministic
//! ordering) lives in `kb_harness_core::search` and runs against the
//! [`IndexStore`] trait. This wrapper opens the SQLite index, builds the
//! configured embedder, and formats results for `kb search` and
//! `kb context`.

use anyhow::Result;

use kb_harness_core::context::format_context;
pub use kb_harness_core::search::{RetrievalParams, Retriever, ScoredResult};
use kb_harness_core::store::IndexStore;

use crate::config::Config;
use crate::db;
use crate::embedding;

/// Retrieve the best chunks for `query`, optionally from one source.
///
/// `limit` defaults to `retrieval.top_k`. An uninitialised index yields no
/// results rather than an error.
pub async fn search_chunks(
    config: &Config,
    query: &str,
    source_filter: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<ScoredResult>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let store = db::open_store(config).await?;
    let embedder = embedding::create_provider(&config.embedding)?;
    let results = retrieve(&store, embedder.as_ref(), config, query, source_filter, limit).await;
    store.close().await;
    Ok(results?)
}

async fn retrieve(
    store: &dyn IndexStore,
    embedder: &dyn embedding::EmbeddingProvider,
    config: &Config,
    query: &str,
    source_filter: Option<&str>,
    limit: Option<usize>,
) -> kb_harness_core::Result<Vec<ScoredResult>> {
    let retriever = Retriever::new(store, embedder, config.retrieval.params());
    let top_k = limit.unwrap_or(config.retrieval.top_k);
    match source_filter {
        Some(source_id) => retriever.retrieve_from(source_id, query, top_k).await,
        None => retriever.retrieve(query, top_k).await,
    }
}

/// CLI entry point for `kb search`.
pub async fn run_search(
    config: &Config,
    query: &str,
    source_filter: Option<String>,
    limit: Option<usize>,
    explain: bool,
    json: bool,
) -> Result<()> {
    let results = search_chunks(config, query, source_filter.as_deref(), limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    if explain {
        let params = config.retrieval.params();
        println!(
            "Search: lexical_weight={:.2}, semantic_weight={:.2}, candidates per signal: {}",
            params.lexical_weight,
            params.semantic_weight,
            limit.unwrap_or(config.retrieval.top_k) * params.candidate_multiplier.max(1)
        );
        println!();
    }

    for (i, result) in results.iter().enumerate() {
        let chunk = &result.chunk;
        println!(
            "{}. [{:.2}] {} #{}",
            i + 1,
            result.combined_score,
            chunk.source_id,
            chunk.ordinal
        );
        if explain {
            println!(
                "    scoring: lexical={:.3}  semantic={:.3}  -> combined={:.3}",
                result.lexical_score, result.semantic_score, result.combined_score
            );
        }
        println!("    excerpt: \"{}\"", excerpt(&chunk.text, 160));
        println!("    id: {}", chunk.id);
        println!();
    }

    Ok(())
}

/// CLI entry point for `kb context`: print retrieved chunks as a prompt
/// context block.
pub async fn run_context(
    config: &Config,
    query: &str,
    limit: Option<usize>,
    max_chars: Option<usize>,
) -> Result<()> {
    let results = search_chunks(config, query, None, limit).await?;
    let budget = max_chars.unwrap_or(config.retrieval.context_max_chars);
    println!("{}", format_context(&results, budget));
    Ok(())
}

/// Single-line preview of `text`, cut at `max` characters.
fn excerpt(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let cut: String = flat.chars().take(max).collect();
    format!("{}...", cut.trim_end())
}
