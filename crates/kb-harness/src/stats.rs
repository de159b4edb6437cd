//! Index statistics and health overview.
//!
//! A quick summary of what's indexed: document, chunk, and vector counts,
//! the embedding model the index is stamped with, and the largest sources.
//! Used by `kb stats` to confirm that syncs are landing.

use anyhow::Result;

use kb_harness_core::store::IndexStore;

use crate::config::Config;
use crate::db;

/// Rows shown in the per-source breakdown.
const TOP_SOURCES: usize = 10;

/// Run the stats command: query the index and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = db::open_store(config).await?;
    let stats = store.stats().await;
    let sources = store.list_sources().await;
    store.close().await;
    let (stats, mut sources) = (stats?, sources?);

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("KB Harness - Index Stats");
    println!("========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Model:       {} ({} dims)", stats.model, stats.dims);
    println!();
    println!("  Documents:   {}", stats.documents);
    println!("  Chunks:      {}", stats.chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        stats.vectors,
        stats.chunks,
        if stats.chunks > 0 {
            (stats.vectors * 100) / stats.chunks
        } else {
            0
        }
    );

    if !sources.is_empty() {
        sources.sort_by(|a, b| {
            b.chunk_count
                .cmp(&a.chunk_count)
                .then_with(|| a.source_id.cmp(&b.source_id))
        });
        println!();
        println!("  Largest sources:");
        println!("  {:<40} {:>8}   {}", "SOURCE", "CHUNKS", "LAST SYNC");
        println!("  {}", "-".repeat(68));
        for s in sources.iter().take(TOP_SOURCES) {
            println!(
                "  {:<40} {:>8}   {}",
                s.source_id,
                s.chunk_count,
                format_ts_relative(s.synced_at)
            );
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp relative to now (e.g. "3 hours ago").
pub fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    let plural = |n: i64, unit: &str| format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" });
    match delta {
        0..=59 => "just now".to_string(),
        60..=3599 => plural(delta / 60, "min"),
        3600..=86_399 => plural(delta / 3600, "hour"),
        86_400..=2_591_999 => plural(delta / 86_400, "day"),
        _ => format_ts_iso(ts),
    }
}

pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
