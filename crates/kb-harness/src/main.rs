//! # KB Harness CLI (`kb`)
//!
//! The `kb` binary syncs documents into the local index and retrieves
//! grounding context for post generation.
//!
//! ## Usage
//!
//! ```bash
//! kb --config ./config/kb.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kb init` | Create the database and stamp it with the embedding model |
//! | `kb sync <source_id>` | Re-index one document from the source root |
//! | `kb sync --all` | Re-index every document under the source root |
//! | `kb search "<query>"` | Hybrid search over indexed chunks |
//! | `kb context "<query>"` | Print retrieved chunks as a prompt context block |
//! | `kb get <chunk_id>` | Print one chunk (or `--source` for a document) |
//! | `kb sources` | List indexed sources |
//! | `kb stats` | Index statistics |
//! | `kb remove <source_id>` | Delete a source from the index |
//! | `kb rebuild` | Re-embed everything after an embedding model change |
//!
//! Logs go to stderr and are filtered with `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use kb_harness::{config, db, get, ingest, search, sources, stats};

/// KB Harness CLI: local retrieval of grounding context for generated posts.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kb.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "kb",
    about = "KB Harness: local hybrid retrieval for grounded post generation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kb.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and stamp the embedding model.
    ///
    /// Idempotent. Fails if the index was built with a different model;
    /// run `kb rebuild` in that case.
    Init,

    /// Fetch, chunk, embed, and store documents from the source root.
    ///
    /// Each source is replaced atomically; a failure leaves its previous
    /// contents in place and is reported with the stage it failed at.
    Sync {
        /// Source id (path relative to `[source].root`).
        source_id: Option<String>,

        /// Sync every `.md` and `.txt` file under the source root.
        #[arg(long)]
        all: bool,
    },

    /// Search indexed chunks (BM25 + cosine, weighted).
    Search {
        /// The search query string.
        query: String,

        /// Only return chunks from this source id.
        #[arg(long)]
        source: Option<String>,

        /// Maximum number of results (default: `retrieval.top_k`).
        #[arg(long)]
        limit: Option<usize>,

        /// Show the lexical and semantic score behind each result.
        #[arg(long)]
        explain: bool,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print retrieved chunks as a numbered context block for a prompt.
    Context {
        query: String,

        #[arg(long)]
        limit: Option<usize>,

        /// Character budget (default: `retrieval.context_max_chars`).
        #[arg(long)]
        max_chars: Option<usize>,
    },

    /// Retrieve a chunk by id.
    Get {
        /// Chunk UUID, or a source id with `--source`.
        id: String,

        /// Treat `id` as a source id and print the stored document.
        #[arg(long)]
        source: bool,

        #[arg(long)]
        json: bool,
    },

    /// List indexed sources.
    Sources,

    /// Show index statistics.
    Stats,

    /// Delete a source and all its chunks from the index.
    Remove { source_id: String },

    /// Re-chunk and re-embed every stored document with the configured model.
    Rebuild,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            db::init_index(&cfg).await?;
            println!("Index initialized successfully.");
        }
        Commands::Sync { source_id, all } => {
            ingest::run_sync(&cfg, source_id.as_deref(), all).await?;
        }
        Commands::Search {
            query,
            source,
            limit,
            explain,
            json,
        } => {
            search::run_search(&cfg, &query, source, limit, explain, json).await?;
        }
        Commands::Context {
            query,
            limit,
            max_chars,
        } => {
            search::run_context(&cfg, &query, limit, max_chars).await?;
        }
        Commands::Get { id, source, json } => {
            get::run_get(&cfg, &id, source, json).await?;
        }
        Commands::Sources => {
            sources::list_sources(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Remove { source_id } => {
            sources::run_remove(&cfg, &source_id).await?;
        }
        Commands::Rebuild => {
            ingest::run_rebuild(&cfg).await?;
        }
    }

    Ok(())
}
