//! Configuration parsing and validation.
//!
//! KB Harness is configured via a TOML file (default: `config/kb.toml`).
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/kb.sqlite"
//!
//! [chunking]
//! max_chars = 800
//!
//! [retrieval]
//! lexical_weight = 0.3
//! semantic_weight = 0.7
//! top_k = 5
//! candidate_multiplier = 2
//! context_max_chars = 4000
//!
//! [embedding]
//! provider = "local"          # "local", "hashing", or "disabled"
//! model = "bge-small-en-v1.5"
//! dims = 384
//! batch_size = 64
//!
//! [source]
//! root = "./knowledge"
//! ```
//!
//! Only `[db]` is required; every other section falls back to the defaults
//! shown above.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use kb_harness_core::search::RetrievalParams;
use kb_harness_core::store::IndexSchema;

/// Top-level configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub source: SourceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file. Created if it does not exist.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Upper bound on chunk length, in characters.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    800
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    /// Results returned when the caller does not ask for a count.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Candidates fetched per signal, as a multiple of `top_k`.
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    /// Character budget for `kb context`.
    #[serde(default = "default_context_max_chars")]
    pub context_max_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            lexical_weight: default_lexical_weight(),
            semantic_weight: default_semantic_weight(),
            top_k: default_top_k(),
            candidate_multiplier: default_candidate_multiplier(),
            context_max_chars: default_context_max_chars(),
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            lexical_weight: self.lexical_weight,
            semantic_weight: self.semantic_weight,
            candidate_multiplier: self.candidate_multiplier,
        }
    }
}

fn default_lexical_weight() -> f64 {
    0.3
}
fn default_semantic_weight() -> f64 {
    0.7
}
fn default_top_k() -> usize {
    5
}
fn default_candidate_multiplier() -> usize {
    2
}
fn default_context_max_chars() -> usize {
    4000
}

/// Embedding provider settings.
///
/// `model` and `dims` are optional; each provider has its own defaults
/// (see [`EmbeddingConfig::schema`]).
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
        }
    }
}

pub const DEFAULT_LOCAL_MODEL: &str = "bge-small-en-v1.5";
pub const DEFAULT_LOCAL_DIMS: usize = 384;

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Model identity the index is stamped with for this provider.
    pub fn schema(&self) -> IndexSchema {
        match self.provider.as_str() {
            "hashing" => {
                let dims = self
                    .dims
                    .unwrap_or(kb_harness_core::embedding::HASHING_DEFAULT_DIMS);
                IndexSchema::new(&format!("hashing-{}", dims), dims)
            }
            "disabled" => IndexSchema::new("disabled", self.dims.unwrap_or(0)),
            _ => {
                let model = self.model.as_deref().unwrap_or(DEFAULT_LOCAL_MODEL);
                IndexSchema::new(model, self.dims.unwrap_or_else(|| local_model_dims(model)))
            }
        }
    }
}

/// Output dimension of the known local models.
fn local_model_dims(model: &str) -> usize {
    match model {
        "bge-base-en-v1.5" | "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
        "multilingual-e5-base" => 768,
        "bge-large-en-v1.5" | "multilingual-e5-large" => 1024,
        _ => DEFAULT_LOCAL_DIMS,
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// Directory that `source_id`s are resolved against.
    #[serde(default = "default_source_root")]
    pub root: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            root: default_source_root(),
        }
    }
}

fn default_source_root() -> PathBuf {
    PathBuf::from("./knowledge")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.max_chars == 0 {
        bail!("chunking.max_chars must be > 0");
    }

    // Validate retrieval
    let r = &config.retrieval;
    if r.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if r.candidate_multiplier < 1 {
        bail!("retrieval.candidate_multiplier must be >= 1");
    }
    for (name, w) in [
        ("lexical_weight", r.lexical_weight),
        ("semantic_weight", r.semantic_weight),
    ] {
        if !w.is_finite() || w < 0.0 {
            bail!("retrieval.{} must be a non-negative number", name);
        }
    }
    if r.lexical_weight + r.semantic_weight <= 0.0 {
        bail!("retrieval weights must not both be zero");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "hashing" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hashing, or local.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.dims == Some(0) {
        bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config("[db]\npath = \"kb.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.max_chars, 800);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.candidate_multiplier, 2);
        assert!((config.retrieval.lexical_weight - 0.3).abs() < 1e-9);
        assert!((config.retrieval.semantic_weight - 0.7).abs() < 1e-9);
        assert_eq!(config.embedding.provider, "local");
        assert_eq!(
            config.embedding.schema(),
            IndexSchema::new("bge-small-en-v1.5", 384)
        );
    }

    #[test]
    fn test_hashing_schema() {
        let config = parse_config(
            "[db]\npath = \"kb.sqlite\"\n[embedding]\nprovider = \"hashing\"\ndims = 64\n",
        )
        .unwrap();
        assert_eq!(config.embedding.schema(), IndexSchema::new("hashing-64", 64));
    }

    #[test]
    fn test_rejects_zero_max_chars() {
        let err = parse_config("[db]\npath = \"x\"\n[chunking]\nmax_chars = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_chars"));
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let err =
            parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_rejects_negative_weight() {
        let err = parse_config("[db]\npath = \"x\"\n[retrieval]\nlexical_weight = -0.1\n")
            .unwrap_err();
        assert!(err.to_string().contains("lexical_weight"));
    }

    #[test]
    fn test_local_dims_follow_model() {
        let config = parse_config(
            "[db]\npath = \"x\"\n[embedding]\nmodel = \"bge-base-en-v1.5\"\n",
        )
        .unwrap();
        assert_eq!(config.embedding.schema().dims, 768);
    }
}
