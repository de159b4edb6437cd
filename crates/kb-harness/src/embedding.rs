//! Embedding provider construction and the local fastembed model.
//!
//! The provider trait, [`DisabledProvider`], [`HashingProvider`], and the
//! vector helpers live in `kb-harness-core`; this module adds the
//! in-process ONNX model and picks a provider from configuration.
//!
//! # Supported Providers
//!
//! | Config Value | Provider |
//! |-------------|----------|
//! | `"local"` | [`LocalProvider`] (feature `local-embeddings-fastembed`) |
//! | `"hashing"` | [`HashingProvider`] |
//! | `"disabled"` | [`DisabledProvider`] |

use anyhow::{bail, Result};

pub use kb_harness_core::embedding::{DisabledProvider, EmbeddingProvider, HashingProvider};

use crate::config::EmbeddingConfig;

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// # Errors
///
/// Returns an error for unknown provider names or models, or when the
/// `local` provider is requested without the fastembed feature.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "hashing" => Ok(Box::new(HashingProvider::new(config.schema().dims))),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Box::new(local::LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!(
            "Local embedding provider requires --features local-embeddings-fastembed"
        ),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalProvider;

#[cfg(feature = "local-embeddings-fastembed")]
mod local {
    use std::sync::{Arc, Mutex};

    use anyhow::bail;
    use async_trait::async_trait;
    use tracing::info;

    use kb_harness_core::embedding::EmbeddingProvider;
    use kb_harness_core::error::{Error, Result};

    use crate::config::EmbeddingConfig;

    /// Embedding provider for local inference via fastembed.
    ///
    /// The model is downloaded from Hugging Face on first use and cached;
    /// after that, embeddings run entirely offline. It is loaded once per
    /// provider and reused for every call.
    pub struct LocalProvider {
        model_name: String,
        dims: usize,
        batch_size: usize,
        fastembed_model: fastembed::EmbeddingModel,
        model: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
    }

    impl LocalProvider {
        pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
            let schema = config.schema();
            let fastembed_model = config_to_fastembed_model(&schema.model)?;
            Ok(Self {
                model_name: schema.model,
                dims: schema.dims,
                batch_size: config.batch_size,
                fastembed_model,
                model: Arc::new(Mutex::new(None)),
            })
        }
    }

    fn config_to_fastembed_model(name: &str) -> anyhow::Result<fastembed::EmbeddingModel> {
        match name {
            "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
            "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
            "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
            "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
            "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
            "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
            other => bail!(
                "Unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
                 nomic-embed-text-v1, nomic-embed-text-v1.5, \
                 multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
                other
            ),
        }
    }

    #[async_trait]
    impl EmbeddingProvider for LocalProvider {
        fn model_name(&self) -> &str {
            &self.model_name
        }
        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }

            let slot = Arc::clone(&self.model);
            let fastembed_model = self.fastembed_model.clone();
            let model_name = self.model_name.clone();
            let batch_size = self.batch_size;
            let texts = texts.to_vec();

            let embeddings = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                let mut slot = slot.lock().map_err(|_| {
                    Error::EmbeddingUnavailable("local model lock poisoned".to_string())
                })?;
                if slot.is_none() {
                    info!(model = %model_name, "loading local embedding model");
                    let loaded = fastembed::TextEmbedding::try_new(
                        fastembed::InitOptions::new(fastembed_model)
                            .with_show_download_progress(false),
                    )
                    .map_err(|e| {
                        Error::EmbeddingUnavailable(format!(
                            "Failed to initialize local embedding model: {}",
                            e
                        ))
                    })?;
                    *slot = Some(loaded);
                }
                let model = slot.as_mut().ok_or_else(|| {
                    Error::EmbeddingUnavailable("local model not loaded".to_string())
                })?;

                model
                    .embed(texts, Some(batch_size))
                    .map_err(|e| Error::EmbeddingUnavailable(format!("Local embedding failed: {}", e)))
            })
            .await
            .map_err(|e| Error::EmbeddingUnavailable(format!("embedding task failed: {}", e)))??;

            if let Some(bad) = embeddings.iter().find(|v| v.len() != self.dims) {
                return Err(Error::EmbeddingUnavailable(format!(
                    "model '{}' returned {} dims, expected {}",
                    self.model_name,
                    bad.len(),
                    self.dims
                )));
            }
            Ok(embeddings)
        }
    }
}
