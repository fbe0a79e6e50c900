// Embeddings module
// Text-to-vector strategies, similarity math, and document chunking

pub mod chunking;
pub mod hashed;
pub mod ollama;
pub mod similarity;

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::config::{EmbeddingConfig, EmbeddingStrategy};
use crate::{RagError, Result};

pub use chunking::{Chunk, ChunkingConfig, Chunks, TextChunker};
pub use hashed::HashedEmbedder;
pub use ollama::OllamaEmbedder;
pub use similarity::{cosine_similarity, dot, ensure_dimension, l2_normalize};

/// A fixed-length embedding. Every vector produced by one model has the same length.
pub type EmbeddingVector = Vec<f32>;

/// Maps text to a fixed-length vector.
///
/// Implementations must be deterministic for a given configuration and must return
/// the zero vector of [`EmbeddingModel::dimension`] for empty or whitespace-only
/// input. Failures are reported as errors rather than substituted with a zero
/// vector, so callers can tell "legitimately empty" from "failed".
pub trait EmbeddingModel: Send + Sync {
    /// Length of every vector this model produces
    fn dimension(&self) -> usize;

    /// Short label used in statistics and logs
    fn name(&self) -> String;

    fn embed(&self, text: &str) -> Result<EmbeddingVector>;

    /// Embed several texts, one vector per input in input order.
    /// Backends with a batch endpoint override this.
    #[inline]
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }

    /// Verify the model can serve requests. Local models are always ready.
    #[inline]
    fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Build the embedding model selected by the configuration
#[inline]
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingModel>> {
    config
        .validate()
        .map_err(|e| RagError::Configuration(e.to_string()))?;

    let dimension = config.dimension as usize;
    let embedder: Arc<dyn EmbeddingModel> = match config.strategy {
        EmbeddingStrategy::Hashed => Arc::new(HashedEmbedder::new(dimension)?),
        EmbeddingStrategy::Ollama => Arc::new(
            OllamaEmbedder::new(config).context("Failed to initialize Ollama embedder")?,
        ),
    };

    info!(
        "Using {} embeddings with {} dimensions",
        embedder.name(),
        embedder.dimension()
    );
    Ok(embedder)
}
