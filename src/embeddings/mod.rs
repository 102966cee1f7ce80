// Embeddings module
// Remote embedding and generation providers plus document chunking

pub mod chunking;
pub mod gemini;
pub mod http;
pub mod ollama;

pub use chunking::{ChunkingConfig, TextChunk, chunk_document, split_text};
pub use gemini::GeminiClient;
pub use ollama::{ModelInfo, OllamaClient};

use crate::config::{Config, ProviderKind};
use crate::{RagError, Result};

/// Turns text into fixed-length vectors
pub trait Embedder: Send + Sync {
    /// Embed document chunks, one vector per input in the same order
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a search query
    fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    fn model_name(&self) -> &str;

    /// Verify the service is reachable and the model usable
    fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Produces an answer for a fully assembled prompt
pub trait Generator: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String>;

    fn model_name(&self) -> &str;
}

/// Build the embedder and generator for the configured provider.
///
/// `api_key` is only consulted for Gemini and must already be resolved.
#[inline]
pub fn build_providers(
    config: &Config,
    api_key: Option<String>,
) -> Result<(Box<dyn Embedder>, Box<dyn Generator>)> {
    match config.provider {
        ProviderKind::Gemini => {
            let api_key = api_key.ok_or_else(|| {
                RagError::Config(
                    "No Google API key found. Set GOOGLE_API_KEY or run 'doc-rag config'."
                        .to_string(),
                )
            })?;
            let client = GeminiClient::new(&config.gemini, api_key)
                .map_err(|e| RagError::Config(format!("{e:#}")))?;
            Ok((Box::new(client.clone()), Box::new(client)))
        }
        ProviderKind::Ollama => {
            let client = OllamaClient::new(&config.ollama)
                .map_err(|e| RagError::Config(format!("{e:#}")))?;
            Ok((Box::new(client.clone()), Box::new(client)))
        }
    }
}
