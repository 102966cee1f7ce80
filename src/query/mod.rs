// Query module
// Retrieves the closest chunks for a question and asks the language model

#[cfg(test)]
mod tests;

use tracing::{debug, info};

use crate::database::lancedb::{SearchResult, VectorStore};
use crate::embeddings::{Embedder, Generator};
use crate::{RagError, Result};

/// Chunks placed in the prompt when the caller does not choose
pub const DEFAULT_CHUNK_COUNT: usize = 4;

const INSTRUCTION: &str = "Use the following pieces of context to answer the question at the end. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.";

/// A stored chunk returned for a question
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub source: String,
    pub chunk_index: u32,
    pub page: Option<u32>,
    pub content: String,
    pub similarity_score: f32,
}

impl From<SearchResult> for RetrievedChunk {
    fn from(result: SearchResult) -> Self {
        Self {
            source: result.chunk.source,
            chunk_index: result.chunk.chunk_index,
            page: result.chunk.page,
            content: result.chunk.content,
            similarity_score: result.similarity_score,
        }
    }
}

impl RetrievedChunk {
    /// `source`, `source (page 3)` style label
    #[inline]
    pub fn location(&self) -> String {
        match self.page {
            Some(page) => format!("{} (page {})", self.source, page),
            None => self.source.clone(),
        }
    }
}

/// Generated answer along with the chunks it was grounded on
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<RetrievedChunk>,
}

impl Answer {
    /// Distinct source locations in retrieval order
    #[inline]
    pub fn source_locations(&self) -> Vec<String> {
        let mut locations: Vec<String> = Vec::new();
        for chunk in &self.sources {
            let location = chunk.location();
            if !locations.contains(&location) {
                locations.push(location);
            }
        }
        locations
    }
}

pub struct QueryEngine {
    store: VectorStore,
    embedder: Box<dyn Embedder>,
    generator: Box<dyn Generator>,
}

impl QueryEngine {
    #[inline]
    pub fn new(
        store: VectorStore,
        embedder: Box<dyn Embedder>,
        generator: Box<dyn Generator>,
    ) -> Self {
        Self {
            store,
            embedder,
            generator,
        }
    }

    /// Embed the question and return the `k` nearest chunks, closest first
    #[inline]
    pub async fn retrieve(&self, question: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidQuery("question cannot be empty".to_string()));
        }
        if k == 0 {
            return Err(RagError::InvalidQuery(
                "number of chunks must be at least 1".to_string(),
            ));
        }

        if self.store.count_embeddings().await? == 0 {
            return Err(RagError::EmptyStore);
        }

        let query_vector = self.embedder.embed_query(question)?;
        let results = self.store.search_similar(&query_vector, k).await?;
        debug!("Retrieved {} chunks for '{}'", results.len(), question);

        Ok(results.into_iter().map(RetrievedChunk::from).collect())
    }

    /// Retrieve context for the question and generate an answer from it
    #[inline]
    pub async fn ask(&self, question: &str, k: usize) -> Result<Answer> {
        let sources = self.retrieve(question, k).await?;
        let prompt = build_prompt(question.trim(), &sources);

        info!(
            "Asking {} with {} context chunks",
            self.generator.model_name(),
            sources.len()
        );
        let text = self.generator.generate(&prompt)?;

        Ok(Answer {
            text: text.trim().to_string(),
            sources,
        })
    }
}

/// Stuff every retrieved chunk into a single prompt ahead of the question
#[inline]
pub fn build_prompt(question: &str, chunks: &[RetrievedChunk]) -> String {
    let context = chunks
        .iter()
        .map(|chunk| chunk.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    format!("{INSTRUCTION}\n\n{context}\n\nQuestion: {question}\nHelpful Answer:")
}
