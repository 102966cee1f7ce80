// LanceDB vector database module
// Handles chunk storage and similarity search for embeddings


pub mod vector_store;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use vector_store::{FingerprintSpan, SearchResult, SourceSummary, VectorStore};

/// Chunk record stored in LanceDB
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingRecord {
    /// Deterministic identifier derived from source and chunk index
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// Everything stored alongside a chunk's vector
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMetadata {
    /// Document path relative to the documents directory
    pub source: String,
    /// Position of the chunk within its document
    pub chunk_index: u32,
    /// 1-based page for paginated documents
    pub page: Option<u32>,
    /// Character offset of the chunk within its page or document
    pub start_offset: u32,
    /// The chunk text
    pub content: String,
    /// Digest of the file and the parameters it was chunked and embedded with
    pub fingerprint: String,
    /// RFC 3339 timestamp of insertion
    pub created_at: String,
}

impl EmbeddingRecord {
    #[inline]
    pub fn new(vector: Vec<f32>, metadata: ChunkMetadata) -> Self {
        Self {
            id: record_id(&metadata.source, metadata.chunk_index),
            vector,
            metadata,
        }
    }
}

/// Stable record id for a (source, chunk index) pair
#[inline]
pub fn record_id(source: &str, chunk_index: u32) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        format!("{}#{}", source, chunk_index).as_bytes(),
    )
    .to_string()
}
