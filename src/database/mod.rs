// Database module
// Persistent vector storage for document chunks

pub mod lancedb;

pub use self::lancedb::{
    ChunkMetadata, EmbeddingRecord, FingerprintSpan, SearchResult, SourceSummary, VectorStore, record_id,
};
