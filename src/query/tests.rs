use super::*;
use crate::database::lancedb::{ChunkMetadata, EmbeddingRecord};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Maps known phrases to fixed directions
struct KeywordEmbedder;

impl Embedder for KeywordEmbedder {
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(keyword_vector(text))
    }

    fn model_name(&self) -> &str {
        "keywords"
    }
}

fn keyword_vector(text: &str) -> Vec<f32> {
    let text = text.to_lowercase();
    vec![
        if text.contains("rust") { 1.0 } else { 0.0 },
        if text.contains("python") { 1.0 } else { 0.0 },
        if text.contains("cooking") { 1.0 } else { 0.0 },
        0.1,
    ]
}

/// Records every prompt it receives and answers with a fixed reply
struct RecordingGenerator {
    prompts: Arc<Mutex<Vec<String>>>,
}

impl Generator for RecordingGenerator {
    fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .expect("lock is not poisoned")
            .push(prompt.to_string());
        Ok("  Rust is a systems language.\n".to_string())
    }

    fn model_name(&self) -> &str {
        "recorder"
    }
}

struct FailingGenerator;

impl Generator for FailingGenerator {
    fn generate(&self, _prompt: &str) -> Result<String> {
        Err(RagError::Generation("quota exhausted".to_string()))
    }

    fn model_name(&self) -> &str {
        "failing"
    }
}

fn chunk(source: &str, chunk_index: u32, content: &str) -> EmbeddingRecord {
    EmbeddingRecord::new(
        keyword_vector(content),
        ChunkMetadata {
            source: source.to_string(),
            chunk_index,
            page: None,
            start_offset: 0,
            content: content.to_string(),
            fingerprint: "sha256:test".to_string(),
            created_at: "2025-01-01T00:00:00Z".to_string(),
        },
    )
}

async fn populated_store(temp_dir: &TempDir) -> VectorStore {
    let mut store = VectorStore::open(&temp_dir.path().join("vectors"))
        .await
        .expect("should open store");
    store
        .upsert_records(&[
            chunk("rust.txt", 0, "Rust has ownership and borrowing."),
            chunk("python.txt", 0, "Python uses indentation."),
            chunk("food.txt", 0, "Cooking pasta takes ten minutes."),
            chunk("both.txt", 0, "Rust and Python interoperate via PyO3."),
            chunk("rust.txt", 1, "Rust compiles to native code."),
        ])
        .await
        .expect("upsert works");
    store
}

fn engine(store: VectorStore) -> (QueryEngine, Arc<Mutex<Vec<String>>>) {
    let prompts = Arc::new(Mutex::new(Vec::new()));
    let engine = QueryEngine::new(
        store,
        Box::new(KeywordEmbedder),
        Box::new(RecordingGenerator {
            prompts: Arc::clone(&prompts),
        }),
    );
    (engine, prompts)
}

#[tokio::test]
async fn retrieve_returns_k_results_closest_first() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let (engine, _) = engine(populated_store(&temp_dir).await);

    let results = engine
        .retrieve("What is Rust?", 3)
        .await
        .expect("retrieval works");

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].source, "rust.txt");
    assert_eq!(results[1].source, "rust.txt");
    assert_eq!(results[2].source, "both.txt");
    for pair in results.windows(2) {
        assert!(pair[0].similarity_score >= pair[1].similarity_score);
    }
}

#[tokio::test]
async fn retrieve_caps_at_store_size() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let (engine, _) = engine(populated_store(&temp_dir).await);

    let results = engine
        .retrieve("rust", 50)
        .await
        .expect("retrieval works");
    assert_eq!(results.len(), 5);
}

#[tokio::test]
async fn empty_store_is_reported() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = VectorStore::open(&temp_dir.path().join("vectors"))
        .await
        .expect("should open store");
    let (engine, prompts) = engine(store);

    let result = engine.ask("What is Rust?", 3).await;

    assert!(matches!(result, Err(RagError::EmptyStore)));
    assert!(prompts.lock().expect("lock is not poisoned").is_empty());
}

#[tokio::test]
async fn blank_question_and_zero_k_are_rejected() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let (engine, _) = engine(populated_store(&temp_dir).await);

    assert!(matches!(
        engine.retrieve("   ", 3).await,
        Err(RagError::InvalidQuery(_))
    ));
    assert!(matches!(
        engine.retrieve("rust", 0).await,
        Err(RagError::InvalidQuery(_))
    ));
}

#[tokio::test]
async fn ask_sends_context_and_question() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let (engine, prompts) = engine(populated_store(&temp_dir).await);

    let answer = engine.ask("  Tell me about cooking ", 1).await.expect("ask works");

    assert_eq!(answer.text, "Rust is a systems language.");
    assert_eq!(answer.sources.len(), 1);
    assert_eq!(answer.sources[0].source, "food.txt");

    let prompts = prompts.lock().expect("lock is not poisoned");
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0], build_prompt("Tell me about cooking", &answer.sources));
}

#[tokio::test]
async fn generation_failure_is_propagated() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let engine = QueryEngine::new(
        populated_store(&temp_dir).await,
        Box::new(KeywordEmbedder),
        Box::new(FailingGenerator),
    );

    let result = engine.ask("rust", 2).await;
    assert!(matches!(result, Err(RagError::Generation(_))));
}

fn retrieved(source: &str, page: Option<u32>, content: &str) -> RetrievedChunk {
    RetrievedChunk {
        source: source.to_string(),
        chunk_index: 0,
        page,
        content: content.to_string(),
        similarity_score: 0.5,
    }
}

#[test]
fn prompt_stuffs_context_before_question() {
    let chunks = vec![
        retrieved("a.txt", None, "First piece."),
        retrieved("b.txt", None, "Second piece."),
    ];

    let prompt = build_prompt("What now?", &chunks);

    assert_eq!(
        prompt,
        "Use the following pieces of context to answer the question at the end. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\n\
First piece.\n\nSecond piece.\n\nQuestion: What now?\nHelpful Answer:"
    );
}

#[test]
fn source_locations_are_deduplicated_in_order() {
    let answer = Answer {
        text: String::new(),
        sources: vec![
            retrieved("guide.pdf", Some(2), "x"),
            retrieved("notes.txt", None, "y"),
            retrieved("guide.pdf", Some(2), "z"),
            retrieved("guide.pdf", Some(5), "w"),
        ],
    };

    assert_eq!(
        answer.source_locations(),
        vec!["guide.pdf (page 2)", "notes.txt", "guide.pdf (page 5)"]
    );
}
