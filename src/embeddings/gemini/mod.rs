
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::http::HttpClient;
use super::{Embedder, Generator};
use crate::RagError;
use crate::config::GeminiConfig;

const EMBEDDING_TIMEOUT_SECONDS: u64 = 30;
const GENERATION_TIMEOUT_SECONDS: u64 = 120;
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Client for the Google Generative Language REST API
#[derive(Debug, Clone)]
pub struct GeminiClient {
    base_url: Url,
    api_key: String,
    embedding_model: String,
    generation_model: String,
    batch_size: u32,
    http: HttpClient,
    generation_http: HttpClient,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: Content<'a>,
    task_type: &'static str,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: ContentEmbedding,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum TaskType {
    Document,
    Query,
}

impl TaskType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Document => "RETRIEVAL_DOCUMENT",
            Self::Query => "RETRIEVAL_QUERY",
        }
    }
}

impl GeminiClient {
    #[inline]
    pub fn new(config: &GeminiConfig, api_key: String) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid Gemini base URL: {}", config.base_url))?;

        Ok(Self {
            base_url,
            api_key,
            embedding_model: qualify_model(&config.embedding_model),
            generation_model: qualify_model(&config.generation_model),
            batch_size: config.batch_size.max(1),
            http: HttpClient::new(Duration::from_secs(EMBEDDING_TIMEOUT_SECONDS)),
            generation_http: HttpClient::new(Duration::from_secs(GENERATION_TIMEOUT_SECONDS)),
        })
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.http = self.http.with_retry_attempts(attempts);
        self.generation_http = self.generation_http.with_retry_attempts(attempts);
        self
    }

    #[inline]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.http = self.http.with_backoff(backoff);
        self.generation_http = self.generation_http.with_backoff(backoff);
        self
    }

    fn method_url(&self, model: &str, method: &str) -> Result<Url> {
        let url = format!(
            "{}/v1beta/{}:{}",
            self.base_url.as_str().trim_end_matches('/'),
            model,
            method
        );
        Url::parse(&url).with_context(|| format!("Failed to build Gemini URL: {}", url))
    }

    /// Embed document texts in batches, preserving input order
    #[inline]
    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating Gemini embeddings for {} texts", texts.len());

        let mut results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size as usize) {
            let batch = self
                .embed_single_batch(chunk)
                .with_context(|| format!("Failed to process batch of {} texts", chunk.len()))?;
            results.extend(batch);
        }

        Ok(results)
    }

    fn embed_single_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| self.embed_request(text, TaskType::Document))
                .collect(),
        };

        let url = self.method_url(&self.embedding_model, "batchEmbedContents")?;
        let response_text = self
            .http
            .post_json(&url, &[(API_KEY_HEADER, self.api_key.as_str())], &request)
            .context("Failed to generate batch embeddings")?;

        let response: BatchEmbedResponse = serde_json::from_str(&response_text)
            .context("Failed to parse batch embedding response")?;

        if response.embeddings.len() != texts.len() {
            return Err(anyhow::anyhow!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            ));
        }

        Ok(response.embeddings.into_iter().map(|e| e.values).collect())
    }

    /// Embed a single query text
    #[inline]
    pub fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let request = self.embed_request(text, TaskType::Query);
        let url = self.method_url(&self.embedding_model, "embedContent")?;

        let response_text = self
            .http
            .post_json(&url, &[(API_KEY_HEADER, self.api_key.as_str())], &request)
            .context("Failed to generate query embedding")?;

        let response: EmbedContentResponse = serde_json::from_str(&response_text)
            .context("Failed to parse embedding response")?;

        debug!(
            "Generated query embedding with {} dimensions",
            response.embedding.values.len()
        );
        Ok(response.embedding.values)
    }

    fn embed_request<'a>(&'a self, text: &'a str, task: TaskType) -> EmbedContentRequest<'a> {
        EmbedContentRequest {
            model: &self.embedding_model,
            content: Content {
                parts: [Part { text }],
            },
            task_type: task.as_str(),
        }
    }

    /// Generate an answer for the prompt and concatenate the text parts of the first candidate
    #[inline]
    pub fn generate_content(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            contents: [Content {
                parts: [Part { text: prompt }],
            }],
        };
        let url = self.method_url(&self.generation_model, "generateContent")?;

        debug!(
            "Requesting completion from {} ({} prompt chars)",
            self.generation_model,
            prompt.len()
        );

        let response_text = self
            .generation_http
            .post_json(&url, &[(API_KEY_HEADER, self.api_key.as_str())], &request)
            .context("Failed to generate content")?;

        let response: GenerateResponse = serde_json::from_str(&response_text)
            .context("Failed to parse generation response")?;

        if let Some(reason) = response
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            return Err(anyhow::anyhow!("Prompt was blocked: {}", reason));
        }

        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Response contained no candidates"))?;

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "Response contained no text (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            ));
        }

        Ok(text)
    }

    /// Fetch the embedding model's metadata to confirm the key and model are valid
    #[inline]
    pub fn check_model(&self) -> Result<()> {
        let url = Url::parse(&format!(
            "{}/v1beta/{}",
            self.base_url.as_str().trim_end_matches('/'),
            self.embedding_model
        ))
        .context("Failed to build model URL")?;

        self.http
            .get(&url, &[(API_KEY_HEADER, self.api_key.as_str())])
            .with_context(|| format!("Model '{}' is not reachable", self.embedding_model))?;

        info!("Gemini model {} is reachable", self.embedding_model);
        Ok(())
    }
}

/// The REST API addresses models as `models/<name>`
fn qualify_model(model: &str) -> String {
    let model = model.trim();
    if model.starts_with("models/") || model.starts_with("tunedModels/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

impl Embedder for GeminiClient {
    fn embed_documents(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        self.embed_batch(texts)
            .map_err(|e| RagError::Embedding(format!("{e:#}")))
    }

    fn embed_query(&self, text: &str) -> crate::Result<Vec<f32>> {
        self.embed_one(text)
            .map_err(|e| RagError::Embedding(format!("{e:#}")))
    }

    fn model_name(&self) -> &str {
        &self.embedding_model
    }

    fn health_check(&self) -> crate::Result<()> {
        self.check_model()
            .map_err(|e| RagError::Network(format!("{e:#}")))
    }
}

impl Generator for GeminiClient {
    fn generate(&self, prompt: &str) -> crate::Result<String> {
        self.generate_content(prompt)
            .map_err(|e| RagError::Generation(format!("{e:#}")))
    }

    fn model_name(&self) -> &str {
        &self.generation_model
    }
}
