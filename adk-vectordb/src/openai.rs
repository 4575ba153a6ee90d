//! Embedding provider for OpenAI-compatible `/v1/embeddings` endpoints.
//!
//! Works against the OpenAI API as well as self-hosted servers that expose the
//! same route (text-embeddings-inference, vLLM, LocalAI, ...). This module is
//! only available when the `openai` feature is enabled.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::DEFAULT_EMBEDDING_DIM;
use crate::embedding::EmbeddingProvider;
use crate::error::{Result, VectorDbError};

/// The default endpoint base URL.
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// The default model, matching the default 384-dimension collections.
const DEFAULT_MODEL: &str = "sentence-transformers/all-minilm-l6-v2";

const PROVIDER: &str = "openai-compatible";

/// An [`EmbeddingProvider`] backed by an OpenAI-compatible embeddings API.
///
/// # Configuration
///
/// - `base_url` – defaults to `https://api.openai.com/v1`.
/// - `model` – defaults to `sentence-transformers/all-minilm-l6-v2`
///   (override with `TOKENIZER_MODEL` in [`from_env`](Self::from_env)).
/// - `dimensions` – defaults to 384; responses of any other length are rejected.
/// - `api_key` – optional bearer token.
///
/// # Example
///
/// ```rust,ignore
/// use adk_vectordb::openai::OpenAiEmbeddingProvider;
///
/// let provider = OpenAiEmbeddingProvider::new("http://localhost:8080/v1")?;
/// let embedding = provider.embed("hello world").await?;
/// ```
pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbeddingProvider {
    /// Create a provider for the given base URL with the default model.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(VectorDbError::Configuration(
                "embedding base URL must not be empty".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| VectorDbError::Configuration(format!("invalid HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            api_key: None,
            model: DEFAULT_MODEL.into(),
            dimensions: DEFAULT_EMBEDDING_DIM,
        })
    }

    /// Create a provider from `EMBEDDING_BASE_URL`, `EMBEDDING_API_KEY` (or
    /// `OPENAI_API_KEY`), `TOKENIZER_MODEL` and `EMBEDDING_DIM`.
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("EMBEDDING_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let mut provider = Self::new(base_url)?;
        if let Ok(key) =
            std::env::var("EMBEDDING_API_KEY").or_else(|_| std::env::var("OPENAI_API_KEY"))
        {
            provider = provider.with_api_key(key);
        }
        if let Ok(model) = std::env::var("TOKENIZER_MODEL") {
            provider = provider.with_model(model);
        }
        if let Ok(dim) = std::env::var("EMBEDDING_DIM") {
            let dim = dim.trim().parse::<usize>().map_err(|e| {
                VectorDbError::Configuration(format!("EMBEDDING_DIM '{dim}' is not a number: {e}"))
            })?;
            provider = provider.with_dimensions(dim);
        }
        Ok(provider)
    }

    /// Set the bearer token.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the expected output dimension.
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self
    }

    fn err(message: impl Into<String>) -> VectorDbError {
        VectorDbError::EmbeddingResolution { provider: PROVIDER.into(), message: message.into() }
    }
}

// ── API request/response types ─────────────────────────────────────

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Order embeddings by their reported index and check their dimension.
fn collect_embeddings(
    response: EmbeddingResponse,
    expected: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut data = response.data;
    data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));
    if data.len() != expected {
        return Err(OpenAiEmbeddingProvider::err(format!(
            "expected {expected} embeddings, got {}",
            data.len()
        )));
    }
    data.into_iter()
        .map(|d| {
            if d.embedding.len() == dimensions {
                Ok(d.embedding)
            } else {
                Err(OpenAiEmbeddingProvider::err(format!(
                    "expected dimension {dimensions}, got {}",
                    d.embedding.len()
                )))
            }
        })
        .collect()
}

// ── EmbeddingProvider implementation ───────────────────────────────

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = PROVIDER, text_len = text.len(), "embedding single text");

        let results = self.embed_batch(&[text]).await?;
        results.into_iter().next().ok_or_else(|| Self::err("API returned empty response"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            provider = PROVIDER,
            batch_size = texts.len(),
            model = %self.model,
            "embedding batch"
        );

        let request_body = EmbeddingRequest { model: &self.model, input: texts.to_vec() };
        let mut request =
            self.client.post(format!("{}/embeddings", self.base_url)).json(&request_body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            error!(provider = PROVIDER, error = %e, "request failed");
            Self::err(format!("request failed: {e}"))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);

            error!(provider = PROVIDER, %status, "API error");
            return Err(Self::err(format!("API returned {status}: {detail}")));
        }

        let embedding_response: EmbeddingResponse = response.json().await.map_err(|e| {
            error!(provider = PROVIDER, error = %e, "failed to parse response");
            Self::err(format!("failed to parse response: {e}"))
        })?;

        collect_embeddings(embedding_response, texts.len(), self.dimensions)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_index_and_checks_dimension() {
        let response: EmbeddingResponse = serde_json::from_str(
            r#"{"data": [{"index": 1, "embedding": [0.0, 1.0]}, {"index": 0, "embedding": [1.0, 0.0]}]}"#,
        )
        .unwrap();
        let vectors = collect_embeddings(response, 2, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);

        let short: EmbeddingResponse =
            serde_json::from_str(r#"{"data": [{"embedding": [1.0]}]}"#).unwrap();
        assert!(matches!(
            collect_embeddings(short, 1, 2),
            Err(VectorDbError::EmbeddingResolution { .. })
        ));
    }

    #[test]
    fn rejects_missing_embeddings() {
        let empty: EmbeddingResponse = serde_json::from_str(r#"{"data": []}"#).unwrap();
        assert!(collect_embeddings(empty, 1, 384).is_err());
    }

    #[test]
    fn builder_defaults() {
        let provider = OpenAiEmbeddingProvider::new("http://localhost:8080/v1/").unwrap();
        assert_eq!(provider.base_url, "http://localhost:8080/v1");
        assert_eq!(provider.dimensions(), 384);
        assert_eq!(provider.with_dimensions(768).dimensions(), 768);
        assert!(OpenAiEmbeddingProvider::new("").is_err());
    }
}
