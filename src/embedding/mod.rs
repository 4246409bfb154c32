//! Embedding client abstraction and adapters.
//!
//! The indexing pipeline converts chunk texts to fixed-dimension vectors in
//! one batch per document. Batches are all-or-nothing: a provider failure
//! fails the whole batch and nothing is persisted for it.

use crate::config::{Config, EmbeddingProvider};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Provider credential is absent; checked before any network call.
    #[error("embedding provider credential is not configured: set {env_var}")]
    MissingCredential {
        /// Environment variable that must carry the credential.
        env_var: &'static str,
    },
    /// Provider signalled that the request quota is exhausted.
    #[error("embedding provider rate limit exceeded: {body}")]
    RateLimited {
        /// Response body returned with the rate-limit status.
        body: String,
    },
    /// Provider responded with a non-success status.
    #[error("embedding request failed with status {status}: {body}")]
    RequestFailed {
        /// HTTP status returned by the provider.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// A returned vector does not match the configured dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension configured for the vector store column.
        expected: usize,
        /// Dimension actually produced by the provider.
        actual: usize,
    },
    /// Provider response could not be interpreted.
    #[error("malformed embedding response: {0}")]
    MalformedResponse(String),
}

/// Interface implemented by embedding backends.
///
/// Output vectors correspond positionally to the input texts.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied text, in input order.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Dimensionality every returned vector is guaranteed to have.
    fn dimension(&self) -> usize;
}

/// Client for the hosted OpenAI embeddings API.
#[derive(Debug)]
pub struct OpenAiEmbeddingClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingItem>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbeddingClient {
    /// Construct a client, failing fast when the API key is absent.
    pub fn new(config: &Config) -> Result<Self, EmbeddingError> {
        let api_key = config
            .openai_api_key
            .clone()
            .ok_or(EmbeddingError::MissingCredential {
                env_var: "OPENAI_API_KEY",
            })?;
        let client = reqwest::Client::builder()
            .user_agent("medkeep/0.2")
            .build()?;
        Ok(Self {
            client,
            base_url: config.openai_api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.embedding_model.clone(),
            dimension: config.embedding_dimension,
        })
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let batch_size = texts.len();

        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "input": texts,
            }))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::RateLimited { body });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::RequestFailed { status, body });
        }

        let payload: OpenAiEmbeddingResponse = response.json().await?;
        if payload.data.len() != batch_size {
            return Err(EmbeddingError::MalformedResponse(format!(
                "expected {batch_size} vectors, provider returned {}",
                payload.data.len()
            )));
        }

        // The API documents input order but items carry an explicit index;
        // trust the index so positional correspondence survives reordering.
        let mut items = payload.data;
        items.sort_by_key(|item| item.index);

        let mut vectors = Vec::with_capacity(items.len());
        for item in items {
            if item.embedding.len() != self.dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dimension,
                    actual: item.embedding.len(),
                });
            }
            vectors.push(item.embedding);
        }
        tracing::debug!(model = %self.model, vectors = vectors.len(), "Generated embeddings");
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic offline embedding client.
///
/// Hashes input bytes into a normalized vector of the configured dimension.
/// Not semantically meaningful, but stable across runs, which is what the
/// air-gapped deployment mode and the live validation suite need.
pub struct DeterministicEmbeddingClient {
    dimension: usize,
}

impl DeterministicEmbeddingClient {
    /// Construct a deterministic client emitting vectors of `dimension`.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(text: &str, dimension: usize) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; dimension];

        if text.is_empty() {
            return embedding;
        }

        for (idx, byte) in text.bytes().enumerate() {
            let position = idx % dimension;
            embedding[position] += f32::from(byte) / 255.0;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();

        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingClient for DeterministicEmbeddingClient {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if self.dimension == 0 {
            return Err(EmbeddingError::MalformedResponse(
                "embedding dimension must be greater than zero".into(),
            ));
        }
        Ok(texts
            .into_iter()
            .map(|text| Self::encode(&text, self.dimension))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Build the embedding client selected by configuration.
pub fn build_embedding_client(config: &Config) -> Result<Arc<dyn EmbeddingClient>, EmbeddingError> {
    match config.embedding_provider {
        EmbeddingProvider::OpenAi => Ok(Arc::new(OpenAiEmbeddingClient::new(config)?)),
        EmbeddingProvider::Deterministic => Ok(Arc::new(DeterministicEmbeddingClient::new(
            config.embedding_dimension,
        ))),
    }
}
