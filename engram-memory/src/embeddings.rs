//! Embedding providers.
//!
//! `OpenAiEmbedding` calls an OpenAI-compatible `/embeddings` endpoint.
//! `HashedEmbedding` is a deterministic offline provider used by tests and
//! by the in-process backend when no API key is configured.

use async_trait::async_trait;
use engram_common::{EmbeddingConfig, MemoryError, Result};
use serde::Deserialize;
use std::sync::Arc;

/// Turns text into fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name (e.g., "openai").
    fn name(&self) -> &str;

    /// Output vector dimension; 0 means the provider cannot embed.
    fn dimensions(&self) -> usize;

    /// Embed a batch of texts, preserving input order.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text]).await?;
        vectors
            .pop()
            .ok_or_else(|| MemoryError::EmbeddingFailure("provider returned no vector".into()))
    }
}

/// OpenAI-compatible embedding API client.
pub struct OpenAiEmbedding {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedding {
    pub fn new(base_url: &str, api_key: &str, model: &str, dimensions: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            dimensions,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    fn name(&self) -> &str {
        "openai"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| MemoryError::EmbeddingFailure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(MemoryError::EmbeddingFailure(format!(
                "embedding API returned {status}: {detail}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| MemoryError::EmbeddingFailure(e.to_string()))?;

        if parsed.data.len() != texts.len() {
            return Err(MemoryError::EmbeddingFailure(format!(
                "expected {} vectors, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Provider that embeds nothing; disables vector indexing entirely.
pub struct NoopEmbedding;

#[async_trait]
impl EmbeddingProvider for NoopEmbedding {
    fn name(&self) -> &str {
        "noop"
    }

    fn dimensions(&self) -> usize {
        0
    }

    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| Vec::new()).collect())
    }
}

/// Deterministic local embedding from character statistics.
///
/// Not semantically meaningful, but stable across runs, which is what the
/// pipeline tests need.
pub struct HashedEmbedding {
    dims: usize,
}

impl HashedEmbedding {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl EmbeddingProvider for HashedEmbedding {
    fn name(&self) -> &str {
        "hashed"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vec = vec![0.0f32; self.dims];
                for (i, c) in text.chars().enumerate() {
                    vec[i % self.dims] += (c as u32 as f32) / 1000.0;
                }
                let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm > 0.0 {
                    vec.iter_mut().for_each(|x| *x /= norm);
                }
                vec
            })
            .collect())
    }
}

/// Build the provider named by configuration.
pub fn create_embedding_provider(config: &EmbeddingConfig) -> Arc<dyn EmbeddingProvider> {
    match (config.provider.as_str(), config.api_key.as_deref()) {
        ("openai", Some(api_key)) if !api_key.is_empty() => Arc::new(OpenAiEmbedding::new(
            &config.base_url,
            api_key,
            &config.model,
            config.dimensions,
        )),
        ("hashed", _) => Arc::new(HashedEmbedding::new(config.dimensions)),
        _ => {
            tracing::warn!(
                provider = %config.provider,
                "No usable embedding provider configured, vector indexing disabled"
            );
            Arc::new(NoopEmbedding)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn hashed_embedding_is_deterministic() {
        let provider = HashedEmbedding::new(16);
        let a = provider.embed_one("hello world").await.unwrap();
        let b = provider.embed_one("hello world").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);

        let c = provider.embed_one("different text").await.unwrap();
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn hashed_embedding_is_unit_norm() {
        let provider = HashedEmbedding::new(8);
        let vec = provider.embed_one("some text").await.unwrap();
        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn noop_embedding_returns_empty_vectors() {
        let provider = NoopEmbedding;
        assert_eq!(provider.dimensions(), 0);
        let vectors = provider.embed(&["a", "b"]).await.unwrap();
        assert_eq!(vectors, vec![Vec::<f32>::new(), Vec::new()]);
    }

    #[tokio::test]
    async fn openai_embedding_orders_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    { "index": 1, "embedding": [0.0, 1.0] },
                    { "index": 0, "embedding": [1.0, 0.0] },
                ]
            })))
            .mount(&server)
            .await;

        let provider = OpenAiEmbedding::new(&server.uri(), "test-key", "test-model", 2);
        let vectors = provider.embed(&["first", "second"]).await.unwrap();
        assert_eq!(vectors[0], vec![1.0, 0.0]);
        assert_eq!(vectors[1], vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn openai_embedding_surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let provider = OpenAiEmbedding::new(&server.uri(), "test-key", "test-model", 2);
        let err = provider.embed(&["text"]).await.unwrap_err();
        assert!(matches!(err, MemoryError::EmbeddingFailure(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn openai_embedding_rejects_count_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "index": 0, "embedding": [1.0] }]
            })))
            .mount(&server)
            .await;

        let provider = OpenAiEmbedding::new(&server.uri(), "test-key", "test-model", 1);
        let err = provider.embed(&["a", "b"]).await.unwrap_err();
        assert!(matches!(err, MemoryError::EmbeddingFailure(_)));
    }

    #[test]
    fn provider_factory_falls_back_to_noop() {
        let config = EmbeddingConfig {
            provider: "openai".into(),
            api_key: None,
            ..EmbeddingConfig::default()
        };
        let provider = create_embedding_provider(&config);
        assert_eq!(provider.name(), "noop");

        let config = EmbeddingConfig {
            provider: "hashed".into(),
            dimensions: 32,
            ..EmbeddingConfig::default()
        };
        let provider = create_embedding_provider(&config);
        assert_eq!(provider.name(), "hashed");
        assert_eq!(provider.dimensions(), 32);
    }
}
