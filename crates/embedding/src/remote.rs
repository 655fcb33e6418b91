//! OpenAI-compatible embedding endpoint client.
//!
//! Works with any service exposing a `/embeddings` route in the OpenAI wire
//! format (OpenAI, OpenRouter, Ollama, vLLM, Together AI, ...).

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use contextloom_core::embedding::EmbeddingProvider;
use contextloom_core::error::EmbeddingError;

/// An OpenAI-compatible embedding provider.
pub struct RemoteEmbedder {
    model: String,
    base_url: String,
    api_key: String,
    dimension: usize,
    client: reqwest::Client,
}

impl RemoteEmbedder {
    /// Create a new remote embedder.
    ///
    /// `dimension` is the expected output dimension of `model`; responses of
    /// any other length are rejected so the index never mixes vector sizes.
    pub fn new(
        model: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        dimension: usize,
    ) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| EmbeddingError::Network(e.to_string()))?;

        Ok(Self {
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            dimension,
            client,
        })
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(model: impl Into<String>, api_key: impl Into<String>, dimension: usize) -> Result<Self, EmbeddingError> {
        Self::new(model, "https://api.openai.com/v1", api_key, dimension)
    }
}

#[derive(Deserialize)]
struct ApiEmbeddingResponse {
    data: Vec<ApiEmbeddingItem>,
}

#[derive(Deserialize)]
struct ApiEmbeddingItem {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn is_semantic(&self) -> bool {
        true
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        debug!(model = %self.model, chars = text.len(), "Sending embedding request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EmbeddingError::Timeout(e.to_string())
                } else {
                    EmbeddingError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(EmbeddingError::RateLimited { retry_after_secs: 5 });
        }

        if status == 401 || status == 403 {
            return Err(EmbeddingError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Embedding endpoint returned error");
            return Err(EmbeddingError::Api {
                status_code: status,
                message: error_body,
            });
        }

        let parsed: ApiEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty data array".into()))?;

        if vector.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_trimmed() {
        let embedder =
            RemoteEmbedder::new("text-embedding-3-small", "https://api.openai.com/v1/", "k", 1536)
                .unwrap();
        assert_eq!(embedder.base_url, "https://api.openai.com/v1");
        assert!(embedder.is_semantic());
        assert_eq!(embedder.dimension(), 1536);
    }

    #[test]
    fn response_parsing() {
        let json = r#"{"data":[{"embedding":[0.1,0.2,0.3]}],"model":"m"}"#;
        let parsed: ApiEmbeddingResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.data[0].embedding, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error() {
        // Reserved TEST-NET address: connection fails fast without real traffic.
        let embedder =
            RemoteEmbedder::new("text-embedding-3-small", "http://192.0.2.1:9", "k", 1536).unwrap();
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::Network(_) | EmbeddingError::Timeout(_)
        ));
    }
}
