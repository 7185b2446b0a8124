//! Remote embedding provider capability.
//!
//! The engine only needs one operation: turn a batch of texts into vectors.
//! Rate limiting is reported with the server's retry hint so the service
//! layer can honor it before backing off exponentially.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Provider-level failure, distinct from [`crate::error::CoreError`] so the
/// service layer can decide between retry, fallback, and bubbling up.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP 429. `retry_after` carries the server hint when present.
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// Bad API key. Never retried.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Anything else: connectivity, timeouts, malformed responses.
    #[error("request failed: {0}")]
    Request(String),
}

/// Capability turning text batches into vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier; part of the cache key.
    fn model_id(&self) -> &str;

    /// Embed the batch; output index i corresponds to input index i.
    /// Callers never pass more than the wire batch cap at once.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

// ============================================================================
// HTTP PROVIDER
// ============================================================================

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

/// Voyage-style JSON embeddings API client.
///
/// `POST {endpoint}` with `{"model": ..., "input": [...]}` returning
/// `{"data": [{"embedding": [...]}, ...]}` in input order.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpEmbeddingProvider {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
        response
            .headers()
            .get(reqwest::header::RETRY_AFTER)?
            .to_str()
            .ok()?
            .parse::<f64>()
            .ok()
            .filter(|secs| *secs >= 0.0)
            .map(Duration::from_secs_f64)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "input": texts,
            }))
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {}
            reqwest::StatusCode::TOO_MANY_REQUESTS => {
                return Err(ProviderError::RateLimited {
                    retry_after: Self::parse_retry_after(&response),
                });
            }
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                return Err(ProviderError::Unauthorized(format!(
                    "provider returned {}",
                    response.status()
                )));
            }
            status => {
                return Err(ProviderError::Request(format!(
                    "provider returned {}",
                    status
                )));
            }
        }

        let body: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Request(format!("malformed response: {}", e)))?;

        if body.data.len() != texts.len() {
            return Err(ProviderError::Request(format!(
                "provider returned {} vectors for {} inputs",
                body.data.len(),
                texts.len()
            )));
        }

        Ok(body.data.into_iter().map(|item| item.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_shape_parses() {
        let raw = r#"{"data": [{"embedding": [0.1, 0.2]}, {"embedding": [0.3, 0.4]}]}"#;
        let parsed: EmbeddingsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.data.len(), 2);
        assert_eq!(parsed.data[1].embedding, vec![0.3, 0.4]);
    }
}
