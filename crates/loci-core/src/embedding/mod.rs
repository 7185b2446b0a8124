//! Embedding service - cache-first text vectorization with graceful
//! degradation.
//!
//! Retrieval order per text: cache hit, then the remote provider (bounded
//! batches, rate-limit aware), then the deterministic local fallback when
//! enabled. Fallback-produced vectors are flagged so callers can mark the
//! memory for a later refresh.

mod cache;
mod fallback;
mod provider;

pub use cache::{cache_key, CacheKey, CacheStats, EmbeddingCache};
pub use fallback::{normalize_tokens, FallbackEncoder};
pub use provider::{EmbeddingProvider, HttpEmbeddingProvider, ProviderError};

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::{CoreError, Result};
use crate::memory::EMBEDDING_DIMENSIONS;

/// Remote calls carry at most this many texts.
pub const MAX_BATCH_SIZE: usize = 128;

/// An embedding plus the flag recording which path produced it.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub is_fallback: bool,
}

/// Cache-first embedding service.
pub struct EmbeddingService {
    provider: Option<Arc<dyn EmbeddingProvider>>,
    cache: EmbeddingCache,
    fallback: Option<FallbackEncoder>,
    max_retries: u32,
    base_backoff: Duration,
}

impl EmbeddingService {
    pub fn new(
        provider: Option<Arc<dyn EmbeddingProvider>>,
        cache: EmbeddingCache,
        fallback: Option<FallbackEncoder>,
        max_retries: u32,
    ) -> Self {
        Self {
            provider,
            cache,
            fallback,
            max_retries,
            base_backoff: Duration::from_millis(200),
        }
    }

    /// Build from settings: HTTP provider when an API key is configured,
    /// fallback encoder when enabled.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let embedding = &settings.embedding;
        let provider: Option<Arc<dyn EmbeddingProvider>> = match &embedding.api_key {
            Some(api_key) => Some(Arc::new(
                HttpEmbeddingProvider::new(
                    embedding.endpoint.clone(),
                    api_key.clone(),
                    embedding.model.clone(),
                    Duration::from_secs(embedding.timeout_seconds),
                )
                .map_err(|e| CoreError::EmbeddingUnavailable(e.to_string()))?,
            )),
            None => None,
        };
        let fallback = embedding
            .fallback_enabled
            .then(|| FallbackEncoder::new(embedding.fallback_model.clone()));
        Ok(Self::new(
            provider,
            EmbeddingCache::new(settings.cache.max_entries, settings.cache.ttl_days),
            fallback,
            embedding.max_retries,
        ))
    }

    /// Shrink the backoff floor; test hook.
    pub fn with_base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff;
        self
    }

    /// Model id used for cache keys: the remote model, or the fallback model
    /// when no provider is configured.
    fn cache_model_id(&self) -> &str {
        match (&self.provider, &self.fallback) {
            (Some(provider), _) => provider.model_id(),
            (None, Some(fallback)) => fallback.model_id(),
            (None, None) => "none",
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Embed a single text.
    pub async fn embed(&self, text: &str) -> Result<Embedding> {
        let batch = [text.to_string()];
        let mut results = self.embed_batch(&batch).await?;
        Ok(results.remove(0))
    }

    /// Embed a query; identical path, vector only.
    pub async fn embed_for_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed(text).await?.vector)
    }

    /// Embed a batch. Output index i corresponds to input index i.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut results: Vec<Option<Embedding>> = vec![None; texts.len()];
        let mut misses: Vec<usize> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            let key = cache_key(self.cache_model_id(), text);
            match self.cache.get(&key) {
                Some((vector, is_fallback)) => {
                    results[i] = Some(Embedding {
                        vector,
                        is_fallback,
                    })
                }
                None => misses.push(i),
            }
        }

        if !misses.is_empty() {
            debug!(
                total = texts.len(),
                misses = misses.len(),
                "embedding cache partition"
            );
        }

        for chunk in misses.chunks(MAX_BATCH_SIZE) {
            let chunk_texts: Vec<String> = chunk.iter().map(|&i| texts[i].clone()).collect();
            let embedded = self.embed_chunk(&chunk_texts).await?;
            for (&index, embedding) in chunk.iter().zip(embedded) {
                let key = cache_key(self.cache_model_id(), &texts[index]);
                self.cache
                    .put(key, embedding.vector.clone(), embedding.is_fallback);
                results[index] = Some(embedding);
            }
        }

        Ok(results
            .into_iter()
            .map(|entry| entry.expect("every index filled by cache or chunk pass"))
            .collect())
    }

    /// Embed one remote-sized chunk, falling back locally when the remote
    /// path is exhausted.
    async fn embed_chunk(&self, chunk: &[String]) -> Result<Vec<Embedding>> {
        let remote_failure = match &self.provider {
            None => "no embedding provider configured".to_string(),
            Some(provider) => match self.call_with_retry(provider.as_ref(), chunk).await {
                Ok(vectors) => match Self::check_dimensions(vectors) {
                    Ok(vectors) => {
                        return Ok(vectors
                            .into_iter()
                            .map(|vector| Embedding {
                                vector: l2_normalize(vector),
                                is_fallback: false,
                            })
                            .collect());
                    }
                    Err(message) => message,
                },
                Err(e) => e.to_string(),
            },
        };

        match &self.fallback {
            Some(encoder) => {
                warn!(error = %remote_failure, count = chunk.len(), "remote embedding failed, using local fallback");
                Ok(chunk
                    .iter()
                    .map(|text| Embedding {
                        vector: encoder.encode(text),
                        is_fallback: true,
                    })
                    .collect())
            }
            None => Err(CoreError::EmbeddingUnavailable(remote_failure)),
        }
    }

    /// Call the provider, honoring rate-limit hints and backing off
    /// exponentially up to the retry budget.
    async fn call_with_retry(
        &self,
        provider: &dyn EmbeddingProvider,
        chunk: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        let mut attempt: u32 = 0;
        loop {
            match provider.embed_batch(chunk).await {
                Ok(vectors) => return Ok(vectors),
                Err(ProviderError::RateLimited { retry_after }) if attempt < self.max_retries => {
                    let delay = retry_after
                        .unwrap_or_else(|| self.base_backoff * 2_u32.saturating_pow(attempt));
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "rate limited, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn check_dimensions(vectors: Vec<Vec<f32>>) -> std::result::Result<Vec<Vec<f32>>, String> {
        for vector in &vectors {
            if vector.len() != EMBEDDING_DIMENSIONS {
                return Err(format!(
                    "provider returned {}-dim vector, expected {}",
                    vector.len(),
                    EMBEDDING_DIMENSIONS
                ));
            }
        }
        Ok(vectors)
    }
}

fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted provider: pops one response per call, records batch sizes.
    struct ScriptedProvider {
        responses: Mutex<Vec<std::result::Result<(), ProviderError>>>,
        calls: AtomicUsize,
        batch_sizes: Mutex<Vec<usize>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<std::result::Result<(), ProviderError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
                batch_sizes: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EmbeddingProvider for ScriptedProvider {
        fn model_id(&self) -> &str {
            "scripted-model"
        }

        async fn embed_batch(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batch_sizes.lock().unwrap().push(texts.len());

            let mut responses = self.responses.lock().unwrap();
            let outcome = if responses.is_empty() {
                Ok(())
            } else {
                responses.remove(0)
            };
            outcome?;

            // Distinct deterministic vector per text.
            Ok(texts
                .iter()
                .map(|text| {
                    let mut v = vec![0.0_f32; EMBEDDING_DIMENSIONS];
                    let bucket = text.len() % EMBEDDING_DIMENSIONS;
                    v[bucket] = 1.0;
                    v
                })
                .collect())
        }
    }

    fn service(provider: Arc<ScriptedProvider>, fallback: bool) -> EmbeddingService {
        EmbeddingService::new(
            Some(provider),
            EmbeddingCache::new(1000, 30),
            fallback.then(|| FallbackEncoder::new("loci-hash-v1")),
            3,
        )
        .with_base_backoff(Duration::from_millis(1))
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("text number {}", i)).collect()
    }

    #[tokio::test]
    async fn test_batch_order_preserved() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let svc = service(provider, true);

        let inputs = texts(5);
        let first = svc.embed_batch(&inputs).await.unwrap();
        // Re-run comes fully from cache and must line up identically.
        let second = svc.embed_batch(&inputs).await.unwrap();
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.vector, b.vector);
        }
    }

    #[tokio::test]
    async fn test_chunks_never_exceed_cap() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let svc = service(provider.clone(), true);

        let inputs = texts(300);
        let embedded = svc.embed_batch(&inputs).await.unwrap();
        assert_eq!(embedded.len(), 300);

        let sizes = provider.batch_sizes.lock().unwrap().clone();
        assert_eq!(sizes, vec![128, 128, 44]);
    }

    #[tokio::test]
    async fn test_rate_limit_honors_hint_then_succeeds() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(
            ProviderError::RateLimited {
                retry_after: Some(Duration::from_millis(5)),
            },
        )]));
        let svc = service(provider.clone(), false);

        let inputs = texts(10);
        let embedded = svc.embed_batch(&inputs).await.unwrap();
        assert_eq!(embedded.len(), 10);
        assert!(embedded.iter().all(|e| !e.is_fallback));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fall_back() {
        let rate_limited = || {
            Err(ProviderError::RateLimited {
                retry_after: Some(Duration::from_millis(1)),
            })
        };
        let provider = Arc::new(ScriptedProvider::new(vec![
            rate_limited(),
            rate_limited(),
            rate_limited(),
            rate_limited(),
        ]));
        let svc = service(provider.clone(), true);

        let embedded = svc.embed_batch(&texts(3)).await.unwrap();
        assert!(embedded.iter().all(|e| e.is_fallback));
        // Initial call + 3 retries.
        assert_eq!(provider.call_count(), 4);
    }

    #[tokio::test]
    async fn test_failure_without_fallback_is_unavailable() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderError::Request(
            "boom".into(),
        ))]));
        let svc = service(provider, false);

        let err = svc.embed("anything").await.unwrap_err();
        assert!(matches!(err, CoreError::EmbeddingUnavailable(_)));
    }

    #[tokio::test]
    async fn test_cache_short_circuits_remote() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let svc = service(provider.clone(), true);

        svc.embed("same text").await.unwrap();
        svc.embed("same text").await.unwrap();
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_no_provider_uses_fallback_and_flags_it() {
        let svc = EmbeddingService::new(
            None,
            EmbeddingCache::new(100, 30),
            Some(FallbackEncoder::new("loci-hash-v1")),
            3,
        );
        let embedding = svc.embed("fallback path").await.unwrap();
        assert!(embedding.is_fallback);
        assert_eq!(embedding.vector.len(), EMBEDDING_DIMENSIONS);
    }

    #[tokio::test]
    async fn test_remote_vectors_are_normalized() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let svc = service(provider, false);
        let embedding = svc.embed("normalize me").await.unwrap();
        let norm = embedding.vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }
}
