//! Content-addressed caching adapter over an embedding transport
//!
//! The adapter owns the degradation contract: an upstream failure never
//! aborts a batch. Affected texts receive the zero vector and are marked
//! degraded so callers can count and report them.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{CacheStore, Namespace};

use super::provider::EmbeddingProvider;
use super::truncate::TokenBudget;
use super::Embedding;

/// Embedding adapter with cache partitioning, sub-batching, and
/// zero-vector degradation
pub struct CachedEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Option<Arc<CacheStore>>,
    budget: TokenBudget,
    batch_size: usize,
}

impl CachedEmbedder {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        cache: Option<Arc<CacheStore>>,
        budget: TokenBudget,
        batch_size: usize,
    ) -> Self {
        Self {
            provider,
            cache,
            budget,
            batch_size: batch_size.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// Embed one text, consulting the cache first.
    ///
    /// Never fails: an upstream error yields a degraded zero vector.
    pub async fn embed(&self, text: &str) -> Embedding {
        let key = CacheStore::content_key(text);
        if let Some(vector) = self.cache_get(&key) {
            return Embedding {
                vector,
                degraded: false,
            };
        }

        let clamped = self.budget.clamp(text);
        match self.provider.embed(clamped).await {
            Ok(vector) => {
                self.cache_put(&key, &vector);
                Embedding {
                    vector,
                    degraded: false,
                }
            }
            Err(e) => {
                warn!("Embedding failed, substituting zero vector: {}", e);
                Embedding::zero(self.provider.dimension())
            }
        }
    }

    /// Embed a batch, order-preserving, one result per input.
    ///
    /// Cached texts are served locally; the rest go to the service in
    /// sub-batches. A failed sub-batch degrades only its own entries.
    pub async fn embed_batch(&self, texts: &[String]) -> Vec<Embedding> {
        let mut results: Vec<Option<Embedding>> = Vec::with_capacity(texts.len());
        let mut uncached = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            let key = CacheStore::content_key(text);
            match self.cache_get(&key) {
                Some(vector) => results.push(Some(Embedding {
                    vector,
                    degraded: false,
                })),
                None => {
                    results.push(None);
                    uncached.push(i);
                }
            }
        }

        if !uncached.is_empty() {
            debug!(
                total = texts.len(),
                cached = texts.len() - uncached.len(),
                uncached = uncached.len(),
                "Embedding batch"
            );
        }

        for sub in uncached.chunks(self.batch_size) {
            let inputs: Vec<String> = sub
                .iter()
                .map(|&i| self.budget.clamp(&texts[i]).to_string())
                .collect();

            match self.provider.embed_batch(&inputs).await {
                Ok(vectors) => {
                    for (&i, vector) in sub.iter().zip(vectors) {
                        let key = CacheStore::content_key(&texts[i]);
                        self.cache_put(&key, &vector);
                        results[i] = Some(Embedding {
                            vector,
                            degraded: false,
                        });
                    }
                }
                Err(e) => {
                    warn!(
                        affected = sub.len(),
                        "Embedding sub-batch failed, substituting zero vectors: {}", e
                    );
                    for &i in sub {
                        results[i] = Some(Embedding::zero(self.provider.dimension()));
                    }
                }
            }
        }

        let dimension = self.provider.dimension();
        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Embedding::zero(dimension)))
            .collect()
    }

    fn cache_get(&self, key: &str) -> Option<Vec<f32>> {
        let cache = self.cache.as_ref()?;
        match cache.get(Namespace::Embedding, key) {
            Ok(Some(bytes)) => decode_vector(&bytes),
            Ok(None) => None,
            Err(e) => {
                warn!("Embedding cache read failed: {}", e);
                None
            }
        }
    }

    fn cache_put(&self, key: &str, vector: &[f32]) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        match encode_vector(vector) {
            Some(bytes) => {
                // embedding entries never expire
                if let Err(e) = cache.put(Namespace::Embedding, key, &bytes, None) {
                    warn!("Embedding cache write failed: {}", e);
                }
            }
            None => warn!("Embedding cache encode failed for key {}", key),
        }
    }
}

fn encode_vector(vector: &[f32]) -> Option<Vec<u8>> {
    bincode::serde::encode_to_vec(vector, bincode::config::standard()).ok()
}

fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    bincode::serde::decode_from_slice::<Vec<f32>, _>(bytes, bincode::config::standard())
        .map(|(v, _)| v)
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::provider::{EmbeddingError, EmbeddingProvider};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Deterministic transport: vector = [len, 1.0, 0.0], optionally failing
    struct ScriptedProvider {
        calls: AtomicUsize,
        received: Mutex<Vec<String>>,
        fail: bool,
    }

    impl ScriptedProvider {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                received: Mutex::new(Vec::new()),
                fail,
            }
        }

        fn vector_for(text: &str) -> Vec<f32> {
            vec![text.len() as f32, 1.0, 0.0]
        }
    }

    #[async_trait]
    impl EmbeddingProvider for ScriptedProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let mut out = self.embed_batch(&[text.to_string()]).await?;
            Ok(out.remove(0))
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.received
                .lock()
                .unwrap()
                .extend(texts.iter().cloned());
            if self.fail {
                return Err(EmbeddingError::Request("scripted failure".to_string()));
            }
            Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
        }

        fn dimension(&self) -> usize {
            3
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn temp_cache() -> (TempDir, Arc<CacheStore>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(CacheStore::open(&dir.path().join("cache.db")).unwrap());
        (dir, store)
    }

    #[tokio::test]
    async fn test_cache_hit_skips_provider() {
        let (_dir, cache) = temp_cache();
        let provider = Arc::new(ScriptedProvider::new(false));
        let embedder = CachedEmbedder::new(
            provider.clone(),
            Some(cache),
            TokenBudget::whitespace(100),
            100,
        );

        let first = embedder.embed("rust engineer").await;
        let second = embedder.embed("rust engineer").await;

        assert_eq!(first, second);
        assert!(!second.degraded);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batch_merges_cached_and_fresh_in_order() {
        let (_dir, cache) = temp_cache();
        let provider = Arc::new(ScriptedProvider::new(false));
        let embedder = CachedEmbedder::new(
            provider.clone(),
            Some(cache),
            TokenBudget::whitespace(100),
            100,
        );

        // warm one entry
        embedder.embed("bb").await;

        let texts = vec!["a".to_string(), "bb".to_string(), "ccc".to_string()];
        let out = embedder.embed_batch(&texts).await;

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].vector[0], 1.0);
        assert_eq!(out[1].vector[0], 2.0);
        assert_eq!(out[2].vector[0], 3.0);
        // one warming call plus one call for the two uncached texts
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        let received = provider.received.lock().unwrap();
        assert_eq!(received.as_slice(), &["bb", "a", "ccc"]);
    }

    #[tokio::test]
    async fn test_failure_degrades_to_zero_vectors() {
        let provider = Arc::new(ScriptedProvider::new(true));
        let embedder =
            CachedEmbedder::new(provider, None, TokenBudget::whitespace(100), 100);

        let texts = vec!["x".to_string(), "y".to_string()];
        let out = embedder.embed_batch(&texts).await;

        assert_eq!(out.len(), 2);
        for e in &out {
            assert!(e.degraded);
            assert_eq!(e.vector, vec![0.0, 0.0, 0.0]);
        }
    }

    #[tokio::test]
    async fn test_clamps_before_sending() {
        let provider = Arc::new(ScriptedProvider::new(false));
        let embedder = CachedEmbedder::new(
            provider.clone(),
            None,
            TokenBudget::whitespace(2),
            100,
        );

        embedder.embed("one two three four").await;

        let received = provider.received.lock().unwrap();
        assert_eq!(received.as_slice(), &["one two"]);
    }

    #[tokio::test]
    async fn test_sub_batching_respects_batch_size() {
        let provider = Arc::new(ScriptedProvider::new(false));
        let embedder = CachedEmbedder::new(
            provider.clone(),
            None,
            TokenBudget::whitespace(100),
            2,
        );

        let texts: Vec<String> = (0..5).map(|i| format!("text {}", i)).collect();
        let out = embedder.embed_batch(&texts).await;

        assert_eq!(out.len(), 5);
        // 5 uncached texts in sub-batches of 2 → 3 calls
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cache_key_uses_full_text_not_clamped() {
        let (_dir, cache) = temp_cache();
        let provider = Arc::new(ScriptedProvider::new(false));
        let embedder = CachedEmbedder::new(
            provider.clone(),
            Some(cache.clone()),
            TokenBudget::whitespace(1),
            100,
        );

        embedder.embed("alpha beta").await;

        let full_key = CacheStore::content_key("alpha beta");
        let clamped_key = CacheStore::content_key("alpha");
        assert!(cache.get(Namespace::Embedding, &full_key).unwrap().is_some());
        assert!(cache.get(Namespace::Embedding, &clamped_key).unwrap().is_none());
    }
}
