//! Query orchestration: cache, retrieve, prompt, generate
//!
//! Per query the engine checks the answer cache, retrieves the top-k
//! chunks, assembles the prompt, and calls the generation service. A
//! streamed answer is relayed fragment by fragment and written to the
//! cache only after the provider stream completes; if the consumer stops
//! reading early, nothing is cached.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{CacheStore, Namespace};
use crate::error::Result;
use crate::retrieval::HybridRanker;

use super::prompt;
use super::provider::{GenerationError, GenerationProvider};

/// Fixed reply when retrieval finds nothing; generation is not invoked
pub const NO_MATCH_MESSAGE: &str = "No relevant information found in the resumes.";

/// Outcome of one question
pub enum QueryResponse {
    /// Served verbatim from the answer cache
    Cached(String),
    /// Retrieval produced nothing; no generation call was made
    NoMatches,
    /// Full answer from a non-streaming generation call, already cached
    Generated(String),
    /// Incremental fragments; the concatenation is cached once the
    /// provider stream completes
    Streaming(mpsc::Receiver<std::result::Result<String, GenerationError>>),
}

/// Millisecond timing breakdown for one query
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryTimings {
    pub cache_ms: u64,
    pub retrieval_ms: u64,
    pub prompt_ms: u64,
    /// Set for blocking generation; a streamed answer's duration is
    /// observed by the consumer draining the channel
    pub generation_ms: Option<u64>,
    pub total_ms: u64,
    /// Retrieved chunk count, zero on a cache hit
    pub chunks: usize,
    pub cache_hit: bool,
}

pub struct QaEngine {
    ranker: HybridRanker,
    generator: Arc<dyn GenerationProvider>,
    cache: Option<Arc<CacheStore>>,
    top_k: usize,
    answer_ttl: Duration,
}

impl QaEngine {
    pub fn new(
        ranker: HybridRanker,
        generator: Arc<dyn GenerationProvider>,
        cache: Option<Arc<CacheStore>>,
        top_k: usize,
        answer_ttl: Duration,
    ) -> Self {
        Self {
            ranker,
            generator,
            cache,
            top_k,
            answer_ttl,
        }
    }

    /// Answer a question, streaming fragments when `stream` is set.
    /// Returns the response together with its timing breakdown.
    pub async fn ask(&self, question: &str, stream: bool) -> Result<(QueryResponse, QueryTimings)> {
        let query_id = Uuid::new_v4();
        let started = Instant::now();
        let mut timings = QueryTimings::default();

        let cache_started = Instant::now();
        let key = CacheStore::content_key(question);
        let cached = self.cached_answer(&key);
        timings.cache_ms = elapsed_ms(cache_started);
        if let Some(answer) = cached {
            timings.cache_hit = true;
            timings.total_ms = elapsed_ms(started);
            debug!(
                query = %query_id,
                cache_ms = timings.cache_ms,
                "Answer cache hit"
            );
            return Ok((QueryResponse::Cached(answer), timings));
        }

        let search_started = Instant::now();
        let results = self.ranker.search(question, self.top_k).await?;
        timings.retrieval_ms = elapsed_ms(search_started);
        timings.chunks = results.len();
        debug!(
            query = %query_id,
            chunks = results.len(),
            retrieval_ms = timings.retrieval_ms,
            "Retrieval complete"
        );

        if results.is_empty() {
            timings.total_ms = elapsed_ms(started);
            return Ok((QueryResponse::NoMatches, timings));
        }

        let prompt_started = Instant::now();
        let context = prompt::format_context(&results);
        let messages = prompt::build_messages(question, &context);
        timings.prompt_ms = elapsed_ms(prompt_started);

        if stream {
            let fragments = self.generator.stream(&messages).await?;
            timings.total_ms = elapsed_ms(started);
            Ok((
                QueryResponse::Streaming(self.relay_and_cache(key, fragments)),
                timings,
            ))
        } else {
            let generation_started = Instant::now();
            let answer = self.generator.complete(&messages).await?;
            let generation_ms = elapsed_ms(generation_started);
            timings.generation_ms = Some(generation_ms);
            timings.total_ms = elapsed_ms(started);
            debug!(
                query = %query_id,
                generation_ms,
                total_ms = timings.total_ms,
                "Generation complete"
            );
            self.store_answer(&key, &answer);
            Ok((QueryResponse::Generated(answer), timings))
        }
    }

    /// Answer a question as a JSON value shaped by the question kind.
    ///
    /// Falls back to `{"response": <text>}` when the service replies with
    /// something that does not parse as JSON. Structured answers are not
    /// cached.
    pub async fn ask_structured(&self, question: &str) -> Result<serde_json::Value> {
        let kind = prompt::classify(question);
        debug!(kind = kind.as_str(), "Classified question");

        let results = self.ranker.search(question, self.top_k).await?;
        if results.is_empty() {
            return Ok(serde_json::json!({ "error": "No relevant information found" }));
        }

        let context = prompt::format_context(&results);
        let messages = prompt::build_json_messages(question, &context, kind);
        let raw = self.generator.complete_json(&messages).await?;

        Ok(serde_json::from_str::<serde_json::Value>(&raw)
            .unwrap_or_else(|_| serde_json::json!({ "response": raw })))
    }

    fn cached_answer(&self, key: &str) -> Option<String> {
        let cache = self.cache.as_ref()?;
        match cache.get(Namespace::Answer, key) {
            Ok(Some(bytes)) => String::from_utf8(bytes).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!("Answer cache read failed: {}", e);
                None
            }
        }
    }

    fn store_answer(&self, key: &str, answer: &str) {
        if answer.is_empty() {
            return;
        }
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(
                Namespace::Answer,
                key,
                answer.as_bytes(),
                Some(self.answer_ttl),
            ) {
                warn!("Failed to cache answer: {}", e);
            }
        }
    }

    /// Forward provider fragments to the caller while accumulating the
    /// full answer. The cache write is tied to the provider stream
    /// completing, not to the caller finishing: a dropped consumer stops
    /// the relay before anything is cached.
    fn relay_and_cache(
        &self,
        key: String,
        mut fragments: mpsc::Receiver<std::result::Result<String, GenerationError>>,
    ) -> mpsc::Receiver<std::result::Result<String, GenerationError>> {
        let (tx, rx) = mpsc::channel(32);
        let cache = self.cache.clone();
        let ttl = self.answer_ttl;

        tokio::spawn(async move {
            let mut full = String::new();
            while let Some(item) = fragments.recv().await {
                match item {
                    Ok(fragment) => {
                        full.push_str(&fragment);
                        if tx.send(Ok(fragment)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }
            if full.is_empty() {
                return;
            }
            if let Some(cache) = &cache {
                if let Err(e) = cache.put(Namespace::Answer, &key, full.as_bytes(), Some(ttl)) {
                    warn!("Failed to cache answer: {}", e);
                }
            }
        });
        rx
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::corpus::ChunkRecord;
    use crate::embedding::{CachedEmbedder, EmbeddingError, EmbeddingProvider, TokenBudget};
    use crate::index::{LexicalIndex, VectorStore};
    use crate::qa::ChatMessage;
    use crate::retrieval::FusionWeights;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::sync::RwLock;

    struct UniformEmbedder;

    #[async_trait]
    impl EmbeddingProvider for UniformEmbedder {
        async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0, 0.0])
        }

        async fn embed_batch(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "uniform"
        }
    }

    /// Replays a fixed answer and counts how often it was asked
    struct ScriptedGenerator {
        answer: String,
        calls: AtomicUsize,
    }

    impl ScriptedGenerator {
        fn new(answer: &str) -> Self {
            Self {
                answer: answer.to_string(),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GenerationProvider for ScriptedGenerator {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
        ) -> std::result::Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.clone())
        }

        async fn stream(
            &self,
            _messages: &[ChatMessage],
        ) -> std::result::Result<
            mpsc::Receiver<std::result::Result<String, GenerationError>>,
            GenerationError,
        > {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let fragments: Vec<String> = self
                .answer
                .split_inclusive(' ')
                .map(|s| s.to_string())
                .collect();
            let (tx, rx) = mpsc::channel(1);
            tokio::spawn(async move {
                for fragment in fragments {
                    if tx.send(Ok(fragment)).await.is_err() {
                        return;
                    }
                }
            });
            Ok(rx)
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn chunk(source: &str, text: &str) -> ChunkRecord {
        ChunkRecord {
            source_id: source.to_string(),
            section: "general".to_string(),
            sequence: 0,
            text: text.to_string(),
            candidate: source.trim_end_matches(".txt").to_string(),
        }
    }

    async fn engine_with(
        dir: &TempDir,
        chunks: Vec<ChunkRecord>,
        generator: Arc<ScriptedGenerator>,
    ) -> (QaEngine, Arc<CacheStore>) {
        let embedder = Arc::new(CachedEmbedder::new(
            Arc::new(UniformEmbedder),
            None,
            TokenBudget::whitespace(8191),
            100,
        ));
        let config = IndexConfig {
            data_dir: dir.path().join("index"),
            flat_threshold: 1000,
            max_clusters: 100,
            cluster_divisor: 10,
            nprobe: 8,
        };
        let mut store = VectorStore::new(embedder, config);
        store.build(chunks.clone()).await.unwrap();

        let ranker = HybridRanker::new(
            Arc::new(RwLock::new(store)),
            Arc::new(RwLock::new(LexicalIndex::build(chunks))),
            FusionWeights::default(),
        );
        let cache = Arc::new(CacheStore::open(&dir.path().join("cache.db")).unwrap());
        let engine = QaEngine::new(
            ranker,
            generator,
            Some(cache.clone()),
            5,
            Duration::from_secs(3600),
        );
        (engine, cache)
    }

    fn sample_chunks() -> Vec<ChunkRecord> {
        vec![
            chunk("alice.txt", "Rust and Go experience"),
            chunk("bob.txt", "Java developer"),
        ]
    }

    #[tokio::test]
    async fn test_second_ask_is_served_from_cache() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(ScriptedGenerator::new("Alice knows Rust."));
        let (engine, _cache) = engine_with(&dir, sample_chunks(), generator.clone()).await;

        let (first, timings) = engine.ask("Who knows Rust?", false).await.unwrap();
        match first {
            QueryResponse::Generated(answer) => assert_eq!(answer, "Alice knows Rust."),
            _ => panic!("expected a generated answer"),
        }
        assert!(!timings.cache_hit);
        assert_eq!(timings.chunks, 2);
        assert!(timings.generation_ms.is_some());

        let (second, timings) = engine.ask("Who knows Rust?", false).await.unwrap();
        match second {
            QueryResponse::Cached(answer) => assert_eq!(answer, "Alice knows Rust."),
            _ => panic!("expected a cached answer"),
        }
        assert!(timings.cache_hit);
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_zero_results_skips_generation_and_cache() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(ScriptedGenerator::new("unused"));
        let (engine, cache) = engine_with(&dir, Vec::new(), generator.clone()).await;

        let (response, timings) = engine.ask("Who knows Rust?", false).await.unwrap();
        assert!(matches!(response, QueryResponse::NoMatches));
        assert_eq!(timings.chunks, 0);
        assert_eq!(generator.call_count(), 0);
        assert_eq!(cache.count(Namespace::Answer).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_answer_is_not_cached() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(ScriptedGenerator::new(""));
        let (engine, cache) = engine_with(&dir, sample_chunks(), generator.clone()).await;

        engine.ask("Who knows Rust?", false).await.unwrap();
        assert_eq!(cache.count(Namespace::Answer).unwrap(), 0);

        // no cached entry, so the provider is asked again
        engine.ask("Who knows Rust?", false).await.unwrap();
        assert_eq!(generator.call_count(), 2);
    }

    #[tokio::test]
    async fn test_stream_fragments_arrive_in_order_then_cache() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(ScriptedGenerator::new("Alice knows Rust and Go."));
        let (engine, cache) = engine_with(&dir, sample_chunks(), generator.clone()).await;

        let (response, _) = engine.ask("Who knows Rust?", true).await.unwrap();
        let mut rx = match response {
            QueryResponse::Streaming(rx) => rx,
            _ => panic!("expected a streaming answer"),
        };

        let mut full = String::new();
        while let Some(fragment) = rx.recv().await {
            full.push_str(&fragment.unwrap());
        }
        assert_eq!(full, "Alice knows Rust and Go.");

        // stream completed, so the concatenation is now cached
        let (second, _) = engine.ask("Who knows Rust?", true).await.unwrap();
        match second {
            QueryResponse::Cached(answer) => assert_eq!(answer, "Alice knows Rust and Go."),
            _ => panic!("expected a cached answer"),
        }
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_consumer_never_caches_partial_answer() {
        let dir = TempDir::new().unwrap();
        // more fragments than the relay channel can buffer, so the relay
        // is still mid-stream when the consumer walks away
        let long_answer: String = (0..40).map(|i| format!("f{} ", i)).collect();
        let generator = Arc::new(ScriptedGenerator::new(&long_answer));
        let (engine, cache) = engine_with(&dir, sample_chunks(), generator).await;

        let (response, _) = engine.ask("Who knows Rust?", true).await.unwrap();
        let mut rx = match response {
            QueryResponse::Streaming(rx) => rx,
            _ => panic!("expected a streaming answer"),
        };

        // take one fragment, then walk away
        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first, "f0 ");
        drop(rx);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.count(Namespace::Answer).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_structured_answer_parses_json() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(ScriptedGenerator::new(
            r#"{"candidates": [{"name": "Alice", "has_skill": true}]}"#,
        ));
        let (engine, _cache) = engine_with(&dir, sample_chunks(), generator).await;

        let value = engine.ask_structured("Who has Rust skills?").await.unwrap();
        assert!(value["candidates"][0]["has_skill"].as_bool().unwrap());
    }

    #[tokio::test]
    async fn test_structured_answer_falls_back_on_invalid_json() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(ScriptedGenerator::new("not json at all"));
        let (engine, _cache) = engine_with(&dir, sample_chunks(), generator).await;

        let value = engine.ask_structured("Who has Rust skills?").await.unwrap();
        assert_eq!(value["response"].as_str().unwrap(), "not json at all");
    }

    #[tokio::test]
    async fn test_structured_zero_results_reports_error_value() {
        let dir = TempDir::new().unwrap();
        let generator = Arc::new(ScriptedGenerator::new("unused"));
        let (engine, _cache) = engine_with(&dir, Vec::new(), generator.clone()).await;

        let value = engine.ask_structured("Who has Rust skills?").await.unwrap();
        assert_eq!(
            value["error"].as_str().unwrap(),
            "No relevant information found"
        );
        assert_eq!(generator.call_count(), 0);
    }

    #[test]
    fn test_no_match_message_wording() {
        assert_eq!(NO_MATCH_MESSAGE, "No relevant information found in the resumes.");
    }
}
