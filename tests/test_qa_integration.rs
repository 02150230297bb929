//! Integration test: question answering with cache and streaming
//!
//! Drives the engine end to end against a real SQLite cache in a temp
//! directory, with scripted embedding and generation providers standing
//! in for the external service.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::{mpsc, RwLock};
use vitaq::cache::{CacheStore, Namespace};
use vitaq::config::IndexConfig;
use vitaq::corpus::ChunkRecord;
use vitaq::embedding::{CachedEmbedder, EmbeddingError, EmbeddingProvider, TokenBudget};
use vitaq::index::{LexicalIndex, VectorStore};
use vitaq::qa::{ChatMessage, GenerationError, GenerationProvider, QaEngine, QueryResponse};
use vitaq::retrieval::{FusionWeights, HybridRanker};

struct UniformEmbedder;

#[async_trait]
impl EmbeddingProvider for UniformEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(vec![1.0, 0.0])
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }

    fn dimension(&self) -> usize {
        2
    }

    fn model_name(&self) -> &str {
        "uniform"
    }
}

/// Replays a fixed answer and counts invocations
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
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer.clone())
    }

    async fn stream(
        &self,
        _messages: &[ChatMessage],
    ) -> Result<mpsc::Receiver<Result<String, GenerationError>>, GenerationError> {
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

fn resume_chunks() -> Vec<ChunkRecord> {
    vec![
        ChunkRecord {
            source_id: "alice.txt".to_string(),
            section: "skills".to_string(),
            sequence: 0,
            text: "Rust, Go, and distributed systems".to_string(),
            candidate: "alice".to_string(),
        },
        ChunkRecord {
            source_id: "bob.txt".to_string(),
            section: "skills".to_string(),
            sequence: 0,
            text: "Java and Spring services".to_string(),
            candidate: "bob".to_string(),
        },
    ]
}

async fn engine_with(
    dir: &TempDir,
    chunks: Vec<ChunkRecord>,
    generator: Arc<ScriptedGenerator>,
    answer_ttl: Duration,
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
    let engine = QaEngine::new(ranker, generator, Some(cache.clone()), 5, answer_ttl);
    (engine, cache)
}

#[tokio::test]
async fn test_answer_cache_round_trip() {
    println!("\n=== QA Cache Integration ===\n");

    let dir = TempDir::new().unwrap();
    let generator = Arc::new(ScriptedGenerator::new("Alice has Rust experience."));
    let (engine, cache) = engine_with(
        &dir,
        resume_chunks(),
        generator.clone(),
        Duration::from_secs(3600),
    )
    .await;

    let (first, timings) = engine.ask("Who knows Rust?", false).await.unwrap();
    let answer = match first {
        QueryResponse::Generated(answer) => answer,
        _ => panic!("expected a generated answer"),
    };
    println!(
        "✓ Generated ({} chunks, {}ms total): {}",
        timings.chunks, timings.total_ms, answer
    );
    assert!(!timings.cache_hit);
    assert!(timings.generation_ms.is_some());
    assert_eq!(cache.count(Namespace::Answer).unwrap(), 1);

    // second ask comes back verbatim from the cache, bypassing generation
    let (second, timings) = engine.ask("Who knows Rust?", false).await.unwrap();
    match second {
        QueryResponse::Cached(cached) => assert_eq!(cached, answer),
        _ => panic!("expected a cached answer"),
    }
    assert!(timings.cache_hit);
    assert_eq!(generator.call_count(), 1);
    println!("✓ Cache hit served without a provider call");
}

#[tokio::test]
async fn test_answer_expires_after_ttl() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(ScriptedGenerator::new("Alice has Rust experience."));
    // zero TTL: every stored answer is already expired on the next read
    let (engine, _cache) =
        engine_with(&dir, resume_chunks(), generator.clone(), Duration::ZERO).await;

    engine.ask("Who knows Rust?", false).await.unwrap();
    let (second, _) = engine.ask("Who knows Rust?", false).await.unwrap();
    assert!(matches!(second, QueryResponse::Generated(_)));
    assert_eq!(generator.call_count(), 2);
}

#[tokio::test]
async fn test_streaming_caches_only_after_completion() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(ScriptedGenerator::new("Alice knows Rust and Go."));
    let (engine, cache) = engine_with(
        &dir,
        resume_chunks(),
        generator.clone(),
        Duration::from_secs(3600),
    )
    .await;

    let (response, _) = engine.ask("Who knows Rust?", true).await.unwrap();
    let mut rx = match response {
        QueryResponse::Streaming(rx) => rx,
        _ => panic!("expected a streaming answer"),
    };

    let mut fragments = Vec::new();
    while let Some(item) = rx.recv().await {
        fragments.push(item.unwrap());
    }
    assert_eq!(fragments.concat(), "Alice knows Rust and Go.");
    // fragments arrive in order, smallest pieces first to last
    assert_eq!(fragments[0], "Alice ");

    assert_eq!(cache.count(Namespace::Answer).unwrap(), 1);
    let (cached, _) = engine.ask("Who knows Rust?", true).await.unwrap();
    match cached {
        QueryResponse::Cached(answer) => assert_eq!(answer, "Alice knows Rust and Go."),
        _ => panic!("expected a cached answer"),
    }
    assert_eq!(generator.call_count(), 1);
}

#[tokio::test]
async fn test_abandoned_stream_is_not_cached() {
    let dir = TempDir::new().unwrap();
    let long_answer: String = (0..40).map(|i| format!("f{} ", i)).collect();
    let generator = Arc::new(ScriptedGenerator::new(&long_answer));
    let (engine, cache) = engine_with(
        &dir,
        resume_chunks(),
        generator,
        Duration::from_secs(3600),
    )
    .await;

    let (response, _) = engine.ask("Who knows Rust?", true).await.unwrap();
    let mut rx = match response {
        QueryResponse::Streaming(rx) => rx,
        _ => panic!("expected a streaming answer"),
    };
    let _ = rx.recv().await.unwrap().unwrap();
    drop(rx);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cache.count(Namespace::Answer).unwrap(), 0);
}

#[tokio::test]
async fn test_no_matches_short_circuits() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(ScriptedGenerator::new("unused"));
    let (engine, cache) = engine_with(
        &dir,
        Vec::new(),
        generator.clone(),
        Duration::from_secs(3600),
    )
    .await;

    let (response, _) = engine.ask("Who knows Rust?", true).await.unwrap();
    assert!(matches!(response, QueryResponse::NoMatches));
    assert_eq!(generator.call_count(), 0);
    assert_eq!(cache.count(Namespace::Answer).unwrap(), 0);
}
