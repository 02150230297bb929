//! Application context: one owner for every component handle
//!
//! Commands construct an `AppContext` from validated configuration and
//! reach every component through it; nothing holds ambient global state.
//! The cache is an optional accelerator: a backend that cannot be opened
//! logs one warning and the session runs uncached.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::cache::CacheStore;
use crate::config::Config;
use crate::corpus::ChunkRecord;
use crate::embedding::{CachedEmbedder, RemoteEmbedder, TokenBudget};
use crate::error::{Result, VitaqError};
use crate::index::{BuildReport, LexicalIndex, VectorStore};
use crate::qa::{GenerationProvider, QaEngine, RemoteGenerator};
use crate::retrieval::{FusionWeights, HybridRanker};

/// Index and cache counters for the stats command
#[derive(Debug, Clone)]
pub struct AppStats {
    pub chunks: usize,
    pub sources: usize,
    pub index_kind: &'static str,
    /// None when the cache backend is unavailable this session
    pub cached_embeddings: Option<usize>,
    pub cached_answers: Option<usize>,
}

pub struct AppContext {
    pub config: Config,
    cache: Option<Arc<CacheStore>>,
    vector: Arc<RwLock<VectorStore>>,
    lexical: Arc<RwLock<LexicalIndex>>,
    generator: Arc<dyn GenerationProvider>,
    weights: FusionWeights,
}

impl AppContext {
    /// Wire every component from configuration.
    ///
    /// Loads any persisted index pair and rebuilds the lexical index from
    /// its metadata, so queries in a fresh process see both retrieval
    /// paths. `api_key` may be empty for commands that never call the
    /// external service.
    pub async fn initialize(config: Config, api_key: String) -> Result<Self> {
        let cache = match CacheStore::open(&config.cache.path) {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                warn!("Cache unavailable, continuing without it: {}", e);
                None
            }
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.service.timeout_secs))
            .build()
            .map_err(|e| VitaqError::Config(format!("Cannot build HTTP client: {}", e)))?;

        let budget = match &config.embedding.tokenizer_file {
            Some(path) => TokenBudget::from_file(path, config.embedding.max_input_tokens)?,
            None => TokenBudget::whitespace(config.embedding.max_input_tokens),
        };
        let remote = RemoteEmbedder::new(
            client.clone(),
            &config.service.base_url,
            api_key.clone(),
            config.embedding.model.clone(),
            config.embedding.dimension,
        );
        let embedder = Arc::new(CachedEmbedder::new(
            Arc::new(remote),
            cache.clone(),
            budget,
            config.embedding.batch_size,
        ));

        let mut store = VectorStore::new(embedder, config.index.clone());
        if store.load()? {
            info!(chunks = store.len(), "Restored persisted index");
        }
        let lexical = LexicalIndex::build(store.metadata().to_vec());

        let generator: Arc<dyn GenerationProvider> = Arc::new(RemoteGenerator::new(
            client,
            &config.service.base_url,
            api_key,
            &config.generation,
        ));
        let weights = FusionWeights::from_config(&config.search)?;

        Ok(Self {
            config,
            cache,
            vector: Arc::new(RwLock::new(store)),
            lexical: Arc::new(RwLock::new(lexical)),
            generator,
            weights,
        })
    }

    pub fn ranker(&self) -> HybridRanker {
        HybridRanker::new(self.vector.clone(), self.lexical.clone(), self.weights)
    }

    pub fn engine(&self) -> QaEngine {
        QaEngine::new(
            self.ranker(),
            self.generator.clone(),
            self.cache.clone(),
            self.config.search.top_k,
            Duration::from_secs(self.config.cache.answer_ttl_secs),
        )
    }

    /// Replace both indexes with a fresh build over `chunks`
    pub async fn rebuild_index(&self, chunks: Vec<ChunkRecord>) -> Result<BuildReport> {
        let report = self.vector.write().await.build(chunks.clone()).await?;
        *self.lexical.write().await = LexicalIndex::build(chunks);
        Ok(report)
    }

    /// Append `chunks` to the existing index, then rebuild the lexical
    /// index over the combined metadata
    pub async fn append_index(&self, chunks: Vec<ChunkRecord>) -> Result<BuildReport> {
        let report = self.vector.write().await.add(chunks).await?;
        let metadata = self.vector.read().await.metadata().to_vec();
        *self.lexical.write().await = LexicalIndex::build(metadata);
        Ok(report)
    }

    pub async fn clear_index(&self) -> Result<()> {
        self.vector.write().await.clear()?;
        *self.lexical.write().await = LexicalIndex::empty();
        Ok(())
    }

    /// Remove every cache entry across both namespaces
    pub fn clear_cache(&self) -> Result<usize> {
        match &self.cache {
            Some(cache) => Ok(cache.clear_all()?),
            None => Ok(0),
        }
    }

    pub async fn stats(&self) -> Result<AppStats> {
        use crate::cache::Namespace;

        let store = self.vector.read().await;
        let sources = distinct_sources(store.metadata());
        let (cached_embeddings, cached_answers) = match &self.cache {
            Some(cache) => (
                Some(cache.count(Namespace::Embedding)?),
                Some(cache.count(Namespace::Answer)?),
            ),
            None => (None, None),
        };
        Ok(AppStats {
            chunks: store.len(),
            sources,
            index_kind: store.kind(),
            cached_embeddings,
            cached_answers,
        })
    }
}

/// Number of distinct source documents in a chunk list
pub fn distinct_sources(chunks: &[ChunkRecord]) -> usize {
    let mut sources: Vec<&str> = chunks.iter().map(|c| c.source_id.as_str()).collect();
    sources.sort_unstable();
    sources.dedup();
    sources.len()
}
