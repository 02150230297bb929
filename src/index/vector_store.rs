//! Vector index over embedded chunks with durable persistence
//!
//! Owns the persisted pair (index blob + metadata records) under the
//! configured directory. The two artifacts are written together and only
//! trusted together: a missing half or a count mismatch is treated as no
//! index at all. Searches lazily load the pair on first use.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use ndarray::{Array1, Array2};
use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::corpus::ChunkRecord;
use crate::embedding::CachedEmbedder;

use super::dense::{DenseIndex, IndexSnapshot};
use super::IndexError;

const INDEX_FILE: &str = "index.bin";
const METADATA_FILE: &str = "metadata.json";

/// One vector-path search hit
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk: ChunkRecord,
    /// `1 / (1 + d)` over squared Euclidean distance, in (0,1]
    pub similarity: f32,
}

/// Outcome of a batch build or add
#[derive(Debug, Clone)]
pub struct BuildReport {
    /// Chunks embedded and inserted
    pub indexed: usize,
    /// Chunks whose embedding degraded to the zero vector
    pub degraded: usize,
    pub duration_ms: u64,
}

/// Dense index plus parallel metadata, persisted as a pair
pub struct VectorStore {
    embedder: Arc<CachedEmbedder>,
    config: IndexConfig,
    index: Option<DenseIndex>,
    metadata: Vec<ChunkRecord>,
}

impl VectorStore {
    pub fn new(embedder: Arc<CachedEmbedder>, config: IndexConfig) -> Self {
        Self {
            embedder,
            config,
            index: None,
            metadata: Vec::new(),
        }
    }

    /// Number of indexed chunks
    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    /// Structure kind for diagnostics: flat, clustered, or none
    pub fn kind(&self) -> &'static str {
        self.index.as_ref().map_or("none", |i| i.kind())
    }

    pub fn metadata(&self) -> &[ChunkRecord] {
        &self.metadata
    }

    fn index_path(&self) -> PathBuf {
        self.config.data_dir.join(INDEX_FILE)
    }

    fn metadata_path(&self) -> PathBuf {
        self.config.data_dir.join(METADATA_FILE)
    }

    /// Embed all chunks and build a fresh structure, replacing any
    /// previous state, then persist the pair.
    pub async fn build(&mut self, chunks: Vec<ChunkRecord>) -> Result<BuildReport, IndexError> {
        let started = Instant::now();

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await;
        let degraded = embeddings.iter().filter(|e| e.degraded).count();

        let vectors = to_matrix(&embeddings, self.embedder.dimension())?;
        self.index = Some(DenseIndex::build(vectors, &self.config));
        self.metadata = chunks;
        self.persist()?;

        let report = BuildReport {
            indexed: self.metadata.len(),
            degraded,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        if report.degraded > 0 {
            warn!(
                degraded = report.degraded,
                "Index built with zero-vector substitutions"
            );
        }
        info!(
            chunks = report.indexed,
            kind = self.kind(),
            duration_ms = report.duration_ms,
            "Vector index built"
        );
        Ok(report)
    }

    /// Append chunks to the existing structure. Without a resident or
    /// persisted index this is equivalent to `build`.
    pub async fn add(&mut self, chunks: Vec<ChunkRecord>) -> Result<BuildReport, IndexError> {
        if self.index.is_none() {
            self.load()?;
        }
        if self.index.is_none() {
            return self.build(chunks).await;
        }

        let started = Instant::now();
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await;
        let degraded = embeddings.iter().filter(|e| e.degraded).count();

        let vectors = to_matrix(&embeddings, self.embedder.dimension())?;
        if let Some(index) = self.index.as_mut() {
            index.add(vectors.view())?;
        }
        self.metadata.extend(chunks);
        self.persist()?;

        let report = BuildReport {
            indexed: self.metadata.len(),
            degraded,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        if report.degraded > 0 {
            warn!(
                degraded = report.degraded,
                "Chunks added with zero-vector substitutions"
            );
        }
        Ok(report)
    }

    /// Nearest chunks to the query text, best first, at most `k`.
    ///
    /// Lazily loads the persisted pair when no index is resident; with
    /// nothing persisted either, returns an empty list.
    pub async fn search(&mut self, query: &str, k: usize) -> Result<Vec<VectorHit>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        if self.index.is_none() && !self.load()? {
            debug!("No vector index present, returning no hits");
            return Ok(Vec::new());
        }
        let Some(index) = self.index.as_ref() else {
            return Ok(Vec::new());
        };

        let embedding = self.embedder.embed(query).await;
        if embedding.degraded {
            warn!("Query embedding degraded to zero vector, ranking by vector norm only");
        }
        let query_vector = Array1::from_vec(embedding.vector);

        let hits = index
            .search(query_vector.view(), k)
            .into_iter()
            .filter_map(|(row, distance)| {
                self.metadata.get(row).map(|chunk| VectorHit {
                    chunk: chunk.clone(),
                    similarity: 1.0 / (1.0 + distance),
                })
            })
            .collect();
        Ok(hits)
    }

    /// Write the index blob and metadata records together
    pub fn persist(&self) -> Result<(), IndexError> {
        let Some(index) = self.index.as_ref() else {
            return Ok(());
        };

        std::fs::create_dir_all(&self.config.data_dir).map_err(|e| IndexError::Io {
            source: e,
            context: format!("creating index directory {}", self.config.data_dir.display()),
        })?;

        let snapshot = index.to_snapshot();
        let blob = bincode::serde::encode_to_vec(&snapshot, bincode::config::standard())
            .map_err(|e| IndexError::Codec(e.to_string()))?;
        write_atomic(&self.index_path(), &blob)?;

        let records = serde_json::to_vec(&self.metadata)?;
        write_atomic(&self.metadata_path(), &records)?;

        debug!(
            chunks = self.metadata.len(),
            dir = %self.config.data_dir.display(),
            "Persisted index pair"
        );
        Ok(())
    }

    /// Load the persisted pair. Returns false (leaving the store empty)
    /// when nothing usable is persisted: a missing half, a decode
    /// failure, or a count/dimension mismatch all count as no index.
    pub fn load(&mut self) -> Result<bool, IndexError> {
        let index_path = self.index_path();
        let metadata_path = self.metadata_path();

        match (index_path.exists(), metadata_path.exists()) {
            (false, false) => return Ok(false),
            (true, true) => {}
            _ => {
                warn!(
                    dir = %self.config.data_dir.display(),
                    "Half of the index pair is missing, treating as no index"
                );
                return Ok(false);
            }
        }

        let blob = std::fs::read(&index_path).map_err(|e| IndexError::Io {
            source: e,
            context: format!("reading {}", index_path.display()),
        })?;
        let snapshot: IndexSnapshot =
            match bincode::serde::decode_from_slice(&blob, bincode::config::standard()) {
                Ok((snapshot, _)) => snapshot,
                Err(e) => {
                    warn!("Index blob is unreadable, treating as no index: {}", e);
                    return Ok(false);
                }
            };

        let records = std::fs::read(&metadata_path).map_err(|e| IndexError::Io {
            source: e,
            context: format!("reading {}", metadata_path.display()),
        })?;
        let metadata: Vec<ChunkRecord> = match serde_json::from_slice(&records) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Index metadata is unreadable, treating as no index: {}", e);
                return Ok(false);
            }
        };

        if snapshot.len() != metadata.len() {
            warn!(
                vectors = snapshot.len(),
                records = metadata.len(),
                "Index pair is inconsistent, treating as no index"
            );
            return Ok(false);
        }
        if snapshot.dimension() != self.embedder.dimension() {
            warn!(
                persisted = snapshot.dimension(),
                configured = self.embedder.dimension(),
                "Persisted dimension does not match the embedder, treating as no index"
            );
            return Ok(false);
        }

        let index = match DenseIndex::from_snapshot(snapshot) {
            Ok(index) => index,
            Err(e) => {
                warn!("Index snapshot is malformed, treating as no index: {}", e);
                return Ok(false);
            }
        };

        info!(chunks = metadata.len(), kind = index.kind(), "Loaded index pair");
        self.index = Some(index);
        self.metadata = metadata;
        Ok(true)
    }

    /// Drop in-memory state and remove both persisted artifacts
    pub fn clear(&mut self) -> Result<(), IndexError> {
        self.index = None;
        self.metadata.clear();

        for path in [self.index_path(), self.metadata_path()] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(IndexError::Io {
                        source: e,
                        context: format!("removing {}", path.display()),
                    })
                }
            }
        }
        Ok(())
    }
}

fn to_matrix(embeddings: &[crate::embedding::Embedding], dimension: usize) -> Result<Array2<f32>, IndexError> {
    let mut flat = Vec::with_capacity(embeddings.len() * dimension);
    for embedding in embeddings {
        if embedding.vector.len() != dimension {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                actual: embedding.vector.len(),
            });
        }
        flat.extend_from_slice(&embedding.vector);
    }
    Array2::from_shape_vec((embeddings.len(), dimension), flat)
        .map_err(|e| IndexError::Codec(e.to_string()))
}

fn write_atomic(path: &std::path::Path, bytes: &[u8]) -> Result<(), IndexError> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes).map_err(|e| IndexError::Io {
        source: e,
        context: format!("writing {}", tmp.display()),
    })?;
    std::fs::rename(&tmp, path).map_err(|e| IndexError::Io {
        source: e,
        context: format!("renaming {} into place", tmp.display()),
    })?;
    Ok(())
}
