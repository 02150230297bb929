//! Embedding provider adapter
//!
//! Wraps an external OpenAI-compatible embedding service with a
//! content-addressed cache, a token-budget clamp, and a zero-vector
//! degradation path so that index construction always completes with one
//! vector per chunk.

mod cached;
mod provider;
mod remote;
mod truncate;

pub use cached::CachedEmbedder;
pub use provider::{EmbeddingError, EmbeddingProvider};
pub use remote::RemoteEmbedder;
pub use truncate::TokenBudget;

/// One embedding result with its degradation marker.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    /// True when the service call failed and a zero vector was substituted
    pub degraded: bool,
}

impl Embedding {
    pub fn zero(dimension: usize) -> Self {
        Self {
            vector: vec![0.0; dimension],
            degraded: true,
        }
    }
}
