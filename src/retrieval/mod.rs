//! Hybrid retrieval: fusion of vector and lexical search paths

mod fusion;
mod hybrid;

pub use fusion::FusionWeights;
pub use hybrid::{HybridRanker, RankedResult, SearchFilters};

use thiserror::Error;

/// Errors that can occur during hybrid search
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Vector search failed: {0}")]
    Vector(#[from] crate::index::IndexError),

    #[error("Invalid search parameters: {0}")]
    InvalidParams(String),
}
