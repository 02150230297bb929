//! Vector and lexical indexes
//!
//! Both indexes are built over the same chunk list. The vector index owns
//! the persisted pair (index blob + metadata records) and its on-disk
//! layout; the lexical index is cheap enough to rebuild wholesale from the
//! chunks on every build.

mod dense;
mod lexical;
mod vector_store;

pub use dense::{DenseIndex, IndexSnapshot};
pub use lexical::LexicalIndex;
pub use vector_store::{BuildReport, VectorHit, VectorStore};

use thiserror::Error;

/// Errors that can occur during index operations
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Index IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    #[error("Index snapshot error: {0}")]
    Codec(String),

    #[error("Metadata serialization error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}
