//! Vitaq - Resume Question Answering
//!
//! Indexes resume collections into a dense vector index and a BM25
//! keyword index, fuses both retrieval paths per query, and answers
//! questions through an OpenAI-compatible service with streaming output
//! and content-addressed caching of embeddings and answers.

pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod error;
pub mod index;
pub mod qa;
pub mod retrieval;

pub use error::{Result, VitaqError};
