//! Question answering over retrieved resume context
//!
//! The engine runs each question through an answer cache, the hybrid
//! ranker, prompt assembly, and an OpenAI-compatible chat service.
//! Cached answers come back verbatim as a single unit; fresh answers
//! stream as fragments and are cached only once the provider stream
//! completes, so a partially consumed answer is never cached.

mod engine;
mod prompt;
mod provider;
mod remote;

pub use engine::{QaEngine, QueryResponse, QueryTimings, NO_MATCH_MESSAGE};
pub use prompt::{classify, format_context, QueryKind};
pub use provider::{ChatMessage, GenerationError, GenerationProvider};
pub use remote::RemoteGenerator;
