//! Generation provider trait and message types

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from the text-generation service
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Generation request failed: {0}")]
    Request(String),

    #[error("Generation service returned an empty response")]
    EmptyResponse,

    #[error("Generation stream failed: {0}")]
    Stream(String),
}

/// One role-tagged message in a chat request
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Chat completion service
///
/// `stream` hands back a channel of text fragments in arrival order; the
/// channel closes when the service signals the end of the stream. Errors
/// mid-stream arrive on the same channel and terminate it.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Single full response
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, GenerationError>;

    /// Single full response constrained to a JSON object
    async fn complete_json(&self, messages: &[ChatMessage]) -> Result<String, GenerationError> {
        self.complete(messages).await
    }

    /// Incremental fragments as they arrive
    async fn stream(
        &self,
        messages: &[ChatMessage],
    ) -> Result<mpsc::Receiver<Result<String, GenerationError>>, GenerationError>;

    fn model_name(&self) -> &str;
}
