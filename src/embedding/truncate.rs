//! Token-budget clamping for embedding inputs
//!
//! Inputs longer than the service's token limit are cut to the budget
//! before transmission. The cut is a prefix of the original bytes ending
//! at a token boundary, so repeated runs over the same input produce
//! byte-identical results. Cache keys are always computed from the full,
//! unclamped text.

use std::path::Path;

use tokenizers::Tokenizer;

use super::provider::EmbeddingError;

enum TokenCounter {
    /// Exact counting through a tokenizer.json model file
    File(Box<Tokenizer>),
    /// Whitespace-run approximation when no tokenizer file is configured
    Whitespace,
}

/// Deterministic token-budget clamp
pub struct TokenBudget {
    counter: TokenCounter,
    max_tokens: usize,
}

impl TokenBudget {
    /// Budget backed by a tokenizer model file
    pub fn from_file(path: &Path, max_tokens: usize) -> Result<Self, EmbeddingError> {
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| EmbeddingError::Tokenizer(format!("{}: {}", path.display(), e)))?;
        Ok(Self {
            counter: TokenCounter::File(Box::new(tokenizer)),
            max_tokens,
        })
    }

    /// Budget counted over whitespace-separated runs
    pub fn whitespace(max_tokens: usize) -> Self {
        Self {
            counter: TokenCounter::Whitespace,
            max_tokens,
        }
    }

    /// Clamp `text` to the token budget, returning a byte-stable prefix.
    ///
    /// Inputs within the budget come back unchanged. A tokenizer failure
    /// leaves the text unclamped rather than failing the embedding path.
    pub fn clamp<'a>(&self, text: &'a str) -> &'a str {
        match &self.counter {
            TokenCounter::File(tokenizer) => match tokenizer.encode(text, false) {
                Ok(encoding) => {
                    let offsets = encoding.get_offsets();
                    if offsets.len() <= self.max_tokens {
                        return text;
                    }
                    let mut end = offsets[self.max_tokens - 1].1.min(text.len());
                    while end > 0 && !text.is_char_boundary(end) {
                        end -= 1;
                    }
                    &text[..end]
                }
                Err(e) => {
                    tracing::warn!("Tokenizer failed, sending text unclamped: {}", e);
                    text
                }
            },
            TokenCounter::Whitespace => {
                let mut count = 0;
                let mut end = 0;
                let mut in_token = false;
                for (i, ch) in text.char_indices() {
                    if ch.is_whitespace() {
                        in_token = false;
                    } else {
                        if !in_token {
                            in_token = true;
                            count += 1;
                            if count > self.max_tokens {
                                return &text[..end];
                            }
                        }
                        end = i + ch.len_utf8();
                    }
                }
                text
            }
        }
    }
}
