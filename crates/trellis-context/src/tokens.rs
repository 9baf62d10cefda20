//! Model-aware token accounting.
//!
//! Counting is a deterministic chars-per-token approximation with ceiling
//! division; each model family carries its own ratio. Truncation cuts on a
//! `char` boundary, so the result is always valid, decodable text.

use dashmap::DashMap;
use rayon::prelude::*;
use tracing::warn;

/// Chars-per-token used when the model identifier is unknown.
const DEFAULT_CHARS_PER_TOKEN: usize = 4;

/// Closed table of known model families, matched by prefix. Code-tuned
/// tokenizers pack fewer characters per token.
const MODEL_FAMILIES: &[(&str, usize)] = &[
    ("codellama", 3),
    ("starcoder", 3),
    ("deepseek", 3),
    ("gpt-", 4),
    ("o1", 4),
    ("o3", 4),
    ("claude", 4),
    ("gemini", 4),
    ("llama", 4),
];

/// Deterministic token counter. `count` for a given (text, model) pair
/// always returns the same value.
pub struct TokenCounter {
    /// Models already warned about, so the fallback diagnostic fires once.
    warned: DashMap<String, ()>,
}

impl TokenCounter {
    pub fn new() -> Self {
        TokenCounter {
            warned: DashMap::new(),
        }
    }

    fn chars_per_token(&self, model: &str) -> usize {
        for (prefix, ratio) in MODEL_FAMILIES {
            if model.starts_with(prefix) {
                return *ratio;
            }
        }
        if self.warned.insert(model.to_string(), ()).is_none() {
            warn!(model, "unknown model identifier, using default token scheme");
        }
        DEFAULT_CHARS_PER_TOKEN
    }

    /// Tokens needed for `text` under the given model.
    pub fn count(&self, text: &str, model: &str) -> u32 {
        let ratio = self.chars_per_token(model);
        text.chars().count().div_ceil(ratio) as u32
    }

    /// Batch variant; counts many texts in parallel.
    pub fn count_batch(&self, texts: &[&str], model: &str) -> Vec<u32> {
        let ratio = self.chars_per_token(model);
        texts
            .par_iter()
            .map(|text| text.chars().count().div_ceil(ratio) as u32)
            .collect()
    }

    /// Longest prefix of `text` that fits in `max_tokens`. Cuts on a char
    /// boundary; the result always decodes and never exceeds the limit.
    pub fn truncate_to_tokens(&self, text: &str, max_tokens: u32, model: &str) -> String {
        let ratio = self.chars_per_token(model);
        let max_chars = max_tokens as usize * ratio;
        if text.chars().count() <= max_chars {
            return text.to_string();
        }
        text.chars().take(max_chars).collect()
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}
