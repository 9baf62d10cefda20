//! Content-detail degradation to fit a token target

use serde::Serialize;
use trellis_core::Node;

use crate::tokens::TokenCounter;

/// Detail levels, most to least detailed. The summarizer always picks the
/// least-lossy level that fits the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    /// Verbatim content.
    Full,
    /// Signature plus docstring, the docstring truncated to fit.
    Signature,
    /// Signature only.
    Stub,
    /// Name and location only, no body text.
    Reference,
}

impl std::fmt::Display for DetailLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DetailLevel::Full => "full",
            DetailLevel::Signature => "signature",
            DetailLevel::Stub => "stub",
            DetailLevel::Reference => "reference",
        };
        write!(f, "{name}")
    }
}

/// A node's content degraded to fit a token target. The node's path and
/// line range are carried as structured fields by the caller at every
/// level; `text` is only the body budgeted against tokens.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub level: DetailLevel,
    pub text: String,
    pub token_count: u32,
}

/// Degrades node content through the detail levels.
pub struct ContentSummarizer<'a> {
    counter: &'a TokenCounter,
    model: &'a str,
}

impl<'a> ContentSummarizer<'a> {
    pub fn new(counter: &'a TokenCounter, model: &'a str) -> Self {
        ContentSummarizer { counter, model }
    }

    /// Pick the least-lossy detail level whose text fits `target_tokens`.
    /// Never fails: REFERENCE (empty body) fits any target, including zero.
    pub fn summarize(&self, node: &Node, target_tokens: u32) -> Summary {
        let full_count = self.counter.count(&node.content, self.model);
        if full_count <= target_tokens {
            return Summary {
                level: DetailLevel::Full,
                text: node.content.clone(),
                token_count: full_count,
            };
        }

        if let Some(signature) = node.signature.as_deref().filter(|s| !s.is_empty()) {
            let sig_count = self.counter.count(signature, self.model);
            if sig_count <= target_tokens {
                let remaining = target_tokens - sig_count;
                if let Some(doc) = node.docstring.as_deref().filter(|d| !d.is_empty()) {
                    if remaining >= 2 {
                        let doc_cut = self.counter.truncate_to_tokens(doc, remaining - 1, self.model);
                        if !doc_cut.is_empty() {
                            let text = format!("{signature}\n{doc_cut}");
                            let token_count = self.counter.count(&text, self.model);
                            return Summary {
                                level: DetailLevel::Signature,
                                text,
                                token_count,
                            };
                        }
                    }
                }
                return Summary {
                    level: DetailLevel::Stub,
                    text: signature.to_string(),
                    token_count: sig_count,
                };
            }
        }

        Summary {
            level: DetailLevel::Reference,
            text: String::new(),
            token_count: 0,
        }
    }
}
