//! Trellis Context — relevance scoring, token budgeting, and context assembly

pub mod budget;
pub mod cache;
pub mod config;
pub mod engine;
pub mod format;
pub mod score;
pub mod summarize;
pub mod tokens;

pub use budget::{AllocationResult, AllocatorLimits, BudgetAllocator, Strategy};
pub use cache::{CacheStats, RequestKey, ResultCache};
pub use config::AssemblyConfig;
pub use engine::{
    ContextEngine, ContextNode, ContextRequest, ContextResult, NullScorer, ProvidedScores,
    SemanticScorer,
};
pub use format::{OutputFormat, render};
pub use score::{HybridRanker, RankCandidate, RankWeights, structural_score};
pub use summarize::{ContentSummarizer, DetailLevel, Summary};
pub use tokens::TokenCounter;
