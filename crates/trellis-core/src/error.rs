//! Error taxonomy shared across the trellis crates

use thiserror::Error;

/// Closed set of expected failure kinds.
///
/// Pure scoring and allocation code never fails because a budget is small;
/// it degrades. These variants cover caller mistakes, missing entities, and
/// the sync path's contention/IO failures. Anything outside this set is a
/// bug and propagates as a panic in tests.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller-supplied input rejected before any work was done.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An entry point did not resolve to any node.
    #[error("not found: {0}")]
    NotFound(String),

    /// A sync is already in flight for this repository.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A file could not be read as text during re-analysis.
    #[error("decode error: {0}")]
    DecodeError(String),

    /// Storage failed mid-sync; the whole batch was rolled back.
    #[error("transaction failure: {0}")]
    TransactionFailure(String),

    /// A sync exceeded its caller-specified deadline.
    #[error("timeout: {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, Error>;
