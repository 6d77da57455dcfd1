//! Shared types and errors for the Quarry text-to-SQL pipeline.
//!
//! This crate provides the foundational types used across all other Quarry crates:
//! - `QuarryError`: unified error taxonomy
//! - `Table` / `Column` / `ScoredTable`: schema metadata and relevance ranking
//! - `SqlCandidate` / `CheckResult` / `CandidateValidation`: arbitration records

mod candidate;
mod schema;

pub use candidate::*;
pub use schema::*;

/// Every failure a Quarry run can surface.
///
/// The first group comes from the LLM provider and is classified by
/// [`is_retryable`](QuarryError::is_retryable); the second from the other
/// collaborators. Check failures are never errors: they are recorded as
/// failing `CheckResult`s.
#[derive(Debug, thiserror::Error)]
pub enum QuarryError {
    #[error("LLM provider {provider} answered HTTP {status}: {message}")]
    ProviderError {
        provider: String,
        status: u16,
        message: String,
        retryable: bool,
    },

    #[error("LLM provider {provider} rate limited the request (retry in {retry_after_ms}ms)")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("LLM provider {provider} rejected the API key")]
    AuthError { provider: String },

    #[error("LLM provider {provider} did not answer within {timeout_ms}ms")]
    RequestTimeout {
        provider: String,
        timeout_ms: u64,
    },

    #[error("Schema store unavailable: {0}")]
    SchemaStoreUnavailable(String),

    #[error("Access directory error: {0}")]
    AccessDirectory(String),

    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("Generation failed for all {attempted} candidates: {message}")]
    GenerationFailed { attempted: usize, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Gave up on {operation} after {attempts} attempts")]
    RetriesExhausted { operation: String, attempts: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl QuarryError {
    /// Transient provider failures worth another call.
    pub fn is_retryable(&self) -> bool {
        match self {
            QuarryError::RateLimited { .. } | QuarryError::RequestTimeout { .. } => true,
            QuarryError::ProviderError { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Errors that end a run with `Err` instead of a degraded result.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            QuarryError::SchemaStoreUnavailable(_)
                | QuarryError::EmbeddingFailed(_)
                | QuarryError::GenerationFailed { .. }
                | QuarryError::AuthError { .. }
                | QuarryError::Config(_)
        )
    }
}

/// A convenience alias for `Result<T, QuarryError>`.
pub type Result<T> = std::result::Result<T, QuarryError>;

/// Round to four decimal places, the precision used for every reported score.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
