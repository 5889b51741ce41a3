//! Centralized default constants for previsa.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers. Organized by domain area.

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Default number of jobs executed concurrently by one queue instance.
pub const JOB_CONCURRENCY: usize = 3;

/// Default maximum attempts per job (first run included).
pub const JOB_MAX_ATTEMPTS: i32 = 3;

/// Base delay for retry backoff in milliseconds; attempt `n` waits `base * 2^(n-1)`.
pub const JOB_BACKOFF_BASE_MS: u64 = 1_000;

/// Upper bound on the backoff exponent so large attempt limits cannot overflow.
pub const JOB_BACKOFF_MAX_EXPONENT: u32 = 16;

/// Tries of a job state write (complete, requeue, fail) before the row is
/// left for crash recovery.
pub const JOB_STORE_WRITE_ATTEMPTS: i32 = 5;

/// Broadcast capacity for queue lifecycle events.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// MATCHING
// =============================================================================

/// Weight of the vector (semantic) similarity in the combined score.
pub const VECTOR_WEIGHT: f64 = 0.7;

/// Weight of the lexical (trigram) similarity in the combined score.
pub const LEXICAL_WEIGHT: f64 = 0.3;

/// Candidate practices requested per extracted line item.
pub const PRACTICE_CANDIDATE_LIMIT: usize = 10;

/// Maximum providers returned by a fuzzy provider search.
pub const PROVIDER_CANDIDATE_LIMIT: usize = 5;

/// Maximum alternative matches kept per line item.
pub const MAX_ALTERNATIVES: usize = 5;

/// Minimum trigram similarity for a lexical-only candidate (pg_trgm `%` default).
pub const LEXICAL_MATCH_THRESHOLD: f64 = 0.3;

/// Maximum characters of normalized text used for matching and embedding.
pub const NORMALIZED_TEXT_MAX_CHARS: usize = 8_000;

// =============================================================================
// PRE-AUTHORIZATION
// =============================================================================

/// Aggregates scoring below this confidence are flagged for human review.
pub const REVIEW_THRESHOLD: f64 = 0.85;

/// Confidence assumed for a patient/order section that is present but carries
/// no extracted confidence of its own.
pub const PRESENCE_CONFIDENCE: f64 = 0.9;

/// Health plan used when the request does not name one.
pub const DEFAULT_PLAN_ID: i32 = 1;

/// Page size of the pending review listing.
pub const PENDING_LIST_LIMIT: usize = 50;

// =============================================================================
// EMBEDDING
// =============================================================================

/// Default embedding model name (OpenAI-compatible providers).
pub const EMBED_MODEL: &str = "text-embedding-3-small";

/// Default embedding vector dimension for text-embedding-3-small.
pub const EMBED_DIMENSION: usize = 1536;

/// Default embedding model name (Ollama).
pub const OLLAMA_EMBED_MODEL: &str = "nomic-embed-text";

/// Default embedding dimension for nomic-embed-text.
pub const OLLAMA_EMBED_DIMENSION: usize = 768;

/// Default Ollama base URL.
pub const OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Timeout for embedding requests in seconds.
pub const EMBED_TIMEOUT_SECS: u64 = 30;

/// Maximum texts sent to the provider in one request.
pub const EMBED_BATCH_SIZE: usize = 100;

/// Maximum entries kept by the in-process embedding cache.
pub const EMBED_CACHE_CAPACITY: usize = 500;

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Default webhook HTTP request timeout in seconds.
pub const WEBHOOK_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// DATABASE
// =============================================================================

/// Default maximum connections in the PostgreSQL pool.
pub const DB_MAX_CONNECTIONS: u32 = 10;

/// Default minimum idle connections in the PostgreSQL pool.
pub const DB_MIN_CONNECTIONS: u32 = 1;

/// Default timeout for acquiring a pooled connection in seconds.
pub const DB_ACQUIRE_TIMEOUT_SECS: u64 = 30;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_sum_to_one() {
        assert!((VECTOR_WEIGHT + LEXICAL_WEIGHT - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_review_threshold_below_presence_confidence() {
        assert!(REVIEW_THRESHOLD < PRESENCE_CONFIDENCE);
    }

    #[test]
    fn test_alternatives_fit_in_candidate_window() {
        assert!(MAX_ALTERNATIVES < PRACTICE_CANDIDATE_LIMIT);
    }
}
