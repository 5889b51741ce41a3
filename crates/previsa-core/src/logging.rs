//! Structured logging schema and field name constants for previsa.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query by the same names across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration, high-volume data (candidate hits) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "inference", "matching", "jobs", "worker"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "queue", "engine", "generator", "openai", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "enqueue", "find_candidates", "embed_texts", "recover"
pub const OPERATION: &str = "op";

/// Tenant the operation runs on behalf of.
pub const TENANT_ID: &str = "tenant_id";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Job type enum variant.
pub const JOB_TYPE: &str = "job_type";

/// Batch UUID grouping jobs.
pub const BATCH_ID: &str = "batch_id";

/// Pre-authorization UUID produced by the generator.
pub const PRE_AUTHORIZATION_ID: &str = "pre_authorization_id";

/// Catalog kind being searched ("practice", "provider").
pub const CATALOG_KIND: &str = "catalog_kind";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of results returned by a search or query.
pub const RESULT_COUNT: &str = "result_count";

/// Number of input texts sent to an embedding model.
pub const INPUT_COUNT: &str = "input_count";

/// Attempt number of a job execution (1-based).
pub const ATTEMPT: &str = "attempt";

/// Retry delay in milliseconds.
pub const DELAY_MS: &str = "delay_ms";

/// Overall confidence of a generated pre-authorization.
pub const CONFIDENCE: &str = "confidence";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Model name used for embedding.
pub const MODEL: &str = "model";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
