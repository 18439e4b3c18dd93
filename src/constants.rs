//! Tunable defaults in one place.
//!
//! Every value here that matters in production has a `ServerConfig` override;
//! the constants are the single source for defaults so config and tests stay
//! in sync.

/// Embedding vector dimension (Gemini text-embedding-004 default).
/// Changing this requires re-embedding the whole store.
pub const DEFAULT_EMBEDDING_DIM: usize = 768;

/// Cosine similarity above which a fact/state/policy chunk is treated as a
/// restatement of an existing memory and superseded instead of inserted.
pub const DEFAULT_UPSERT_THRESHOLD: f32 = 0.95;

/// A `state` memory older than this is demoted out of context evidence.
pub const DEFAULT_STATE_FRESHNESS_SECS: u64 = 86_400;

/// Character budget for assembled context evidence.
/// Sized to roughly 20% of the synthesizer input window.
pub const DEFAULT_CONTEXT_BUDGET_CHARS: usize = 6_000;

/// Half-life in days for the recency decay applied to state/episode scores.
pub const DECAY_HALF_LIFE_DAYS: f64 = 14.0;

/// Candidate pool floor for context retrieval: `k_fetch = max(3k, 30)`.
pub const CANDIDATE_FETCH_FLOOR: usize = 30;

/// Default / maximum `k` for POST /v1/context.
pub const DEFAULT_CONTEXT_K: usize = 10;
pub const MAX_CONTEXT_K: usize = 50;

/// Default / maximum page size for GET /v1/memories.
pub const DEFAULT_QUERY_LIMIT: usize = 50;
pub const MAX_QUERY_LIMIT: usize = 100;

/// Row cap for the admin dump endpoint.
pub const DUMP_LIMIT: usize = 10_000;

// ============================================================================
// Ingest job lifecycle
// ============================================================================

/// Background ingest worker pool size.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 4;

/// Jobs per user running at once. 1 preserves causal ordering of upserts.
pub const DEFAULT_PER_USER_CONCURRENCY: usize = 1;

/// Bounded job queue capacity. A full queue rejects with resource_exhausted.
pub const DEFAULT_JOB_QUEUE_CAPACITY: usize = 256;

/// Retention window for terminal job rows and idempotency keys.
pub const JOB_RETENTION_SECS: u64 = 86_400;

/// Sweep interval for the terminal-job garbage collector.
pub const JOB_GC_INTERVAL_SECS: u64 = 3_600;

/// Timeout for a single chunk (normalize + embed + dedup + store).
pub const CHUNK_TIMEOUT_SECS: u64 = 20;

/// Wall-clock cap for one ingest job.
pub const JOB_WALL_CLOCK_SECS: u64 = 300;

// ============================================================================
// Adapters
// ============================================================================

/// Max attempts for transient analyzer/embedder failures inside a job.
pub const ADAPTER_MAX_ATTEMPTS: u32 = 3;

/// Base backoff between adapter retries; doubles per attempt.
pub const ADAPTER_BACKOFF_BASE_MS: u64 = 200;

/// In-flight request cap per adapter.
pub const ADAPTER_MAX_IN_FLIGHT: usize = 8;

// ============================================================================
// Request handling
// ============================================================================

/// End-to-end deadline for synchronous endpoints.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Chunk extractions below this confidence add a warning to the job result.
pub const LOW_CONFIDENCE_WARNING: f32 = 0.5;

/// Development fallback user when a request omits `user_id`.
pub const DEFAULT_USER_ID: &str = "00000000-0000-0000-0000-000000000001";

/// Defaults for chunk metadata when the analyzer omits them.
pub const DEFAULT_IMPORTANCE: u8 = 3;
pub const DEFAULT_CONFIDENCE: f32 = 0.7;
