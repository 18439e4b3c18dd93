//! Cortex-Memory Library
//!
//! Knowledge-management microservice for AI agents: ingests unstructured
//! utterances, materializes them as versioned, deduplicated memories in an
//! embedded vector-aware store, and serves filtered retrieval plus ranked,
//! synthesized context.
//!
//! # Core pieces
//! - Memory Manager: analyze -> normalize -> embed -> dedup -> upsert, with
//!   per-type supersession strategies and full audit trails
//! - Retrieval engine: hybrid search, multi-factor ranking, temporal
//!   cutoffs, scope-prioritized merge
//! - Job manager: bounded queue, per-user serialized background ingestion,
//!   idempotency keys
//! - RocksDB-backed store with dedup and lineage invariants

pub mod adapters;
pub mod auth;
pub mod config;
pub mod constants;
pub mod errors;
pub mod handlers;
pub mod jobs;
pub mod memory;
pub mod metrics;
pub mod middleware;
pub mod normalizer;
pub mod similarity;
pub mod synthesizer;
pub mod validation;

// Re-export dependencies so tests and benchmarks share the same versions
pub use chrono;
pub use parking_lot;
pub use serde_json;
pub use uuid;
