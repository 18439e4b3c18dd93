//! Request and response bodies for the HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapters::Synthesis;
use crate::memory::types::*;
use crate::memory::ScoredMemory;

fn default_scope() -> Scope {
    Scope::Global
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Ingest
// ============================================================================

/// Request body for POST /v1/ingest.
#[derive(Debug, Deserialize)]
pub struct IngestBody {
    pub text: String,
    pub source: Option<String>,
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    #[serde(default = "default_scope")]
    pub scope: Scope,
    pub event_time: Option<DateTime<Utc>>,
    pub metadata: Option<Value>,
}

/// 202 body for POST /v1/ingest.
#[derive(Debug, Serialize)]
pub struct IngestAccepted {
    pub job_id: String,
    pub status: &'static str,
}

/// Body for GET /v1/ingest/{job_id}.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<IngestOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<IngestJob> for JobStatusResponse {
    fn from(job: IngestJob) -> Self {
        Self {
            job_id: job.job_id.to_string(),
            status: job.status.as_str().to_string(),
            result: job.result,
            error: job.error,
        }
    }
}

// ============================================================================
// Memories CRUD
// ============================================================================

/// Request body for POST /v1/memories (force/manual create).
#[derive(Debug, Deserialize)]
pub struct MemoryCreateBody {
    pub content: String,
    pub memory_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    #[serde(default = "default_scope")]
    pub scope: Scope,
    #[serde(default)]
    pub related_entities: Option<serde_json::Map<String, Value>>,
    pub importance: Option<u8>,
    pub confidence: Option<f32>,
    pub source: Option<String>,
    pub event_time: Option<DateTime<Utc>>,
    /// Opt into near-duplicate supersession (off by default for manual writes)
    #[serde(default)]
    pub semantic_upsert: bool,
}

/// Request body for PATCH /v1/memories/{id}.
#[derive(Debug, Deserialize)]
pub struct MemoryPatchBody {
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub importance: Option<u8>,
    pub confidence: Option<f32>,
    pub related_entities: Option<serde_json::Map<String, Value>>,
}

/// Query parameters for GET /v1/memories.
#[derive(Debug, Deserialize)]
pub struct ListMemoriesQuery {
    pub user_id: Option<String>,
    pub scope: Option<Scope>,
    pub agent_id: Option<String>,
    pub memory_type: Option<String>,
    /// Comma-separated tags; all must be present
    pub tags: Option<String>,
    pub q: Option<String>,
    pub valid_at: Option<DateTime<Utc>>,
    pub event_time_from: Option<DateTime<Utc>>,
    pub event_time_to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

/// Query parameters for DELETE /v1/memories/{id}.
#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub hard: bool,
}

/// Query parameters for GET /v1/dump.
#[derive(Debug, Deserialize)]
pub struct DumpQuery {
    pub user_id: Option<String>,
    pub scope: Option<Scope>,
    pub agent_id: Option<String>,
    #[serde(default = "default_dump_format")]
    pub format: String,
}

fn default_dump_format() -> String {
    "json".to_string()
}

/// Memory payload for API responses: the full record minus the raw embedding
/// vector.
#[derive(Debug, Serialize)]
pub struct MemoryView {
    pub id: String,
    pub user_id: String,
    pub scope: Scope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub memory_type: MemoryType,
    pub tags: Vec<String>,
    pub related_entities: serde_json::Map<String, Value>,
    pub importance: u8,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub input_channel: InputChannel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_time: Option<DateTime<Utc>>,
    pub valid_from: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supersedes_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<MemoryRecord> for MemoryView {
    fn from(record: MemoryRecord) -> Self {
        Self {
            id: record.id.to_string(),
            user_id: record.user_id,
            scope: record.scope,
            agent_id: record.agent_id,
            content: record.content,
            content_hash: record.content_hash,
            memory_type: record.memory_type,
            tags: record.tags,
            related_entities: record.related_entities,
            importance: record.importance,
            confidence: record.confidence,
            source: record.source,
            input_channel: record.input_channel,
            event_time: record.event_time,
            valid_from: record.valid_from,
            valid_to: record.valid_to,
            supersedes_id: record.supersedes_id.map(|id| id.to_string()),
            last_accessed: record.last_accessed,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Body for GET /v1/memories.
#[derive(Debug, Serialize)]
pub struct MemoryListResponse {
    pub memories: Vec<MemoryView>,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

// ============================================================================
// Context (RAG)
// ============================================================================

/// Request body for POST /v1/context.
#[derive(Debug, Deserialize)]
pub struct ContextBody {
    pub query: String,
    pub app_context: Option<Value>,
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    #[serde(default = "default_scope")]
    pub scope: Scope,
    pub k: Option<usize>,
    #[serde(default = "default_true")]
    pub include_global: bool,
    #[serde(default)]
    pub return_evidence: bool,
}

/// Evidence item in the context response.
#[derive(Debug, Serialize)]
pub struct EvidenceItem {
    pub memory_id: String,
    pub similarity: f32,
    pub score: f32,
    pub content: String,
    pub memory_type: MemoryType,
}

impl From<&ScoredMemory> for EvidenceItem {
    fn from(scored: &ScoredMemory) -> Self {
        Self {
            memory_id: scored.memory.id.to_string(),
            similarity: scored.similarity,
            score: scored.score,
            content: scored.memory.content.clone(),
            memory_type: scored.memory.memory_type,
        }
    }
}

/// Response body for POST /v1/context.
#[derive(Debug, Serialize)]
pub struct ContextResponse {
    pub context: Synthesis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Vec<EvidenceItem>>,
}

// ============================================================================
// Health
// ============================================================================

/// Body for GET /health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: String,
    pub store: &'static str,
    pub adapters: &'static str,
    pub timestamp: DateTime<Utc>,
}
