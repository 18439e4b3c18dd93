//! Type definitions for the memory store.
//!
//! `MemoryRecord` is the unified kernel: the dedup index, lineage links, and
//! retrieval scoring are all projections of this structure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier for memories
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)] // Serialize as plain UUID string, not array
pub struct MemoryId(pub Uuid);

impl MemoryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MemoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Visibility boundary of a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Visible to all agents of the user
    Global,
    /// Visible only to one named agent of the user
    Agent,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Agent => "agent",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type of memory, which selects the update strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// Stable, objective information. Restatements supersede.
    Fact,
    /// Temporary, current conditions. Latest wins; score decays with age.
    State,
    /// Past events. Append-only, never superseded.
    Episode,
    /// User preferences and rules. Fact-like supersession.
    Policy,
}

impl MemoryType {
    /// Whether a semantic near-duplicate retires the old row and chains the
    /// new one onto it. Episodes only ever append.
    pub fn supersedes(&self) -> bool {
        !matches!(self, MemoryType::Episode)
    }

    /// Whether retrieval scores decay with age.
    pub fn decays(&self) -> bool {
        matches!(self, MemoryType::State | MemoryType::Episode)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Fact => "fact",
            MemoryType::State => "state",
            MemoryType::Episode => "episode",
            MemoryType::Policy => "policy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fact" => Some(MemoryType::Fact),
            "state" => Some(MemoryType::State),
            "episode" => Some(MemoryType::Episode),
            "policy" => Some(MemoryType::Policy),
            _ => None,
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source channel of memory input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputChannel {
    Chat,
    Manual,
    Api,
    Import,
}

impl Default for InputChannel {
    fn default() -> Self {
        InputChannel::Api
    }
}

impl InputChannel {
    /// Provenance channel implied by a declared source.
    pub fn for_source(source: Option<&str>) -> Self {
        match source {
            Some("chat") => InputChannel::Chat,
            Some("import") => InputChannel::Import,
            _ => InputChannel::Api,
        }
    }
}

/// Stored memory record.
///
/// Temporal validity: a record is *current* while `valid_to` is `NULL`;
/// supersession sets the predecessor's `valid_to` to the successor's
/// `valid_from` in the same atomic write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: MemoryId,
    pub user_id: String,
    pub scope: Scope,
    /// Present iff `scope == Agent`
    pub agent_id: Option<String>,

    /// The normalized atomic assertion, original casing retained
    pub content: String,
    /// Hex SHA-256 of the canonical content; drives exact-duplicate suppression
    pub content_hash: Option<String>,
    /// Dense vector; must be present for the record to be semantically searchable
    pub embedding: Option<Vec<f32>>,

    pub memory_type: MemoryType,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Named references (e.g. "project": "atlas"), searchable by containment
    #[serde(default)]
    pub related_entities: serde_json::Map<String, Value>,

    /// Priority 1-5
    pub importance: u8,
    /// Extraction certainty 0.0-1.0
    pub confidence: f32,

    pub source: Option<String>,
    #[serde(default)]
    pub input_channel: InputChannel,

    /// When the described event actually occurred (mainly episodes)
    pub event_time: Option<DateTime<Utc>>,

    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    /// Back-link to the memory this one replaces
    pub supersedes_id: Option<MemoryId>,

    pub last_accessed: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryRecord {
    /// A memory is current iff it has not been retired.
    pub fn is_current(&self) -> bool {
        self.valid_to.is_none()
    }

    /// Point-in-time validity: `valid_from <= t < valid_to`.
    pub fn valid_at(&self, t: DateTime<Utc>) -> bool {
        self.valid_from <= t && self.valid_to.map(|end| end > t).unwrap_or(true)
    }

    /// Agent part of the dedup bucket key; global scope maps to "".
    pub fn agent_key(&self) -> &str {
        self.agent_id.as_deref().unwrap_or("")
    }

    /// Whether this record lives in the given `(user, scope, agent)` bucket.
    pub fn in_bucket(&self, user_id: &str, scope: Scope, agent_id: Option<&str>) -> bool {
        self.user_id == user_id
            && self.scope == scope
            && self.agent_key() == agent_id.unwrap_or("")
    }
}

// ============================================================================
// Audit log
// ============================================================================

/// Type of audit action performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Restore,
    Confirm,
    Reject,
}

/// Type of actor performing the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    System,
    User,
    Admin,
}

/// Append-only audit record. Rows are removed only when their memory is
/// hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub memory_id: MemoryId,
    pub action: AuditAction,
    pub actor_type: ActorType,
    /// Before/after diff of the affected fields
    pub diff: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        memory_id: MemoryId,
        action: AuditAction,
        actor_type: ActorType,
        diff: Option<Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            memory_id,
            action,
            actor_type,
            diff,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Ingest jobs
// ============================================================================

/// Lifecycle state of an ingest job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Accepted,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Accepted => "accepted",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

/// Result of one ingest run; mirrored into the job row and the API response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub created_count: usize,
    pub updated_count: usize,
    pub skipped_count: usize,
    pub memory_ids: Vec<MemoryId>,
    pub warnings: Vec<String>,
}

/// Persisted ingest job row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestJob {
    pub job_id: Uuid,
    pub idempotency_key: Option<String>,
    pub user_id: String,
    pub scope: Scope,
    pub agent_id: Option<String>,
    pub text: String,
    pub source: Option<String>,
    pub event_time: Option<DateTime<Utc>>,
    pub metadata: Option<Value>,
    pub received_at: DateTime<Utc>,
    pub status: JobStatus,
    pub result: Option<IngestOutcome>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(valid_to: Option<DateTime<Utc>>) -> MemoryRecord {
        let now = Utc::now();
        MemoryRecord {
            id: MemoryId::new(),
            user_id: "u1".into(),
            scope: Scope::Global,
            agent_id: None,
            content: "User lives in Tokyo".into(),
            content_hash: Some("ab".repeat(32)),
            embedding: None,
            memory_type: MemoryType::Fact,
            tags: vec![],
            related_entities: Default::default(),
            importance: 3,
            confidence: 0.7,
            source: None,
            input_channel: InputChannel::Api,
            event_time: None,
            valid_from: now,
            valid_to,
            supersedes_id: None,
            last_accessed: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_currency() {
        assert!(record(None).is_current());
        assert!(!record(Some(Utc::now())).is_current());
    }

    #[test]
    fn test_valid_at_interval() {
        let mut rec = record(None);
        let t0 = rec.valid_from;
        assert!(rec.valid_at(t0));
        assert!(rec.valid_at(t0 + chrono::Duration::days(365)));
        assert!(!rec.valid_at(t0 - chrono::Duration::seconds(1)));

        rec.valid_to = Some(t0 + chrono::Duration::hours(1));
        assert!(rec.valid_at(t0 + chrono::Duration::minutes(30)));
        // valid_to is exclusive
        assert!(!rec.valid_at(t0 + chrono::Duration::hours(1)));
    }

    #[test]
    fn test_type_strategies() {
        assert!(MemoryType::Fact.supersedes());
        assert!(MemoryType::State.supersedes());
        assert!(MemoryType::Policy.supersedes());
        assert!(!MemoryType::Episode.supersedes());

        assert!(!MemoryType::Fact.decays());
        assert!(!MemoryType::Policy.decays());
        assert!(MemoryType::State.decays());
        assert!(MemoryType::Episode.decays());
    }

    #[test]
    fn test_type_round_trip() {
        for t in [
            MemoryType::Fact,
            MemoryType::State,
            MemoryType::Episode,
            MemoryType::Policy,
        ] {
            assert_eq!(MemoryType::parse(t.as_str()), Some(t));
        }
        assert_eq!(MemoryType::parse("belief"), None);
    }

    #[test]
    fn test_bucket_membership() {
        let rec = record(None);
        assert!(rec.in_bucket("u1", Scope::Global, None));
        assert!(!rec.in_bucket("u2", Scope::Global, None));
        assert!(!rec.in_bucket("u1", Scope::Agent, Some("finance")));
    }

    #[test]
    fn test_memory_id_serializes_as_string() {
        let id = MemoryId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert!(json.starts_with('"'));
        let back: MemoryId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
