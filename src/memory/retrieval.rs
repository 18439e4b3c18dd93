//! Retrieval engine: structured queries and ranked RAG candidate selection.
//!
//! Two public operations. `query` applies structured filters with stable
//! `(created_at DESC, id)` cursor pagination. `context` runs the hybrid
//! search: vector candidates per scope bucket, temporal filtering, the
//! multi-factor score, scope-aware tie-breaks, and the character-budget
//! cutoff.

use base64::Engine as _;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::adapters::Adapters;
use crate::config::ServerConfig;
use crate::constants::{CANDIDATE_FETCH_FLOOR, DECAY_HALF_LIFE_DAYS};
use crate::errors::{AppError, Result};
use crate::similarity::top_k_similar;

use super::store::MemoryStore;
use super::types::*;

/// Structured filter for GET /v1/memories.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub user_id: String,
    pub scope: Option<Scope>,
    pub agent_id: Option<String>,
    pub memory_type: Option<MemoryType>,
    /// All listed tags must be present (containment)
    pub tags: Vec<String>,
    /// All listed pairs must be present in related_entities (containment)
    pub related_entities: serde_json::Map<String, serde_json::Value>,
    /// Case-insensitive substring over content
    pub q: Option<String>,
    /// Point-in-time view; absent means current rows only
    pub valid_at: Option<DateTime<Utc>>,
    pub event_time_from: Option<DateTime<Utc>>,
    pub event_time_to: Option<DateTime<Utc>>,
    pub limit: usize,
    pub cursor: Option<String>,
}

/// One page of query results.
#[derive(Debug)]
pub struct QueryPage {
    pub memories: Vec<MemoryRecord>,
    pub next_cursor: Option<String>,
}

/// Parameters for POST /v1/context retrieval.
#[derive(Debug, Clone)]
pub struct ContextParams {
    pub user_id: String,
    pub query: String,
    pub app_context: Option<serde_json::Value>,
    pub scope: Scope,
    pub agent_id: Option<String>,
    pub k: usize,
    pub include_global: bool,
}

/// A candidate that survived filtering, with its score breakdown.
#[derive(Debug, Clone)]
pub struct ScoredMemory {
    pub memory: MemoryRecord,
    pub similarity: f32,
    pub score: f32,
}

pub struct RetrievalEngine {
    store: Arc<MemoryStore>,
    adapters: Adapters,
    state_freshness_window: chrono::Duration,
    context_budget_chars: usize,
}

impl RetrievalEngine {
    pub fn new(store: Arc<MemoryStore>, adapters: Adapters, config: &ServerConfig) -> Self {
        Self {
            store,
            adapters,
            state_freshness_window: chrono::Duration::from_std(config.state_freshness_window)
                .unwrap_or_else(|_| chrono::Duration::hours(24)),
            context_budget_chars: config.context_budget_chars,
        }
    }

    // ========================================================================
    // Structured query
    // ========================================================================

    /// Filtered, paginated read over one user's memories.
    #[tracing::instrument(skip(self, filter), fields(user_id = %filter.user_id))]
    pub async fn query(&self, filter: QueryFilter) -> Result<QueryPage> {
        let store = self.store.clone();
        let user_id = filter.user_id.clone();
        let mut rows = tokio::task::spawn_blocking(move || store.user_memories(&user_id))
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("query task panicked: {e}")))?
            .map_err(AppError::Internal)?;

        rows.retain(|m| matches_filter(m, &filter));

        // Stable order: newest first, id as tiebreaker
        rows.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.0.cmp(&b.id.0))
        });

        if let Some(cursor) = &filter.cursor {
            let (created_at, id) = decode_cursor(cursor)
                .ok_or_else(|| AppError::invalid_argument("cursor", "malformed cursor"))?;
            // Keep only rows strictly after the cursor position in
            // (created_at DESC, id ASC) order
            rows.retain(|m| match m.created_at.cmp(&created_at) {
                Ordering::Less => true,
                Ordering::Equal => m.id.0 > id,
                Ordering::Greater => false,
            });
        }

        let has_more = rows.len() > filter.limit;
        rows.truncate(filter.limit);
        let next_cursor = if has_more {
            rows.last().map(|m| encode_cursor(m.created_at, m.id.0))
        } else {
            None
        };

        Ok(QueryPage {
            memories: rows,
            next_cursor,
        })
    }

    // ========================================================================
    // Context retrieval (RAG)
    // ========================================================================

    /// Hybrid search producing ranked evidence for synthesis. Best-effort
    /// `last_accessed` touch on everything returned.
    #[tracing::instrument(skip(self, params), fields(user_id = %params.user_id, k = params.k))]
    pub async fn context(&self, params: ContextParams) -> Result<Vec<ScoredMemory>> {
        let mut probe = params.query.clone();
        if let Some(ctx) = &params.app_context {
            probe.push('\n');
            probe.push_str(&ctx.to_string());
        }

        let query_embedding = self
            .adapters
            .embed_one(&probe)
            .await
            .map_err(|e| AppError::Unavailable(format!("embedder unavailable: {e}")))?;

        let store = self.store.clone();
        let user_id = params.user_id.clone();
        let rows = tokio::task::spawn_blocking(move || store.user_memories(&user_id))
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("context task panicked: {e}")))?
            .map_err(AppError::Internal)?;

        let now = Utc::now();
        let k_fetch = (3 * params.k).max(CANDIDATE_FETCH_FLOOR);

        // Candidate fetch per scope bucket
        let mut candidates: Vec<(bool, f32, MemoryRecord)> = Vec::new();
        match params.scope {
            Scope::Agent => {
                self.fetch_bucket(
                    &rows,
                    &query_embedding,
                    Scope::Agent,
                    params.agent_id.as_deref(),
                    k_fetch,
                    true,
                    &mut candidates,
                );
                if params.include_global {
                    self.fetch_bucket(
                        &rows,
                        &query_embedding,
                        Scope::Global,
                        None,
                        k_fetch,
                        false,
                        &mut candidates,
                    );
                }
            }
            Scope::Global => {
                self.fetch_bucket(
                    &rows,
                    &query_embedding,
                    Scope::Global,
                    None,
                    k_fetch,
                    false,
                    &mut candidates,
                );
            }
        }

        // Temporal filter: retired rows never made it into the buckets;
        // stale states are demoted out of evidence here (not mutated).
        candidates.retain(|(_, _, m)| {
            m.memory_type != MemoryType::State
                || now.signed_duration_since(m.updated_at) <= self.state_freshness_window
        });

        // Score and order
        let mut scored: Vec<(bool, ScoredMemory)> = candidates
            .into_iter()
            .map(|(agent_scoped, sim, memory)| {
                let score = rank_score(&memory, sim, now);
                (
                    agent_scoped,
                    ScoredMemory {
                        memory,
                        similarity: sim,
                        score,
                    },
                )
            })
            .collect();

        scored.sort_by(|(a_agent, a), (b_agent, b)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                // agent-scoped beats global at equal score
                .then_with(|| b_agent.cmp(a_agent))
                .then_with(|| b.memory.importance.cmp(&a.memory.importance))
                .then_with(|| b.memory.updated_at.cmp(&a.memory.updated_at))
                .then_with(|| a.memory.id.0.cmp(&b.memory.id.0))
        });

        // Budget cutoff: keep at most k, stop before blowing the char budget
        let mut result: Vec<ScoredMemory> = Vec::new();
        let mut used_chars = 0usize;
        for (_, candidate) in scored {
            if result.len() >= params.k {
                break;
            }
            let len = candidate.memory.content.chars().count();
            if !result.is_empty() && used_chars + len > self.context_budget_chars {
                break;
            }
            used_chars += len;
            result.push(candidate);
        }

        // Touch is best-effort; retrieval does not fail with it
        let touched: Vec<MemoryId> = result.iter().map(|s| s.memory.id).collect();
        if !touched.is_empty() {
            let store = self.store.clone();
            let _ = tokio::task::spawn_blocking(move || {
                if let Err(e) = store.touch_last_accessed(&touched, now) {
                    tracing::warn!(error = %e, "last_accessed touch failed");
                }
            });
        }

        Ok(result)
    }

    fn fetch_bucket(
        &self,
        rows: &[MemoryRecord],
        query_embedding: &[f32],
        scope: Scope,
        agent_id: Option<&str>,
        k_fetch: usize,
        agent_scoped: bool,
        out: &mut Vec<(bool, f32, MemoryRecord)>,
    ) {
        let bucket: Vec<(Vec<f32>, MemoryRecord)> = rows
            .iter()
            .filter(|m| m.is_current() && m.scope == scope)
            .filter(|m| agent_id.is_none() || m.agent_id.as_deref() == agent_id)
            .filter_map(|m| m.embedding.clone().map(|e| (e, m.clone())))
            .collect();

        for (sim, memory) in top_k_similar(query_embedding, &bucket, k_fetch) {
            out.push((agent_scoped, sim, memory));
        }
    }
}

/// Multi-factor ranking score.
///
/// `sim * w_importance * w_confidence * decay` with negative similarities
/// clamped to zero; fact/policy never decay, state/episode halve every
/// [`DECAY_HALF_LIFE_DAYS`].
pub fn rank_score(memory: &MemoryRecord, similarity: f32, now: DateTime<Utc>) -> f32 {
    let sim = similarity.clamp(0.0, 1.0);
    let w_importance = 0.6 + 0.1 * memory.importance as f32;
    let w_confidence = 0.5 + 0.5 * memory.confidence;
    let decay = if memory.memory_type.decays() {
        let age_days =
            now.signed_duration_since(memory.created_at).num_seconds() as f64 / 86_400.0;
        (-(age_days.max(0.0)) * std::f64::consts::LN_2 / DECAY_HALF_LIFE_DAYS).exp() as f32
    } else {
        1.0
    };
    sim * w_importance * w_confidence * decay
}

fn matches_filter(memory: &MemoryRecord, filter: &QueryFilter) -> bool {
    match filter.valid_at {
        Some(t) => {
            if !memory.valid_at(t) {
                return false;
            }
        }
        None => {
            if !memory.is_current() {
                return false;
            }
        }
    }

    if let Some(scope) = filter.scope {
        if memory.scope != scope {
            return false;
        }
    }

    if let Some(agent_id) = &filter.agent_id {
        if memory.agent_id.as_deref() != Some(agent_id.as_str()) {
            return false;
        }
    }

    if let Some(memory_type) = filter.memory_type {
        if memory.memory_type != memory_type {
            return false;
        }
    }

    if !filter.tags.iter().all(|tag| memory.tags.contains(tag)) {
        return false;
    }

    if !filter
        .related_entities
        .iter()
        .all(|(key, value)| memory.related_entities.get(key) == Some(value))
    {
        return false;
    }

    if let Some(q) = &filter.q {
        if !memory.content.to_lowercase().contains(&q.to_lowercase()) {
            return false;
        }
    }

    if let Some(from) = filter.event_time_from {
        match memory.event_time {
            Some(t) if t >= from => {}
            _ => return false,
        }
    }

    if let Some(to) = filter.event_time_to {
        match memory.event_time {
            Some(t) if t < to => {}
            _ => return false,
        }
    }

    true
}

// ============================================================================
// Cursor encoding
// ============================================================================

fn encode_cursor(created_at: DateTime<Utc>, id: uuid::Uuid) -> String {
    let raw = format!("{}|{}", created_at.to_rfc3339(), id);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw)
}

fn decode_cursor(cursor: &str) -> Option<(DateTime<Utc>, uuid::Uuid)> {
    let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(cursor)
        .ok()?;
    let raw = String::from_utf8(raw).ok()?;
    let (ts, id) = raw.split_once('|')?;
    let created_at = DateTime::parse_from_rfc3339(ts).ok()?.with_timezone(&Utc);
    let id = uuid::Uuid::parse_str(id).ok()?;
    Some((created_at, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(memory_type: MemoryType, importance: u8, confidence: f32) -> MemoryRecord {
        let now = Utc::now();
        MemoryRecord {
            id: MemoryId::new(),
            user_id: "u1".into(),
            scope: Scope::Global,
            agent_id: None,
            content: "User lives in Tokyo".into(),
            content_hash: Some("h".into()),
            embedding: None,
            memory_type,
            tags: vec![],
            related_entities: Default::default(),
            importance,
            confidence,
            source: None,
            input_channel: InputChannel::Api,
            event_time: None,
            valid_from: now,
            valid_to: None,
            supersedes_id: None,
            last_accessed: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_rank_score_weights() {
        let now = Utc::now();
        let mem = record(MemoryType::Fact, 3, 0.7);
        // sim=1, w_i=0.9, w_c=0.85, no decay for facts
        let score = rank_score(&mem, 1.0, now);
        assert!((score - 0.9 * 0.85).abs() < 1e-5);

        // importance boundaries: i=1 -> 0.7, i=5 -> 1.1
        let low = record(MemoryType::Fact, 1, 1.0);
        let high = record(MemoryType::Fact, 5, 1.0);
        assert!((rank_score(&low, 1.0, now) - 0.7).abs() < 1e-5);
        assert!((rank_score(&high, 1.0, now) - 1.1).abs() < 1e-5);
    }

    #[test]
    fn test_negative_similarity_clamped() {
        let mem = record(MemoryType::Fact, 3, 0.7);
        assert_eq!(rank_score(&mem, -0.5, Utc::now()), 0.0);
    }

    #[test]
    fn test_decay_halves_at_half_life() {
        let now = Utc::now();
        let mut fresh = record(MemoryType::Episode, 3, 1.0);
        fresh.created_at = now;
        let mut old = fresh.clone();
        old.created_at = now - chrono::Duration::days(DECAY_HALF_LIFE_DAYS as i64);

        let fresh_score = rank_score(&fresh, 1.0, now);
        let old_score = rank_score(&old, 1.0, now);
        assert!((old_score / fresh_score - 0.5).abs() < 0.01);

        // Facts and policies never decay
        let mut fact = record(MemoryType::Fact, 3, 1.0);
        fact.created_at = now - chrono::Duration::days(365);
        let mut policy = fact.clone();
        policy.memory_type = MemoryType::Policy;
        assert_eq!(rank_score(&fact, 1.0, now), rank_score(&policy, 1.0, now));
    }

    #[test]
    fn test_cursor_round_trip() {
        let now = Utc::now();
        let id = uuid::Uuid::new_v4();
        let cursor = encode_cursor(now, id);
        let (ts, back) = decode_cursor(&cursor).unwrap();
        assert_eq!(back, id);
        assert_eq!(ts.timestamp_millis(), now.timestamp_millis());

        assert!(decode_cursor("not-base64!!!").is_none());
    }

    #[test]
    fn test_filter_current_default_and_valid_at() {
        let mut retired = record(MemoryType::Fact, 3, 0.7);
        let t0 = retired.valid_from;
        retired.valid_to = Some(t0 + chrono::Duration::hours(1));

        let mut filter = QueryFilter {
            user_id: "u1".into(),
            limit: 10,
            ..Default::default()
        };
        assert!(!matches_filter(&retired, &filter));

        filter.valid_at = Some(t0 + chrono::Duration::minutes(30));
        assert!(matches_filter(&retired, &filter));

        filter.valid_at = Some(t0 + chrono::Duration::hours(2));
        assert!(!matches_filter(&retired, &filter));
    }

    #[test]
    fn test_filter_tags_containment() {
        let mut mem = record(MemoryType::Fact, 3, 0.7);
        mem.tags = vec!["health".into(), "work".into()];

        let mut filter = QueryFilter {
            user_id: "u1".into(),
            tags: vec!["health".into()],
            limit: 10,
            ..Default::default()
        };
        assert!(matches_filter(&mem, &filter));

        filter.tags = vec!["health".into(), "travel".into()];
        assert!(!matches_filter(&mem, &filter));
    }

    #[test]
    fn test_filter_substring_query() {
        let mem = record(MemoryType::Fact, 3, 0.7);
        let mut filter = QueryFilter {
            user_id: "u1".into(),
            q: Some("tokyo".into()),
            limit: 10,
            ..Default::default()
        };
        assert!(matches_filter(&mem, &filter));
        filter.q = Some("osaka".into());
        assert!(!matches_filter(&mem, &filter));
    }
}
