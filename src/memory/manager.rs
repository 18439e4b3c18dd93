//! Memory Manager: the ingestion pipeline.
//!
//! analyze -> normalize -> embed -> dedup -> upsert, chunk by chunk in input
//! order. The per-type update strategy lives here: fact/state/policy
//! restatements supersede their predecessor inside one atomic store write,
//! episodes only ever append, and exact duplicates are suppressed for every
//! type. Each state transition emits an audit record.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::{with_retry, Adapters, AnalyzeHints, Chunk};
use crate::config::ServerConfig;
use crate::constants::{CHUNK_TIMEOUT_SECS, LOW_CONFIDENCE_WARNING};
use crate::errors::{AppError, Result, ValidationErrorExt};
use crate::normalizer::{Normalized, Normalizer};
use crate::similarity::top_k_similar;
use crate::validation;

use super::store::MemoryStore;
use super::types::*;

/// Input to one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestInput {
    pub user_id: String,
    pub text: String,
    pub source: Option<String>,
    pub scope: Scope,
    pub agent_id: Option<String>,
    pub event_time: Option<DateTime<Utc>>,
    pub input_channel: InputChannel,
}

/// Input to a force/manual create (bypasses the analyzer).
#[derive(Debug, Clone)]
pub struct ForceCreateInput {
    pub user_id: String,
    pub content: String,
    pub memory_type: MemoryType,
    pub tags: Vec<String>,
    pub related_entities: serde_json::Map<String, serde_json::Value>,
    pub scope: Scope,
    pub agent_id: Option<String>,
    pub importance: u8,
    pub confidence: f32,
    pub source: Option<String>,
    pub event_time: Option<DateTime<Utc>>,
    /// Opt into near-duplicate supersession; off by default for manual writes
    pub semantic_upsert: bool,
}

/// Fields a PATCH may change.
#[derive(Debug, Clone, Default)]
pub struct MemoryPatch {
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub importance: Option<u8>,
    pub confidence: Option<f32>,
    pub related_entities: Option<serde_json::Map<String, serde_json::Value>>,
}

impl MemoryPatch {
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.tags.is_none()
            && self.importance.is_none()
            && self.confidence.is_none()
            && self.related_entities.is_none()
    }
}

/// What happened to one chunk.
enum ChunkOutcome {
    Created(MemoryId),
    Updated(MemoryId),
    Skipped(MemoryId),
}

/// Chunk failures split into those that poison the job (store writes whose
/// visibility we cannot vouch for) and those that only cost the chunk.
enum ChunkError {
    Fatal(AppError),
    Recoverable(String),
}

pub struct MemoryManager {
    store: Arc<MemoryStore>,
    adapters: Adapters,
    normalizer: Normalizer,
    upsert_threshold: f32,
    embedding_dim: usize,
}

impl MemoryManager {
    pub fn new(store: Arc<MemoryStore>, adapters: Adapters, config: &ServerConfig) -> Self {
        Self {
            store,
            adapters,
            normalizer: Normalizer::default(),
            upsert_threshold: config.upsert_threshold,
            embedding_dim: config.embedding_dim,
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    // ========================================================================
    // Analyze-and-ingest pipeline
    // ========================================================================

    /// Run one full ingestion. Chunks are processed in input order; a chunk
    /// failure after earlier successes keeps the earlier writes and records a
    /// warning, unless it is a store failure, which fails the whole run.
    #[tracing::instrument(skip(self, input), fields(user_id = %input.user_id))]
    pub async fn ingest(&self, input: &IngestInput) -> Result<IngestOutcome> {
        validation::validate_user_id(&input.user_id).map_validation_err("user_id")?;
        validation::validate_scope(input.scope, input.agent_id.as_deref())
            .map_validation_err("scope")?;
        validation::validate_ingest_text(&input.text).map_validation_err("text")?;

        let hints = AnalyzeHints {
            source: input.source.clone(),
        };
        let analysis = with_retry("analyzer", || self.adapters.analyze(&input.text, &hints))
            .await
            .map_err(|e| AppError::Unavailable(format!("analyzer unavailable: {e}")))?;

        let mut outcome = IngestOutcome {
            warnings: analysis.warnings,
            ..Default::default()
        };

        if analysis.chunks.is_empty() {
            if outcome.warnings.is_empty() {
                outcome
                    .warnings
                    .push("No extractable information found in input".to_string());
            }
            return Ok(outcome);
        }

        let reference_time = input.event_time.unwrap_or_else(Utc::now);

        for chunk in analysis.chunks {
            if chunk.confidence < LOW_CONFIDENCE_WARNING {
                outcome.warnings.push(format!(
                    "Low confidence extraction: {}",
                    preview(&chunk.content)
                ));
            }

            let processed = tokio::time::timeout(
                Duration::from_secs(CHUNK_TIMEOUT_SECS),
                self.process_chunk(input, &chunk, reference_time),
            )
            .await;

            match processed {
                Ok(Ok(ChunkOutcome::Created(id))) => {
                    crate::metrics::INGEST_CHUNKS_TOTAL
                        .with_label_values(&["created"])
                        .inc();
                    outcome.created_count += 1;
                    outcome.memory_ids.push(id);
                }
                Ok(Ok(ChunkOutcome::Updated(id))) => {
                    crate::metrics::INGEST_CHUNKS_TOTAL
                        .with_label_values(&["updated"])
                        .inc();
                    outcome.updated_count += 1;
                    outcome.memory_ids.push(id);
                }
                Ok(Ok(ChunkOutcome::Skipped(id))) => {
                    crate::metrics::INGEST_CHUNKS_TOTAL
                        .with_label_values(&["skipped"])
                        .inc();
                    outcome.skipped_count += 1;
                    outcome.memory_ids.push(id);
                }
                Ok(Err(ChunkError::Fatal(err))) => return Err(err),
                Ok(Err(ChunkError::Recoverable(reason))) => {
                    crate::metrics::INGEST_CHUNKS_TOTAL
                        .with_label_values(&["failed"])
                        .inc();
                    outcome
                        .warnings
                        .push(format!("Chunk failed ({}): {reason}", preview(&chunk.content)));
                }
                Err(_elapsed) => {
                    crate::metrics::INGEST_CHUNKS_TOTAL
                        .with_label_values(&["failed"])
                        .inc();
                    outcome.warnings.push(format!(
                        "Chunk timed out after {CHUNK_TIMEOUT_SECS}s: {}",
                        preview(&chunk.content)
                    ));
                }
            }
        }

        Ok(outcome)
    }

    /// Normalize, embed, dedup, and upsert one chunk.
    async fn process_chunk(
        &self,
        input: &IngestInput,
        chunk: &Chunk,
        reference_time: DateTime<Utc>,
    ) -> std::result::Result<ChunkOutcome, ChunkError> {
        let normalized = self.normalizer.normalize(&chunk.content, reference_time);

        let embedding = with_retry("embedder", || self.adapters.embed_one(&normalized.content))
            .await
            .map_err(|e| ChunkError::Recoverable(format!("embedder unavailable: {e}")))?;

        validation::validate_embedding(&embedding, self.embedding_dim).map_err(|e| {
            ChunkError::Fatal(AppError::Internal(anyhow::anyhow!(
                "embedder produced an invalid vector: {e}"
            )))
        })?;

        let record = build_record(input, chunk, &normalized, embedding);

        // Dedup and write run on the blocking pool; the store is synchronous.
        let store = self.store.clone();
        let threshold = self.upsert_threshold;
        tokio::task::spawn_blocking(move || upsert_record(&store, record, threshold))
            .await
            .map_err(|e| {
                ChunkError::Fatal(AppError::Internal(anyhow::anyhow!(
                    "chunk task panicked: {e}"
                )))
            })?
    }

    // ========================================================================
    // Force / manual create
    // ========================================================================

    /// Create a memory without analyzer involvement. Normalization, hashing,
    /// embedding, and the exact-duplicate check still apply; the semantic
    /// near-duplicate upsert only runs when the caller opted in.
    #[tracing::instrument(skip(self, input), fields(user_id = %input.user_id))]
    pub async fn force_create(&self, input: ForceCreateInput) -> Result<MemoryRecord> {
        validation::validate_user_id(&input.user_id).map_validation_err("user_id")?;
        validation::validate_scope(input.scope, input.agent_id.as_deref())
            .map_validation_err("scope")?;
        validation::validate_content(&input.content, false).map_validation_err("content")?;
        validation::validate_importance(input.importance).map_validation_err("importance")?;
        validation::validate_confidence(input.confidence).map_validation_err("confidence")?;
        validation::validate_tags(&input.tags).map_validation_err("tags")?;

        let normalized = self
            .normalizer
            .normalize(&input.content, input.event_time.unwrap_or_else(Utc::now));

        let embedding = self
            .adapters
            .embed_one(&normalized.content)
            .await
            .map_err(|e| AppError::Unavailable(format!("embedder unavailable: {e}")))?;
        validation::validate_embedding(&embedding, self.embedding_dim)
            .map_err(AppError::Internal)?;

        let now = Utc::now();
        let record = MemoryRecord {
            id: MemoryId::new(),
            user_id: input.user_id.clone(),
            scope: input.scope,
            agent_id: input.agent_id.clone(),
            content: normalized.content.clone(),
            content_hash: Some(normalized.content_hash.clone()),
            embedding: Some(embedding),
            memory_type: input.memory_type,
            tags: input.tags.clone(),
            related_entities: input.related_entities.clone(),
            importance: input.importance,
            confidence: input.confidence,
            source: input.source.clone(),
            input_channel: InputChannel::Manual,
            event_time: input.event_time,
            valid_from: now,
            valid_to: None,
            supersedes_id: None,
            last_accessed: None,
            created_at: now,
            updated_at: now,
        };

        let store = self.store.clone();
        let threshold = if input.semantic_upsert {
            self.upsert_threshold
        } else {
            // A threshold above 1.0 never fires; exact-duplicate suppression
            // still does.
            f32::INFINITY
        };
        let outcome = tokio::task::spawn_blocking(move || upsert_record(&store, record, threshold))
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("create task panicked: {e}")))?;

        match outcome {
            Ok(ChunkOutcome::Created(id)) | Ok(ChunkOutcome::Updated(id)) => self
                .store
                .get(&id)
                .map_err(AppError::Internal)?
                .ok_or_else(|| {
                    AppError::Internal(anyhow::anyhow!("freshly written memory {id} missing"))
                }),
            Ok(ChunkOutcome::Skipped(existing)) => Err(AppError::conflict(
                "Duplicate content for this user and scope",
                Some(serde_json::json!({ "existing_id": existing.to_string() })),
            )),
            Err(ChunkError::Fatal(err)) => Err(err),
            Err(ChunkError::Recoverable(reason)) => {
                Err(AppError::Internal(anyhow::anyhow!(reason)))
            }
        }
    }

    // ========================================================================
    // Manual edit / delete
    // ========================================================================

    /// Apply a manual edit. Content changes re-normalize, re-hash, and
    /// re-embed; every change lands in a user-actor audit diff.
    #[tracing::instrument(skip(self, patch))]
    pub async fn update(&self, id: MemoryId, patch: MemoryPatch) -> Result<MemoryRecord> {
        let mut record = self
            .store
            .get(&id)
            .map_err(AppError::Internal)?
            .ok_or_else(|| AppError::NotFound(format!("memory {id}")))?;

        if patch.is_empty() {
            return Ok(record);
        }

        let previous_hash = record.content_hash.clone();
        let mut before = serde_json::Map::new();
        let mut after = serde_json::Map::new();

        if let Some(content) = &patch.content {
            validation::validate_content(content, false).map_validation_err("content")?;
            let normalized = self.normalizer.normalize(content, Utc::now());
            let embedding = self
                .adapters
                .embed_one(&normalized.content)
                .await
                .map_err(|e| AppError::Unavailable(format!("embedder unavailable: {e}")))?;

            before.insert("content".into(), record.content.clone().into());
            after.insert("content".into(), normalized.content.clone().into());
            record.content = normalized.content;
            record.content_hash = Some(normalized.content_hash);
            record.embedding = Some(embedding);
        }

        if let Some(tags) = patch.tags {
            validation::validate_tags(&tags).map_validation_err("tags")?;
            before.insert("tags".into(), record.tags.clone().into());
            after.insert("tags".into(), tags.clone().into());
            record.tags = tags;
        }

        if let Some(importance) = patch.importance {
            validation::validate_importance(importance).map_validation_err("importance")?;
            before.insert("importance".into(), record.importance.into());
            after.insert("importance".into(), importance.into());
            record.importance = importance;
        }

        if let Some(confidence) = patch.confidence {
            validation::validate_confidence(confidence).map_validation_err("confidence")?;
            before.insert("confidence".into(), record.confidence.into());
            after.insert("confidence".into(), confidence.into());
            record.confidence = confidence;
        }

        if let Some(entities) = patch.related_entities {
            before.insert(
                "related_entities".into(),
                serde_json::Value::Object(record.related_entities.clone()),
            );
            after.insert(
                "related_entities".into(),
                serde_json::Value::Object(entities.clone()),
            );
            record.related_entities = entities;
        }

        record.updated_at = Utc::now();

        let audit = AuditRecord::new(
            id,
            AuditAction::Update,
            ActorType::User,
            Some(serde_json::json!({ "before": before, "after": after })),
        );

        let store = self.store.clone();
        let hash_moved = record.content_hash != previous_hash;
        let record_for_write = record.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let _guard = store.write_guard();
            // A content edit may collide with another current row's slot
            if hash_moved {
                if let Some(hash) = &record_for_write.content_hash {
                    if let Some(existing) = store
                        .find_current_by_hash(
                            &record_for_write.user_id,
                            record_for_write.scope,
                            record_for_write.agent_id.as_deref(),
                            hash,
                        )
                        .map_err(AppError::Internal)?
                    {
                        if existing != record_for_write.id {
                            return Err(AppError::conflict(
                                "Edited content duplicates another current memory",
                                Some(serde_json::json!({ "existing_id": existing.to_string() })),
                            ));
                        }
                    }
                }
            }
            store
                .update(
                    &record_for_write,
                    if hash_moved {
                        previous_hash.as_deref()
                    } else {
                        None
                    },
                    Some(&audit),
                )
                .map_err(AppError::Internal)
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("update task panicked: {e}")))??;

        Ok(record)
    }

    /// Delete a memory. Soft delete retires the row (sets `valid_to`); hard
    /// delete removes the row and its audit trail.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: MemoryId, hard: bool) -> Result<()> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let _guard = store.write_guard();
            let mut record = store
                .get(&id)
                .map_err(AppError::Internal)?
                .ok_or_else(|| AppError::NotFound(format!("memory {id}")))?;

            if hard {
                return store.delete_hard(&record).map_err(AppError::Internal);
            }

            // Soft-deleting an already retired row is a no-target operation
            if !record.is_current() {
                return Err(AppError::NotFound(format!("memory {id}")));
            }

            let previous_hash = record.content_hash.clone();
            let now = Utc::now();
            record.valid_to = Some(now);
            record.updated_at = now;

            let audit = AuditRecord::new(id, AuditAction::Delete, ActorType::User, None);
            store
                .update(&record, previous_hash.as_deref(), Some(&audit))
                .map_err(AppError::Internal)
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("delete task panicked: {e}")))?
    }

    /// Single read.
    pub fn get(&self, id: MemoryId) -> Result<MemoryRecord> {
        self.store
            .get(&id)
            .map_err(AppError::Internal)?
            .ok_or_else(|| AppError::NotFound(format!("memory {id}")))
    }
}

// ============================================================================
// Chunk upsert (blocking section)
// ============================================================================

fn build_record(
    input: &IngestInput,
    chunk: &Chunk,
    normalized: &Normalized,
    embedding: Vec<f32>,
) -> MemoryRecord {
    let now = Utc::now();
    MemoryRecord {
        id: MemoryId::new(),
        user_id: input.user_id.clone(),
        scope: input.scope,
        agent_id: input.agent_id.clone(),
        content: normalized.content.clone(),
        content_hash: Some(normalized.content_hash.clone()),
        embedding: Some(embedding),
        memory_type: chunk.memory_type,
        tags: chunk.tags.clone(),
        related_entities: chunk.related_entities.clone(),
        importance: chunk.importance,
        confidence: chunk.confidence,
        source: input.source.clone(),
        input_channel: input.input_channel,
        event_time: chunk.event_time.or(input.event_time),
        valid_from: now,
        valid_to: None,
        supersedes_id: None,
        last_accessed: None,
        created_at: now,
        updated_at: now,
    }
}

/// Exact-duplicate check, semantic near-duplicate check, then supersede or
/// insert. Runs entirely under the store write guard so concurrent ingests
/// targeting the same lineage cannot lose updates.
fn upsert_record(
    store: &MemoryStore,
    mut record: MemoryRecord,
    upsert_threshold: f32,
) -> std::result::Result<ChunkOutcome, ChunkError> {
    let _guard = store.write_guard();

    let hash = record
        .content_hash
        .clone()
        .expect("ingested records always carry a content hash");

    // Exact duplicates are suppressed for every type, episodes included
    let existing = store
        .find_current_by_hash(&record.user_id, record.scope, record.agent_id.as_deref(), &hash)
        .map_err(|e| ChunkError::Fatal(AppError::Internal(e)))?;
    if let Some(existing_id) = existing {
        return Ok(ChunkOutcome::Skipped(existing_id));
    }

    // Semantic near-duplicate: restatements supersede for fact/state/policy
    if record.memory_type.supersedes() && upsert_threshold.is_finite() {
        let embedding = record
            .embedding
            .as_ref()
            .expect("ingested records always carry an embedding");

        let bucket = store
            .user_memories(&record.user_id)
            .map_err(|e| ChunkError::Fatal(AppError::Internal(e)))?;
        let candidates: Vec<(Vec<f32>, MemoryRecord)> = bucket
            .into_iter()
            .filter(|m| {
                m.is_current()
                    && m.memory_type == record.memory_type
                    && m.in_bucket(&record.user_id, record.scope, record.agent_id.as_deref())
            })
            .filter_map(|m| m.embedding.clone().map(|e| (e, m)))
            .collect();

        if let Some((similarity, old)) = top_k_similar(embedding, &candidates, 1).pop() {
            if similarity >= upsert_threshold {
                return supersede(store, old, record, similarity);
            }
        }
    }

    let audit = AuditRecord::new(record.id, AuditAction::Create, ActorType::System, None);
    record.last_accessed = None;
    store
        .insert(&record, &audit)
        .map_err(|e| ChunkError::Fatal(AppError::Internal(e)))?;
    Ok(ChunkOutcome::Created(record.id))
}

/// Retire `old` and chain `record` onto it in one atomic store write.
/// Temporal monotonicity: the successor's `valid_from` equals the
/// predecessor's `valid_to` exactly.
fn supersede(
    store: &MemoryStore,
    mut old: MemoryRecord,
    mut record: MemoryRecord,
    similarity: f32,
) -> std::result::Result<ChunkOutcome, ChunkError> {
    let now = Utc::now();
    old.valid_to = Some(now);
    old.updated_at = now;

    record.valid_from = now;
    record.supersedes_id = Some(old.id);

    // Supersession is one transition: a single update audit covers the
    // retire-plus-insert pair, with the successor recorded in the diff.
    let audits = [AuditRecord::new(
        old.id,
        AuditAction::Update,
        ActorType::System,
        Some(serde_json::json!({
            "before": { "content": old.content },
            "after": { "content": record.content },
            "superseded_by": record.id.to_string(),
            "similarity": similarity,
        })),
    )];

    store
        .supersede(&old, &record, &audits)
        .map_err(|e| ChunkError::Fatal(AppError::Internal(e)))?;
    Ok(ChunkOutcome::Updated(record.id))
}

fn preview(content: &str) -> String {
    content.chars().take(50).collect()
}
