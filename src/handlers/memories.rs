//! Memory CRUD handlers: force create, structured query, single read,
//! manual edit, delete, and the admin dump.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

use super::state::AppState;
use super::types::*;
use crate::constants::{
    DEFAULT_IMPORTANCE, DEFAULT_QUERY_LIMIT, DEFAULT_USER_ID, DUMP_LIMIT, MAX_QUERY_LIMIT,
};
use crate::errors::{AppError, Result, ValidationErrorExt};
use crate::memory::{ForceCreateInput, MemoryId, MemoryPatch, MemoryType, QueryFilter};
use crate::validation;

fn parse_memory_id(raw: &str) -> Result<MemoryId> {
    validation::validate_memory_id(raw)
        .map_validation_err("memory_id")
        .map(MemoryId)
}

fn parse_memory_type(raw: &str) -> Result<MemoryType> {
    MemoryType::parse(raw).ok_or_else(|| {
        AppError::invalid_argument(
            "memory_type",
            format!("unknown memory_type '{raw}' (expected fact|state|episode|policy)"),
        )
    })
}

/// POST /v1/memories - force/manual create, bypassing the analyzer.
///
/// Use for fact/policy registrations that must not be reworded by the model.
/// Exact-duplicate suppression still applies and surfaces as a conflict.
#[tracing::instrument(skip(state, body))]
pub async fn create_memory(
    State(state): State<AppState>,
    Json(body): Json<MemoryCreateBody>,
) -> Result<(StatusCode, Json<MemoryView>)> {
    let memory_type = parse_memory_type(&body.memory_type)?;

    let input = ForceCreateInput {
        user_id: body.user_id.unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
        content: body.content,
        memory_type,
        tags: body.tags,
        related_entities: body.related_entities.unwrap_or_default(),
        scope: body.scope,
        agent_id: body.agent_id,
        importance: body.importance.unwrap_or(DEFAULT_IMPORTANCE),
        // Manual writes default to full confidence
        confidence: body.confidence.unwrap_or(1.0),
        source: body.source.or_else(|| Some("manual".to_string())),
        event_time: body.event_time,
        semantic_upsert: body.semantic_upsert,
    };

    let deadline = state.config().request_timeout;
    let record = tokio::time::timeout(deadline, state.manager().force_create(input))
        .await
        .map_err(|_| AppError::Timeout("create deadline exceeded".to_string()))??;

    Ok((StatusCode::CREATED, Json(record.into())))
}

/// GET /v1/memories - structured query with cursor pagination.
#[tracing::instrument(skip(state, params))]
pub async fn list_memories(
    State(state): State<AppState>,
    Query(params): Query<ListMemoriesQuery>,
) -> Result<Json<MemoryListResponse>> {
    let memory_type = params
        .memory_type
        .as_deref()
        .map(parse_memory_type)
        .transpose()?;

    let tags: Vec<String> = params
        .tags
        .map(|raw| {
            raw.split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let filter = QueryFilter {
        user_id: params.user_id.unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
        scope: params.scope,
        agent_id: params.agent_id,
        memory_type,
        tags,
        related_entities: Default::default(),
        q: params.q,
        valid_at: params.valid_at,
        event_time_from: params.event_time_from,
        event_time_to: params.event_time_to,
        limit: params
            .limit
            .unwrap_or(DEFAULT_QUERY_LIMIT)
            .clamp(1, MAX_QUERY_LIMIT),
        cursor: params.cursor,
    };

    let deadline = state.config().request_timeout;
    let page = tokio::time::timeout(deadline, state.retrieval().query(filter))
        .await
        .map_err(|_| AppError::Timeout("query deadline exceeded".to_string()))??;
    let memories: Vec<MemoryView> = page.memories.into_iter().map(Into::into).collect();

    Ok(Json(MemoryListResponse {
        total: memories.len(),
        memories,
        cursor: page.next_cursor,
    }))
}

/// GET /v1/memories/{id} - single read.
#[tracing::instrument(skip(state))]
pub async fn get_memory(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MemoryView>> {
    let id = parse_memory_id(&id)?;
    let record = state.manager().get(id)?;
    Ok(Json(record.into()))
}

/// PATCH /v1/memories/{id} - manual edit with a user-actor audit diff.
#[tracing::instrument(skip(state, body))]
pub async fn patch_memory(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<MemoryPatchBody>,
) -> Result<Json<MemoryView>> {
    let id = parse_memory_id(&id)?;

    let patch = MemoryPatch {
        content: body.content,
        tags: body.tags,
        importance: body.importance,
        confidence: body.confidence,
        related_entities: body.related_entities,
    };

    let deadline = state.config().request_timeout;
    let record = tokio::time::timeout(deadline, state.manager().update(id, patch))
        .await
        .map_err(|_| AppError::Timeout("update deadline exceeded".to_string()))??;

    Ok(Json(record.into()))
}

/// DELETE /v1/memories/{id} - soft by default (sets `valid_to`), permanent
/// with `?hard=true`.
#[tracing::instrument(skip(state))]
pub async fn delete_memory(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<DeleteQuery>,
) -> Result<StatusCode> {
    let id = parse_memory_id(&id)?;
    state.manager().delete(id, params.hard).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/dump - admin export in `json` or `jsonl` format.
#[tracing::instrument(skip(state, params))]
pub async fn dump_memories(
    State(state): State<AppState>,
    Query(params): Query<DumpQuery>,
) -> Result<Response> {
    if params.format != "json" && params.format != "jsonl" {
        return Err(AppError::invalid_argument(
            "format",
            "expected 'json' or 'jsonl'",
        ));
    }

    let store = state.store().clone();
    let user_filter = params.user_id.clone();
    let mut rows = tokio::task::spawn_blocking(move || match &user_filter {
        Some(user_id) => store.user_memories(user_id),
        None => store.all_memories(DUMP_LIMIT),
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!("dump task panicked: {e}")))?
    .map_err(AppError::Internal)?;

    if let Some(scope) = params.scope {
        rows.retain(|m| m.scope == scope);
    }
    if let Some(agent_id) = &params.agent_id {
        rows.retain(|m| m.agent_id.as_deref() == Some(agent_id.as_str()));
    }
    rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    let views: Vec<MemoryView> = rows.into_iter().map(Into::into).collect();

    if params.format == "jsonl" {
        let mut body = String::new();
        for view in &views {
            body.push_str(&serde_json::to_string(view).map_err(|e| {
                AppError::Internal(anyhow::anyhow!("serialize dump line: {e}"))
            })?);
            body.push('\n');
        }
        return Ok((
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "application/x-ndjson")],
            body,
        )
            .into_response());
    }

    Ok(Json(serde_json::json!({
        "format": "json",
        "count": views.len(),
        "memories": views,
    }))
    .into_response())
}
