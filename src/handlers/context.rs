//! Context handler: ranked RAG retrieval plus synthesis.

use axum::{extract::State, response::Json};

use super::state::AppState;
use super::types::{ContextBody, ContextResponse, EvidenceItem};
use crate::constants::{DEFAULT_CONTEXT_K, DEFAULT_USER_ID, MAX_CONTEXT_K};
use crate::errors::{AppError, Result, ValidationErrorExt};
use crate::memory::ContextParams;
use crate::metrics;
use crate::validation;

/// POST /v1/context - retrieve, rank, and synthesize context for a
/// downstream agent.
#[tracing::instrument(skip(state, body))]
pub async fn context(
    State(state): State<AppState>,
    Json(body): Json<ContextBody>,
) -> Result<Json<ContextResponse>> {
    if body.query.trim().is_empty() {
        return Err(AppError::invalid_argument("query", "query cannot be empty"));
    }

    let user_id = body.user_id.unwrap_or_else(|| DEFAULT_USER_ID.to_string());
    validation::validate_user_id(&user_id).map_validation_err("user_id")?;
    validation::validate_scope(body.scope, body.agent_id.as_deref())
        .map_validation_err("scope")?;

    let params = ContextParams {
        user_id,
        query: body.query.clone(),
        app_context: body.app_context.clone(),
        scope: body.scope,
        agent_id: body.agent_id,
        k: body.k.unwrap_or(DEFAULT_CONTEXT_K).clamp(1, MAX_CONTEXT_K),
        include_global: body.include_global,
    };

    let op_start = std::time::Instant::now();
    let deadline = state.config().request_timeout;

    let evidence = tokio::time::timeout(deadline, state.retrieval().context(params))
        .await
        .map_err(|_| AppError::Timeout("context deadline exceeded".to_string()))??;

    metrics::CONTEXT_RETRIEVE_DURATION.observe(op_start.elapsed().as_secs_f64());
    metrics::CONTEXT_RETRIEVE_RESULTS.observe(evidence.len() as f64);

    // The deadline is end-to-end: synthesis gets whatever budget retrieval
    // left over, so a hanging model call cannot outlive the request.
    let remaining = deadline.saturating_sub(op_start.elapsed());
    let synthesis = tokio::time::timeout(
        remaining,
        state
            .synthesizer()
            .synthesize(&body.query, body.app_context.as_ref(), &evidence),
    )
    .await
    .map_err(|_| AppError::Timeout("context deadline exceeded".to_string()))?;

    let evidence_items = body
        .return_evidence
        .then(|| evidence.iter().map(EvidenceItem::from).collect());

    Ok(Json(ContextResponse {
        context: synthesis,
        evidence: evidence_items,
    }))
}
