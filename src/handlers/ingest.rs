//! Ingest handlers: enqueue analyze-and-ingest jobs and poll their status.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use uuid::Uuid;

use super::state::AppState;
use super::types::{IngestAccepted, IngestBody, JobStatusResponse};
use crate::constants::DEFAULT_USER_ID;
use crate::errors::{AppError, Result, ValidationErrorExt};
use crate::jobs::IngestRequest;
use crate::memory::{IngestInput, InputChannel};
use crate::validation;

/// POST /v1/ingest - accept an analyze-and-ingest job, return 202.
#[tracing::instrument(skip(state, headers, body))]
pub async fn ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<IngestBody>,
) -> Result<(StatusCode, Json<IngestAccepted>)> {
    validation::validate_ingest_text(&body.text).map_validation_err("text")?;

    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let user_id = body.user_id.unwrap_or_else(|| DEFAULT_USER_ID.to_string());
    let input_channel = InputChannel::for_source(body.source.as_deref());

    let request = IngestRequest {
        input: IngestInput {
            user_id,
            text: body.text,
            source: body.source,
            scope: body.scope,
            agent_id: body.agent_id,
            event_time: body.event_time,
            input_channel,
        },
        idempotency_key,
        metadata: body.metadata,
    };

    let job = state.jobs().accept(request).await?;

    // Idempotent replays return the existing job's current status
    Ok((
        StatusCode::ACCEPTED,
        Json(IngestAccepted {
            job_id: job.job_id.to_string(),
            status: job.status.as_str(),
        }),
    ))
}

/// GET /v1/ingest/{job_id} - poll a job.
#[tracing::instrument(skip(state))]
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>> {
    let job_id = Uuid::parse_str(&job_id)
        .map_err(|e| AppError::invalid_argument("job_id", format!("not a UUID: {e}")))?;

    let job = state.jobs().status(job_id).await?;
    Ok(Json(job.into()))
}
