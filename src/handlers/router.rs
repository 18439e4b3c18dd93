//! Router configuration - centralized route definitions.
//!
//! Routes are split into public (no auth: health checks, metrics scraping)
//! and protected (`/v1`, API key required).

use axum::{
    routing::{delete, get, patch, post},
    Router,
};

use super::state::AppState;
use super::{context, health, ingest, memories};
use crate::auth;

/// Build the public routes (no authentication required)
pub fn build_public_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics_endpoint))
        .with_state(state)
}

/// Build the protected API routes (API key required)
pub fn build_protected_routes(state: AppState) -> Router {
    Router::new()
        // Async ingest
        .route("/v1/ingest", post(ingest::ingest))
        .route("/v1/ingest/{job_id}", get(ingest::job_status))
        // Memory CRUD
        .route("/v1/memories", post(memories::create_memory))
        .route("/v1/memories", get(memories::list_memories))
        .route("/v1/memories/{id}", get(memories::get_memory))
        .route("/v1/memories/{id}", patch(memories::patch_memory))
        .route("/v1/memories/{id}", delete(memories::delete_memory))
        // RAG retrieval + synthesis
        .route("/v1/context", post(context::context))
        // Admin export
        .route("/v1/dump", get(memories::dump_memories))
        .with_state(state)
}

/// Assemble the full application router with auth on the protected half.
pub fn build_router(state: AppState) -> Router {
    let public = build_public_routes(state.clone());
    let protected = build_protected_routes(state)
        .layer(axum::middleware::from_fn(auth::auth_middleware));
    Router::new().merge(public).merge(protected)
}
