//! Prompt management endpoints.
//!
//! Updating the system prompt affects conversations created afterwards;
//! live agents keep the prompt they resolved at creation.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::json;

use super::routes::AppState;
use super::types::{LimitQuery, MessageResponse, PromptRequest};

const DEFAULT_LIMIT: usize = 20;

/// Create prompt routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/", get(list_prompts).post(upsert_prompt))
}

async fn upsert_prompt(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PromptRequest>,
) -> Result<Json<MessageResponse>, (StatusCode, String)> {
    if req.name.trim().is_empty() || req.content.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Prompt name and content are required".to_string(),
        ));
    }

    let stored = state
        .stores
        .prompts
        .upsert_prompt(
            &req.name,
            &req.content,
            req.description.as_deref(),
            req.is_active,
        )
        .await
        .map_err(|e| {
            tracing::error!(name = %req.name, "Failed to save prompt: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "No se pudo guardar el prompt".to_string(),
            )
        })?;

    tracing::info!(name = %stored.name, active = stored.is_active, "Prompt saved");
    Ok(Json(MessageResponse::ok(
        "Prompt guardado correctamente",
        json!({ "stored": stored }),
    )))
}

async fn list_prompts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<MessageResponse>, (StatusCode, String)> {
    let items = state
        .stores
        .prompts
        .list_prompts(query.limit.unwrap_or(DEFAULT_LIMIT))
        .await
        .map_err(|e| {
            tracing::error!("Failed to list prompts: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "No se pudieron obtener los prompts".to_string(),
            )
        })?;

    Ok(Json(MessageResponse::ok(
        "Prompts recuperados",
        json!({ "count": items.len(), "items": items }),
    )))
}
