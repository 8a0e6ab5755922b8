//! Message analytics.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};

use super::routes::AppState;
use super::types::{AnalyticsQuery, MessageResponse};

const DEFAULT_DAYS: u32 = 7;

/// Create analytics routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/summary", get(summary))
}

/// Message counts over the last `days` days (default 7).
async fn summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<MessageResponse>, (StatusCode, String)> {
    let days = query.days.unwrap_or(DEFAULT_DAYS);
    let summary = state
        .stores
        .chat_logs
        .analytics_summary(days)
        .await
        .map_err(|e| {
            tracing::error!("Analytics query failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    let data = serde_json::to_value(&summary)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(MessageResponse::ok("Analytics recuperados", data)))
}
