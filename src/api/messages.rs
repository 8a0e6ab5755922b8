//! Manual message processing, without Evolution delivery.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::json;

use crate::whatsapp::preview;

use super::routes::AppState;
use super::types::{MessageResponse, ProcessMessageRequest};

/// Create message routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/process", post(process_message))
}

/// Generate and log a reply for `{numero|phone, texto|message}`.
async fn process_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ProcessMessageRequest>,
) -> Result<Json<MessageResponse>, (StatusCode, String)> {
    let phone = req
        .phone()
        .ok_or((StatusCode::BAD_REQUEST, "Missing phone number".to_string()))?;
    let text = req
        .text()
        .ok_or((StatusCode::BAD_REQUEST, "Missing message text".to_string()))?;

    let outcome = state.processor.process_only(text, phone).await;

    Ok(Json(MessageResponse::ok(
        "OK",
        json!({
            "to": phone,
            "request_preview": preview(text, 160),
            "response": outcome.reply,
            "degraded": outcome.degraded,
            "response_time_ms": outcome.response_time_ms,
        }),
    )))
}
