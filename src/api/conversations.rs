//! Conversation history and memory endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::storage::StorageError;

use super::routes::AppState;
use super::types::{ConversationListQuery, LimitQuery, MessageResponse};

const DEFAULT_LIST_LIMIT: usize = 20;
const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Create conversation routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_conversations))
        .route(
            "/:phone_number",
            get(get_conversation_history).delete(delete_conversation),
        )
        .route("/memory/reset/:phone_number", post(reset_memory))
}

fn internal_error(e: StorageError) -> (StatusCode, String) {
    tracing::error!("Conversation storage error: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConversationListQuery>,
) -> Result<Json<MessageResponse>, (StatusCode, String)> {
    let conversations = state
        .stores
        .chat_logs
        .list_conversations(query.limit.unwrap_or(DEFAULT_LIST_LIMIT), query.active_only)
        .await
        .map_err(internal_error)?;

    Ok(Json(MessageResponse::ok(
        "Conversaciones recuperadas",
        json!({ "count": conversations.len(), "conversations": conversations }),
    )))
}

async fn get_conversation_history(
    State(state): State<Arc<AppState>>,
    Path(phone_number): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<MessageResponse>, (StatusCode, String)> {
    let chat_logs = &state.stores.chat_logs;
    let (messages, conversation) = futures::try_join!(
        chat_logs.conversation_history(
            &phone_number,
            query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT)
        ),
        chat_logs.get_conversation(&phone_number),
    )
    .map_err(internal_error)?;

    Ok(Json(MessageResponse::ok(
        "Historial recuperado",
        json!({
            "phone_number": phone_number,
            "message_count": messages.len(),
            "messages": messages,
            "conversation_info": conversation,
        }),
    )))
}

/// Delete stored history and drop the live agent.
async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path(phone_number): Path<String>,
) -> Result<Json<MessageResponse>, (StatusCode, String)> {
    state.processor.registry().remove(&phone_number).await;
    state
        .stores
        .chat_logs
        .delete_conversation(&phone_number)
        .await
        .map_err(internal_error)?;

    tracing::info!(phone = %phone_number, "Conversation deleted");
    Ok(Json(MessageResponse::done(format!(
        "Conversación {} eliminada",
        phone_number
    ))))
}

/// Clear this sender's memory window and mark the conversation `reset`.
async fn reset_memory(
    State(state): State<Arc<AppState>>,
    Path(phone_number): Path<String>,
) -> Result<Json<MessageResponse>, (StatusCode, String)> {
    let had_agent = state.processor.registry().reset(&phone_number).await;
    state
        .stores
        .chat_logs
        .reset_conversation(&phone_number)
        .await
        .map_err(internal_error)?;

    tracing::info!(phone = %phone_number, had_agent, "Conversation memory reset");
    Ok(Json(MessageResponse::done(format!(
        "Memoria reseteada para {}",
        phone_number
    ))))
}
