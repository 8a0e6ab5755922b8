//! Evolution API webhook endpoints.
//!
//! Evolution posts each event type to its own fixed path. Only
//! `messages-upsert` triggers processing; the rest are acknowledged and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use crate::whatsapp::{parse_message_upsert, preview, EvolutionWebhook, WebhookAction};

use super::routes::AppState;
use super::types::{EventAck, MessageResponse};

/// Paths Evolution can be pointed at.
pub const WEBHOOK_ENDPOINTS: [&str; 6] = [
    "/messages-upsert",
    "/messages-update",
    "/messages-set",
    "/chats-update",
    "/chats-upsert",
    "/send-message",
];

/// Webhook counters since startup.
pub struct WebhookStats {
    total_events: AtomicU64,
    messages_processed: AtomicU64,
    errors: AtomicU64,
    start_time: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookStatsSnapshot {
    pub total_events: u64,
    pub messages_processed: u64,
    pub errors: u64,
    pub start_time: String,
}

impl WebhookStats {
    pub fn new() -> Self {
        Self {
            total_events: AtomicU64::new(0),
            messages_processed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            start_time: Utc::now().to_rfc3339(),
        }
    }

    fn record_event(&self) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
    }

    fn record_processed(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WebhookStatsSnapshot {
        WebhookStatsSnapshot {
            total_events: self.total_events.load(Ordering::Relaxed),
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            start_time: self.start_time.clone(),
        }
    }
}

impl Default for WebhookStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Create webhook routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/chats-update", post(chats_update))
        .route("/chats-upsert", post(chats_upsert))
        .route("/messages-set", post(messages_set))
        .route("/messages-update", post(messages_update))
        .route("/send-message", post(send_message))
        .route("/messages-upsert", post(messages_upsert))
        .route("/stats", get(get_stats))
}

fn acknowledge(state: &AppState, event: &str) -> Json<EventAck> {
    state.webhook_stats.record_event();
    tracing::info!(event = %event, "Webhook event acknowledged");
    Json(EventAck {
        status: "success".to_string(),
        event: event.to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn chats_update(State(state): State<Arc<AppState>>, Json(_): Json<Value>) -> Json<EventAck> {
    acknowledge(&state, "chats-update")
}

async fn chats_upsert(State(state): State<Arc<AppState>>, Json(_): Json<Value>) -> Json<EventAck> {
    acknowledge(&state, "chats-upsert")
}

async fn messages_set(State(state): State<Arc<AppState>>, Json(_): Json<Value>) -> Json<EventAck> {
    acknowledge(&state, "messages-set")
}

async fn messages_update(
    State(state): State<Arc<AppState>>,
    Json(_): Json<Value>,
) -> Json<EventAck> {
    acknowledge(&state, "messages-update")
}

async fn send_message(State(state): State<Arc<AppState>>, Json(_): Json<Value>) -> Json<EventAck> {
    acknowledge(&state, "send-message")
}

/// New message: answered in the background so Evolution gets an immediate 200.
async fn messages_upsert(
    State(state): State<Arc<AppState>>,
    Json(webhook): Json<EvolutionWebhook>,
) -> Result<Json<MessageResponse>, (StatusCode, String)> {
    state.webhook_stats.record_event();
    tracing::info!(instance = %webhook.instance, "Message upserted");

    let action = parse_message_upsert(&webhook).map_err(|e| {
        state.webhook_stats.record_error();
        tracing::warn!("Rejected messages.upsert payload: {}", e);
        (StatusCode::BAD_REQUEST, e.to_string())
    })?;

    let processing = match action {
        WebhookAction::Process(message) => {
            let result = json!({
                "action": "processed",
                "from": message.from_number,
                "message_preview": preview(&message.text, 100),
            });
            state.processor.spawn_process(message);
            state.webhook_stats.record_processed();
            result
        }
        WebhookAction::Skipped(reason) => {
            tracing::debug!(reason = reason.as_str(), "Message skipped");
            json!({ "action": "skipped", "reason": reason.as_str() })
        }
        WebhookAction::Error(reason) => {
            state.webhook_stats.record_error();
            tracing::warn!(reason = reason, "Unusable message payload");
            json!({ "action": "error", "reason": reason })
        }
    };

    Ok(Json(MessageResponse::ok(
        "Mensaje procesado correctamente",
        json!({
            "event": "messages-upsert",
            "instance": webhook.instance,
            "timestamp": Utc::now().to_rfc3339(),
            "processing": processing,
        }),
    )))
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "statistics": state.webhook_stats.snapshot(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
