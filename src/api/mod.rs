//! HTTP API for the WhatsApp bot.
//!
//! ## Endpoints
//!
//! - `GET /` - App info and webhook endpoint list
//! - `GET /health` - Health check, including Evolution instance state
//! - `POST /messages-upsert` - New WhatsApp message, answered in the background
//! - `POST /messages-update`, `/messages-set`, `/chats-update`, `/chats-upsert`,
//!   `/send-message` - Acknowledged and counted
//! - `GET /stats` - Webhook counters
//! - `POST /api/v1/messages/process` - Generate a reply without delivering it
//! - `GET /api/v1/prompts` - List prompts
//! - `POST /api/v1/prompts` - Create or update a prompt
//! - `GET /api/v1/conversations` - List conversations
//! - `GET /api/v1/conversations/{phone}` - Message history of one sender
//! - `DELETE /api/v1/conversations/{phone}` - Delete a conversation
//! - `POST /api/v1/conversations/memory/reset/{phone}` - Clear a sender's memory
//! - `GET /api/v1/analytics/summary` - Message counts over recent days

mod analytics;
mod conversations;
mod messages;
mod prompts;
mod routes;
pub mod types;
mod webhooks;

pub use routes::{build_router, serve, AppState};
pub use types::*;
pub use webhooks::{WebhookStats, WebhookStatsSnapshot, WEBHOOK_ENDPOINTS};
