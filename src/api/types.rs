//! API request and response types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope shared by the webhook and `/api/v1` endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Success without a payload.
    pub fn done(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }
}

/// Acknowledgement for webhook events that need no processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventAck {
    pub status: String,
    pub event: String,
    pub timestamp: String,
}

/// Manual processing request. Accepts both the Spanish and English field names.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessMessageRequest {
    /// Recipient number
    pub numero: Option<String>,
    /// Recipient number (alternative)
    pub phone: Option<String>,
    /// Message text
    pub texto: Option<String>,
    /// Message text (alternative)
    pub message: Option<String>,
}

impl ProcessMessageRequest {
    pub fn phone(&self) -> Option<&str> {
        first_non_blank(&self.numero, &self.phone)
    }

    pub fn text(&self) -> Option<&str> {
        first_non_blank(&self.texto, &self.message)
    }
}

fn first_non_blank<'a>(a: &'a Option<String>, b: &'a Option<String>) -> Option<&'a str> {
    [a, b]
        .into_iter()
        .filter_map(|v| v.as_deref())
        .find(|v| !v.trim().is_empty())
}

/// Create or update a named prompt.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptRequest {
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationListQuery {
    pub limit: Option<usize>,
    #[serde(default)]
    pub active_only: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsQuery {
    pub days: Option<u32>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    pub app_name: String,

    /// Service version
    pub version: String,

    pub timestamp: String,

    /// Gemini model answering messages
    pub model: String,

    /// Whether `google_search` is offered to the model
    pub google_search: bool,

    /// Whether storage survives a restart (Supabase configured)
    pub persistent_storage: bool,

    /// Conversations with a live agent
    pub active_conversations: usize,

    /// Evolution API delivery state
    pub evolution: EvolutionHealth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionHealth {
    pub configured: bool,
    pub instance: String,
    /// Connection state reported by Evolution, e.g. `open`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}
