//! Persistence of prompts, conversations, message logs and AI responses.
//!
//! Backends:
//! - `supabase`: PostgREST tables in a Supabase project
//! - `memory`: In-memory storage (non-persistent, used when Supabase is not
//!   configured and in tests)
//!
//! Storage is always best-effort from the conversation's point of view: a
//! failing backend is logged, never surfaced to the WhatsApp user.

mod memory;
mod supabase;

pub use memory::InMemoryStore;
pub use supabase::SupabaseClient;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::StorageConfig;

/// Name of the prompt row holding the chatbot's system prompt.
pub const SYSTEM_PROMPT_NAME: &str = "system_prompt";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Failed to {operation}: {status} - {body}")]
    Http {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("Invalid storage response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("No row returned from {0}")]
    NoRow(&'static str),
}

/// A named prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptRecord {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// One row per WhatsApp sender.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationRecord {
    #[serde(default)]
    pub id: i64,
    pub phone_number: String,
    #[serde(default)]
    pub user_name: Option<String>,
    /// `active` for live conversations, `reset` after a memory reset
    #[serde(default = "default_state")]
    pub current_state: String,
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub last_message_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

fn default_state() -> String {
    "active".to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageDirection {
    Incoming,
    Outgoing,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageDirection::Incoming => "incoming",
            MessageDirection::Outgoing => "outgoing",
        }
    }
}

/// A message to be logged.
#[derive(Debug, Clone, Serialize)]
pub struct NewMessageLog {
    pub phone_number: String,
    pub message_text: String,
    pub direction: MessageDirection,
    /// `received`, `sent` or `failed`
    pub status: String,
    pub metadata: Value,
}

impl NewMessageLog {
    pub fn incoming(phone_number: &str, text: &str) -> Self {
        Self {
            phone_number: phone_number.to_string(),
            message_text: text.to_string(),
            direction: MessageDirection::Incoming,
            status: "received".to_string(),
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn outgoing(phone_number: &str, text: &str, status: &str) -> Self {
        Self {
            phone_number: phone_number.to_string(),
            message_text: text.to_string(),
            direction: MessageDirection::Outgoing,
            status: status.to_string(),
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A logged message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageLogRecord {
    #[serde(default)]
    pub id: i64,
    pub phone_number: String,
    pub message_text: String,
    pub direction: MessageDirection,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Metrics for one generated reply.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NewAiResponse {
    pub message_log_id: Option<i64>,
    pub response_text: String,
    pub prompt_used: Option<String>,
    pub model_used: Option<String>,
    pub tokens_used: Option<u64>,
    pub response_time_ms: Option<u64>,
    /// Degradation reason when the reply was a fallback string
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiResponseRecord {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub message_log_id: Option<i64>,
    pub response_text: String,
    #[serde(default)]
    pub prompt_used: Option<String>,
    #[serde(default)]
    pub model_used: Option<String>,
    #[serde(default)]
    pub tokens_used: Option<u64>,
    #[serde(default)]
    pub response_time_ms: Option<u64>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Message counts over a trailing window of days.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalyticsSummary {
    pub period_days: u32,
    pub total_messages: u64,
    pub incoming_messages: u64,
    pub outgoing_messages: u64,
    pub unique_users: u64,
}

/// Source of system prompts.
#[async_trait]
pub trait PromptStore: Send + Sync {
    /// The active prompt with this name, if any.
    async fn get_active_prompt(&self, name: &str) -> Result<Option<PromptRecord>, StorageError>;

    /// Create the prompt, or update content/description/activity of an existing one.
    async fn upsert_prompt(
        &self,
        name: &str,
        content: &str,
        description: Option<&str>,
        is_active: bool,
    ) -> Result<PromptRecord, StorageError>;

    /// Most recently updated prompts first.
    async fn list_prompts(&self, limit: usize) -> Result<Vec<PromptRecord>, StorageError>;
}

/// Conversation bookkeeping and message/AI-response logs.
#[async_trait]
pub trait ChatLogStore: Send + Sync {
    /// Whether data survives a restart.
    fn is_persistent(&self) -> bool;

    /// Fetch the sender's conversation (touching `last_message_at`) or create it.
    async fn get_or_create_conversation(
        &self,
        phone_number: &str,
        user_name: Option<&str>,
    ) -> Result<ConversationRecord, StorageError>;

    async fn get_conversation(
        &self,
        phone_number: &str,
    ) -> Result<Option<ConversationRecord>, StorageError>;

    /// Most recently active first.
    async fn list_conversations(
        &self,
        limit: usize,
        active_only: bool,
    ) -> Result<Vec<ConversationRecord>, StorageError>;

    /// Clear the stored context and mark the conversation `reset`.
    async fn reset_conversation(&self, phone_number: &str) -> Result<(), StorageError>;

    /// Delete the conversation and all of its message logs.
    async fn delete_conversation(&self, phone_number: &str) -> Result<(), StorageError>;

    async fn save_message_log(&self, log: NewMessageLog)
        -> Result<MessageLogRecord, StorageError>;

    /// Newest messages first.
    async fn conversation_history(
        &self,
        phone_number: &str,
        limit: usize,
    ) -> Result<Vec<MessageLogRecord>, StorageError>;

    async fn save_ai_response(
        &self,
        response: NewAiResponse,
    ) -> Result<AiResponseRecord, StorageError>;

    async fn analytics_summary(&self, days: u32) -> Result<AnalyticsSummary, StorageError>;
}

/// The configured storage backend behind both store traits.
#[derive(Clone)]
pub struct Stores {
    pub prompts: Arc<dyn PromptStore>,
    pub chat_logs: Arc<dyn ChatLogStore>,
}

impl Stores {
    /// Use one backend for both traits.
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: PromptStore + ChatLogStore + 'static,
    {
        Self {
            prompts: backend.clone(),
            chat_logs: backend,
        }
    }
}

/// Initialize storage.
///
/// Falls back to a non-persistent in-memory store when Supabase is not configured.
pub fn init_storage(config: &StorageConfig) -> Stores {
    match (config.supabase_url.as_deref(), config.effective_key()) {
        (Some(url), Some(key)) => {
            tracing::info!("Storage: Supabase at {}", url);
            Stores::from_backend(Arc::new(SupabaseClient::new(url, key)))
        }
        _ => {
            tracing::warn!("Supabase not configured - using in-memory storage");
            Stores::from_backend(Arc::new(InMemoryStore::new()))
        }
    }
}

/// Current time in the format stored in timestamp columns.
pub(crate) fn now_string() -> String {
    Utc::now().to_rfc3339()
}
