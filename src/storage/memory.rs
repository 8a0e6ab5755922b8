//! In-memory store (non-persistent).
//!
//! Used when Supabase is not configured. Message logs and AI responses are
//! capped at a fixed number of rows each; once full, the oldest rows are
//! dropped to make room.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use super::{
    now_string, AiResponseRecord, AnalyticsSummary, ChatLogStore, ConversationRecord,
    MessageDirection, MessageLogRecord, NewAiResponse, NewMessageLog, PromptRecord, PromptStore,
    StorageError,
};

#[derive(Default)]
struct Tables {
    next_id: i64,
    prompts: HashMap<String, PromptRecord>,
    conversations: HashMap<String, ConversationRecord>,
    message_logs: VecDeque<MessageLogRecord>,
    ai_responses: VecDeque<AiResponseRecord>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Rows kept per log table by default.
const DEFAULT_ROW_LIMIT: usize = 10_000;

#[derive(Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    row_limit: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_row_limit(DEFAULT_ROW_LIMIT)
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store keeping at most `row_limit` message logs and AI responses.
    pub fn with_row_limit(row_limit: usize) -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            row_limit: row_limit.max(1),
        }
    }

    /// Saved AI responses, oldest first.
    pub async fn ai_responses(&self) -> Vec<AiResponseRecord> {
        self.tables.read().await.ai_responses.iter().cloned().collect()
    }
}

fn push_bounded<T>(rows: &mut VecDeque<T>, row: T, limit: usize) {
    while rows.len() >= limit {
        rows.pop_front();
    }
    rows.push_back(row);
}

fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl PromptStore for InMemoryStore {
    async fn get_active_prompt(&self, name: &str) -> Result<Option<PromptRecord>, StorageError> {
        Ok(self
            .tables
            .read()
            .await
            .prompts
            .get(name)
            .filter(|p| p.is_active)
            .cloned())
    }

    async fn upsert_prompt(
        &self,
        name: &str,
        content: &str,
        description: Option<&str>,
        is_active: bool,
    ) -> Result<PromptRecord, StorageError> {
        let now = now_string();
        let mut tables = self.tables.write().await;

        if let Some(existing) = tables.prompts.get_mut(name) {
            existing.content = content.to_string();
            existing.description = description.map(|s| s.to_string());
            existing.is_active = is_active;
            existing.updated_at = Some(now);
            return Ok(existing.clone());
        }

        let prompt = PromptRecord {
            id: tables.next_id(),
            name: name.to_string(),
            content: content.to_string(),
            description: description.map(|s| s.to_string()),
            is_active,
            created_at: Some(now.clone()),
            updated_at: Some(now),
        };
        tables.prompts.insert(name.to_string(), prompt.clone());
        Ok(prompt)
    }

    async fn list_prompts(&self, limit: usize) -> Result<Vec<PromptRecord>, StorageError> {
        let mut prompts: Vec<PromptRecord> =
            self.tables.read().await.prompts.values().cloned().collect();
        prompts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        prompts.truncate(limit);
        Ok(prompts)
    }
}

#[async_trait]
impl ChatLogStore for InMemoryStore {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn get_or_create_conversation(
        &self,
        phone_number: &str,
        user_name: Option<&str>,
    ) -> Result<ConversationRecord, StorageError> {
        let now = now_string();
        let mut tables = self.tables.write().await;

        if let Some(existing) = tables.conversations.get_mut(phone_number) {
            existing.last_message_at = Some(now.clone());
            existing.updated_at = Some(now);
            return Ok(existing.clone());
        }

        let conversation = ConversationRecord {
            id: tables.next_id(),
            phone_number: phone_number.to_string(),
            user_name: user_name.map(|s| s.to_string()),
            current_state: "active".to_string(),
            context: Value::Object(Default::default()),
            last_message_at: Some(now.clone()),
            created_at: Some(now.clone()),
            updated_at: Some(now),
        };
        tables
            .conversations
            .insert(phone_number.to_string(), conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(
        &self,
        phone_number: &str,
    ) -> Result<Option<ConversationRecord>, StorageError> {
        Ok(self
            .tables
            .read()
            .await
            .conversations
            .get(phone_number)
            .cloned())
    }

    async fn list_conversations(
        &self,
        limit: usize,
        active_only: bool,
    ) -> Result<Vec<ConversationRecord>, StorageError> {
        let mut conversations: Vec<ConversationRecord> = self
            .tables
            .read()
            .await
            .conversations
            .values()
            .filter(|c| !active_only || c.current_state == "active")
            .cloned()
            .collect();
        conversations.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then(b.id.cmp(&a.id))
        });
        conversations.truncate(limit);
        Ok(conversations)
    }

    async fn reset_conversation(&self, phone_number: &str) -> Result<(), StorageError> {
        if let Some(conversation) = self.tables.write().await.conversations.get_mut(phone_number) {
            conversation.context = Value::Object(Default::default());
            conversation.current_state = "reset".to_string();
            conversation.updated_at = Some(now_string());
        }
        Ok(())
    }

    async fn delete_conversation(&self, phone_number: &str) -> Result<(), StorageError> {
        let mut tables = self.tables.write().await;
        tables.message_logs.retain(|m| m.phone_number != phone_number);
        tables.conversations.remove(phone_number);
        Ok(())
    }

    async fn save_message_log(
        &self,
        log: NewMessageLog,
    ) -> Result<MessageLogRecord, StorageError> {
        let mut tables = self.tables.write().await;
        let record = MessageLogRecord {
            id: tables.next_id(),
            phone_number: log.phone_number,
            message_text: log.message_text,
            direction: log.direction,
            status: log.status,
            metadata: log.metadata,
            created_at: Some(now_string()),
        };
        push_bounded(&mut tables.message_logs, record.clone(), self.row_limit);
        Ok(record)
    }

    async fn conversation_history(
        &self,
        phone_number: &str,
        limit: usize,
    ) -> Result<Vec<MessageLogRecord>, StorageError> {
        Ok(self
            .tables
            .read()
            .await
            .message_logs
            .iter()
            .rev()
            .filter(|m| m.phone_number == phone_number)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn save_ai_response(
        &self,
        response: NewAiResponse,
    ) -> Result<AiResponseRecord, StorageError> {
        let mut tables = self.tables.write().await;
        let record = AiResponseRecord {
            id: tables.next_id(),
            message_log_id: response.message_log_id,
            response_text: response.response_text,
            prompt_used: response.prompt_used,
            model_used: response.model_used,
            tokens_used: response.tokens_used,
            response_time_ms: response.response_time_ms,
            error_message: response.error_message,
            created_at: Some(now_string()),
        };
        push_bounded(&mut tables.ai_responses, record.clone(), self.row_limit);
        Ok(record)
    }

    async fn analytics_summary(&self, days: u32) -> Result<AnalyticsSummary, StorageError> {
        let since = Utc::now() - chrono::Duration::days(i64::from(days));
        let tables = self.tables.read().await;

        let mut summary = AnalyticsSummary {
            period_days: days,
            ..AnalyticsSummary::default()
        };
        let mut senders = HashSet::new();

        for log in tables
            .message_logs
            .iter()
            .filter(|m| parse_timestamp(m.created_at.as_deref()).map_or(false, |t| t >= since))
        {
            summary.total_messages += 1;
            match log.direction {
                MessageDirection::Incoming => summary.incoming_messages += 1,
                MessageDirection::Outgoing => summary.outgoing_messages += 1,
            }
            senders.insert(log.phone_number.as_str());
        }
        summary.unique_users = senders.len() as u64;

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_create_conversation_is_idempotent() {
        let store = InMemoryStore::new();

        let first = store
            .get_or_create_conversation("5511999999999", Some("Ana"))
            .await
            .expect("Failed to create conversation");
        let second = store
            .get_or_create_conversation("5511999999999", None)
            .await
            .expect("Failed to get conversation");

        assert_eq!(first.id, second.id);
        assert_eq!(second.user_name.as_deref(), Some("Ana"));
        assert_eq!(second.current_state, "active");
    }

    #[tokio::test]
    async fn test_inactive_prompt_is_not_returned() {
        let store = InMemoryStore::new();
        store
            .upsert_prompt("system_prompt", "old", None, false)
            .await
            .unwrap();
        assert!(store.get_active_prompt("system_prompt").await.unwrap().is_none());

        let updated = store
            .upsert_prompt("system_prompt", "new", Some("main"), true)
            .await
            .unwrap();
        assert_eq!(updated.content, "new");
        assert_eq!(store.list_prompts(20).await.unwrap().len(), 1);
        assert_eq!(
            store
                .get_active_prompt("system_prompt")
                .await
                .unwrap()
                .map(|p| p.content),
            Some("new".to_string())
        );
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_limited() {
        let store = InMemoryStore::new();
        for text in ["uno", "dos", "tres"] {
            store
                .save_message_log(NewMessageLog::incoming("a", text))
                .await
                .unwrap();
        }
        store
            .save_message_log(NewMessageLog::incoming("b", "otro"))
            .await
            .unwrap();

        let history = store.conversation_history("a", 2).await.unwrap();
        let texts: Vec<&str> = history.iter().map(|m| m.message_text.as_str()).collect();
        assert_eq!(texts, vec!["tres", "dos"]);
    }

    #[tokio::test]
    async fn test_row_limit_drops_oldest_logs() {
        let store = InMemoryStore::with_row_limit(3);
        for text in ["uno", "dos", "tres", "cuatro", "cinco"] {
            store
                .save_message_log(NewMessageLog::incoming("a", text))
                .await
                .unwrap();
            store
                .save_ai_response(NewAiResponse {
                    response_text: format!("re: {}", text),
                    ..NewAiResponse::default()
                })
                .await
                .unwrap();
        }

        let history = store.conversation_history("a", 10).await.unwrap();
        let texts: Vec<&str> = history.iter().map(|m| m.message_text.as_str()).collect();
        assert_eq!(texts, vec!["cinco", "cuatro", "tres"]);

        let responses: Vec<String> = store
            .ai_responses()
            .await
            .into_iter()
            .map(|r| r.response_text)
            .collect();
        assert_eq!(responses, vec!["re: tres", "re: cuatro", "re: cinco"]);
    }

    #[tokio::test]
    async fn test_reset_and_delete_conversation() {
        let store = InMemoryStore::new();
        store.get_or_create_conversation("a", None).await.unwrap();
        store
            .save_message_log(NewMessageLog::incoming("a", "Hola"))
            .await
            .unwrap();

        store.reset_conversation("a").await.unwrap();
        let conversation = store.get_conversation("a").await.unwrap().unwrap();
        assert_eq!(conversation.current_state, "reset");
        assert!(store.list_conversations(20, true).await.unwrap().is_empty());

        store.delete_conversation("a").await.unwrap();
        assert!(store.get_conversation("a").await.unwrap().is_none());
        assert!(store.conversation_history("a", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_analytics_summary_counts_directions_and_senders() {
        let store = InMemoryStore::new();
        store
            .save_message_log(NewMessageLog::incoming("a", "Hola"))
            .await
            .unwrap();
        store
            .save_message_log(NewMessageLog::outgoing("a", "¡Hola!", "sent"))
            .await
            .unwrap();
        store
            .save_message_log(NewMessageLog::incoming("b", "Hey"))
            .await
            .unwrap();

        let summary = store.analytics_summary(7).await.unwrap();
        assert_eq!(summary.total_messages, 3);
        assert_eq!(summary.incoming_messages, 2);
        assert_eq!(summary.outgoing_messages, 1);
        assert_eq!(summary.unique_users, 2);
    }
}
