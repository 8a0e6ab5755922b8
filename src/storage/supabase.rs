//! Supabase client for the PostgREST API.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use super::{
    now_string, AiResponseRecord, AnalyticsSummary, ChatLogStore, ConversationRecord,
    MessageDirection, MessageLogRecord, NewAiResponse, NewMessageLog, PromptRecord, PromptStore,
    StorageError,
};

/// Supabase client for database operations.
pub struct SupabaseClient {
    client: Client,
    url: String,
    key: String,
}

impl SupabaseClient {
    /// Create a new Supabase client.
    pub fn new(url: &str, key: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
            key: key.to_string(),
        }
    }

    /// Get the PostgREST URL.
    fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.url)
    }

    /// Authenticated request against a table path (with query string).
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.rest_url(), path))
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", self.key))
    }

    /// Send and decode the returned rows.
    async fn rows<T: DeserializeOwned>(
        request: RequestBuilder,
        operation: &'static str,
    ) -> Result<Vec<T>, StorageError> {
        let resp = request.send().await?;
        let text = Self::checked_text(resp, operation).await?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Send and decode exactly one returned row.
    async fn single<T: DeserializeOwned>(
        request: RequestBuilder,
        operation: &'static str,
    ) -> Result<T, StorageError> {
        Self::rows(request, operation)
            .await?
            .into_iter()
            .next()
            .ok_or(StorageError::NoRow(operation))
    }

    async fn checked_text(resp: Response, operation: &'static str) -> Result<String, StorageError> {
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(StorageError::Http {
                operation,
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }

    /// Exact row count for a filtered table, read from `Content-Range`.
    async fn count(&self, path: &str, operation: &'static str) -> Result<u64, StorageError> {
        let resp = self
            .request(Method::HEAD, path)
            .header("Prefer", "count=exact")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(StorageError::Http {
                operation,
                status: status.as_u16(),
                body: String::new(),
            });
        }

        Ok(resp
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .unwrap_or(0))
    }
}

/// `eq.` filter value, URL-encoded.
fn eq(value: &str) -> String {
    format!("eq.{}", urlencoding::encode(value))
}

/// Total from a PostgREST `Content-Range` header such as `0-24/573` or `*/0`.
fn parse_content_range_total(header: &str) -> Option<u64> {
    header.rsplit('/').next()?.trim().parse().ok()
}

#[async_trait]
impl PromptStore for SupabaseClient {
    async fn get_active_prompt(&self, name: &str) -> Result<Option<PromptRecord>, StorageError> {
        let prompts: Vec<PromptRecord> = Self::rows(
            self.request(
                Method::GET,
                &format!("prompts?name={}&is_active=eq.true&limit=1", eq(name)),
            ),
            "get active prompt",
        )
        .await?;
        Ok(prompts.into_iter().next())
    }

    async fn upsert_prompt(
        &self,
        name: &str,
        content: &str,
        description: Option<&str>,
        is_active: bool,
    ) -> Result<PromptRecord, StorageError> {
        let existing: Vec<PromptRecord> = Self::rows(
            self.request(Method::GET, &format!("prompts?name={}&limit=1", eq(name))),
            "look up prompt",
        )
        .await?;

        let now = now_string();
        if existing.is_empty() {
            let body = json!({
                "name": name,
                "content": content,
                "description": description,
                "is_active": is_active,
                "created_at": now,
                "updated_at": now,
            });
            Self::single(
                self.request(Method::POST, "prompts")
                    .header("Prefer", "return=representation")
                    .json(&body),
                "create prompt",
            )
            .await
        } else {
            let body = json!({
                "content": content,
                "description": description,
                "is_active": is_active,
                "updated_at": now,
            });
            Self::single(
                self.request(Method::PATCH, &format!("prompts?name={}", eq(name)))
                    .header("Prefer", "return=representation")
                    .json(&body),
                "update prompt",
            )
            .await
        }
    }

    async fn list_prompts(&self, limit: usize) -> Result<Vec<PromptRecord>, StorageError> {
        Self::rows(
            self.request(
                Method::GET,
                &format!("prompts?order=updated_at.desc&limit={}", limit),
            ),
            "list prompts",
        )
        .await
    }
}

#[async_trait]
impl ChatLogStore for SupabaseClient {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn get_or_create_conversation(
        &self,
        phone_number: &str,
        user_name: Option<&str>,
    ) -> Result<ConversationRecord, StorageError> {
        let now = now_string();
        let filter = format!("conversations?phone_number={}", eq(phone_number));

        let existing: Vec<ConversationRecord> = Self::rows(
            self.request(Method::GET, &format!("{}&limit=1", filter)),
            "look up conversation",
        )
        .await?;

        if let Some(conversation) = existing.into_iter().next() {
            let updated: Vec<ConversationRecord> = Self::rows(
                self.request(Method::PATCH, &filter)
                    .header("Prefer", "return=representation")
                    .json(&json!({ "last_message_at": now, "updated_at": now })),
                "touch conversation",
            )
            .await?;
            return Ok(updated.into_iter().next().unwrap_or(conversation));
        }

        let body = json!({
            "phone_number": phone_number,
            "user_name": user_name,
            "current_state": "active",
            "context": {},
            "last_message_at": now,
            "created_at": now,
            "updated_at": now,
        });
        Self::single(
            self.request(Method::POST, "conversations")
                .header("Prefer", "return=representation")
                .json(&body),
            "create conversation",
        )
        .await
    }

    async fn get_conversation(
        &self,
        phone_number: &str,
    ) -> Result<Option<ConversationRecord>, StorageError> {
        let rows: Vec<ConversationRecord> = Self::rows(
            self.request(
                Method::GET,
                &format!("conversations?phone_number={}&limit=1", eq(phone_number)),
            ),
            "get conversation",
        )
        .await?;
        Ok(rows.into_iter().next())
    }

    async fn list_conversations(
        &self,
        limit: usize,
        active_only: bool,
    ) -> Result<Vec<ConversationRecord>, StorageError> {
        let mut path = format!("conversations?order=last_message_at.desc&limit={}", limit);
        if active_only {
            path.push_str("&current_state=eq.active");
        }
        Self::rows(self.request(Method::GET, &path), "list conversations").await
    }

    async fn reset_conversation(&self, phone_number: &str) -> Result<(), StorageError> {
        let resp = self
            .request(
                Method::PATCH,
                &format!("conversations?phone_number={}", eq(phone_number)),
            )
            .json(&json!({
                "context": {},
                "current_state": "reset",
                "updated_at": now_string(),
            }))
            .send()
            .await?;
        Self::checked_text(resp, "reset conversation").await?;
        Ok(())
    }

    async fn delete_conversation(&self, phone_number: &str) -> Result<(), StorageError> {
        let resp = self
            .request(
                Method::DELETE,
                &format!("message_logs?phone_number={}", eq(phone_number)),
            )
            .send()
            .await?;
        Self::checked_text(resp, "delete message logs").await?;

        let resp = self
            .request(
                Method::DELETE,
                &format!("conversations?phone_number={}", eq(phone_number)),
            )
            .send()
            .await?;
        Self::checked_text(resp, "delete conversation").await?;
        Ok(())
    }

    async fn save_message_log(
        &self,
        log: NewMessageLog,
    ) -> Result<MessageLogRecord, StorageError> {
        let body = json!({
            "phone_number": log.phone_number,
            "message_text": log.message_text,
            "direction": log.direction,
            "status": log.status,
            "metadata": log.metadata,
            "created_at": now_string(),
        });
        Self::single(
            self.request(Method::POST, "message_logs")
                .header("Prefer", "return=representation")
                .json(&body),
            "save message log",
        )
        .await
    }

    async fn conversation_history(
        &self,
        phone_number: &str,
        limit: usize,
    ) -> Result<Vec<MessageLogRecord>, StorageError> {
        Self::rows(
            self.request(
                Method::GET,
                &format!(
                    "message_logs?phone_number={}&order=created_at.desc&limit={}",
                    eq(phone_number),
                    limit
                ),
            ),
            "get conversation history",
        )
        .await
    }

    async fn save_ai_response(
        &self,
        response: NewAiResponse,
    ) -> Result<AiResponseRecord, StorageError> {
        let mut body = serde_json::to_value(&response)?;
        body["created_at"] = json!(now_string());
        Self::single(
            self.request(Method::POST, "ai_responses")
                .header("Prefer", "return=representation")
                .json(&body),
            "save AI response",
        )
        .await
    }

    async fn analytics_summary(&self, days: u32) -> Result<AnalyticsSummary, StorageError> {
        let since = (Utc::now() - chrono::Duration::days(i64::from(days)))
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let window = format!("created_at=gte.{}", urlencoding::encode(&since));

        let total_path = format!("message_logs?{}", window);
        let incoming_path = format!(
            "message_logs?{}&direction=eq.{}",
            window,
            MessageDirection::Incoming.as_str()
        );
        let outgoing_path = format!(
            "message_logs?{}&direction=eq.{}",
            window,
            MessageDirection::Outgoing.as_str()
        );
        let senders_path = format!("message_logs?select=phone_number&{}", window);

        let (total, incoming, outgoing, senders) = futures::try_join!(
            self.count(&total_path, "count messages"),
            self.count(&incoming_path, "count incoming messages"),
            self.count(&outgoing_path, "count outgoing messages"),
            Self::rows::<SenderRow>(
                self.request(Method::GET, &senders_path),
                "list senders"
            ),
        )?;

        let unique: HashSet<String> = senders.into_iter().map(|r| r.phone_number).collect();

        Ok(AnalyticsSummary {
            period_days: days,
            total_messages: total,
            incoming_messages: incoming,
            outgoing_messages: outgoing,
            unique_users: unique.len() as u64,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SenderRow {
    phone_number: String,
}
