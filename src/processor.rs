//! End-to-end handling of one inbound WhatsApp message.
//!
//! Order of side effects:
//! 1. get or create the conversation row
//! 2. log the incoming message
//! 3. generate the reply on the sender's agent
//! 4. deliver the reply
//! 5. log the outgoing message and the AI response metrics
//!
//! Persistence and delivery are independent: a failure in one is logged and
//! never prevents the other.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::agent::{AgentOrchestrator, ConversationRegistry, Reply, GENERIC_APOLOGY};
use crate::storage::{ChatLogStore, MessageLogRecord, NewAiResponse, NewMessageLog};
use crate::whatsapp::{preview, InboundMessage, MessageSender, SendOutcome};

/// Result of processing one message.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub reply: String,
    /// `None` when delivery was not attempted
    pub delivered: Option<bool>,
    pub degraded: bool,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
}

pub struct MessageProcessor {
    registry: Arc<ConversationRegistry>,
    chat_logs: Arc<dyn ChatLogStore>,
    sender: Arc<dyn MessageSender>,
    processing_timeout: Duration,
}

impl MessageProcessor {
    pub fn new(
        registry: Arc<ConversationRegistry>,
        chat_logs: Arc<dyn ChatLogStore>,
        sender: Arc<dyn MessageSender>,
        processing_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            chat_logs,
            sender,
            processing_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ConversationRegistry> {
        &self.registry
    }

    /// Generate a reply, deliver it, and persist both directions.
    pub async fn process_and_reply(&self, text: &str, from_number: &str) -> ProcessOutcome {
        self.handle(text, from_number, true).await
    }

    /// Generate and persist a reply without delivering it.
    pub async fn process_only(&self, text: &str, phone_number: &str) -> ProcessOutcome {
        self.handle(text, phone_number, false).await
    }

    /// Process a webhook message in the background, bounded by the processing timeout.
    ///
    /// On timeout the in-flight model, tool and HTTP calls are dropped, nothing
    /// is committed to the sender's memory window, and the sender gets the
    /// generic apology instead.
    pub fn spawn_process(self: &Arc<Self>, message: InboundMessage) -> JoinHandle<()> {
        let processor = Arc::clone(self);
        let span = tracing::info_span!(
            "process_message",
            request_id = %Uuid::new_v4(),
            from = %message.from_number
        );

        tokio::spawn(
            async move {
                match tokio::time::timeout(
                    processor.processing_timeout,
                    processor.process_and_reply(&message.text, &message.from_number),
                )
                .await
                {
                    Ok(outcome) => tracing::debug!(
                        delivered = ?outcome.delivered,
                        degraded = outcome.degraded,
                        "Message processed in {}ms",
                        outcome.response_time_ms
                    ),
                    Err(_) => {
                        tracing::error!(
                            "Processing timed out after {:?}",
                            processor.processing_timeout
                        );
                        processor.send_timeout_apology(&message.from_number).await;
                    }
                }
            }
            .instrument(span),
        )
    }

    async fn handle(&self, text: &str, phone_number: &str, deliver: bool) -> ProcessOutcome {
        let start = Instant::now();
        tracing::info!(from = %phone_number, "Incoming message: {}", preview(text, 50));

        if let Err(e) = self
            .chat_logs
            .get_or_create_conversation(phone_number, None)
            .await
        {
            tracing::warn!("Failed to get or create conversation: {}", e);
        }

        let incoming = self
            .log_message(NewMessageLog::incoming(phone_number, text))
            .await;

        let agent = self.registry.get_or_create(phone_number).await;
        let reply = agent.generate_detailed(text).await;
        let response_time_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            "Reply ({}ms, {} model calls, {} tool calls): {}",
            response_time_ms,
            reply.model_calls,
            reply.tool_invocations,
            preview(&reply.text, 100)
        );

        let (delivered, outgoing_status) = if deliver {
            let outcome = self.sender.send_text(phone_number, &reply.text).await;
            let status = if outcome.success { "sent" } else { "failed" };
            (Some(outcome.success), status_with_metadata(status, &outcome))
        } else {
            (None, ("processed", serde_json::json!({})))
        };

        let tokens_used = Some(reply.usage.total_tokens).filter(|t| *t > 0);
        let (status, metadata) = outgoing_status;
        futures::join!(
            self.log_message(
                NewMessageLog::outgoing(phone_number, &reply.text, status).with_metadata(metadata)
            ),
            self.log_ai_response(&agent, &reply, incoming.as_ref(), tokens_used, response_time_ms),
        );

        ProcessOutcome {
            degraded: reply.is_degraded(),
            reply: reply.text,
            delivered,
            response_time_ms,
            tokens_used,
        }
    }

    async fn send_timeout_apology(&self, phone_number: &str) {
        let outcome = self.sender.send_text(phone_number, GENERIC_APOLOGY).await;
        let status = if outcome.success { "sent" } else { "failed" };
        let (status, mut metadata) = status_with_metadata(status, &outcome);
        metadata["timed_out"] = true.into();
        self.log_message(
            NewMessageLog::outgoing(phone_number, GENERIC_APOLOGY, status).with_metadata(metadata),
        )
        .await;
    }

    async fn log_message(&self, log: NewMessageLog) -> Option<MessageLogRecord> {
        let direction = log.direction;
        match self.chat_logs.save_message_log(log).await {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("Failed to save {} message log: {}", direction.as_str(), e);
                None
            }
        }
    }

    async fn log_ai_response(
        &self,
        agent: &AgentOrchestrator,
        reply: &Reply,
        incoming: Option<&MessageLogRecord>,
        tokens_used: Option<u64>,
        response_time_ms: u64,
    ) {
        let response = NewAiResponse {
            message_log_id: incoming.map(|m| m.id),
            response_text: reply.text.clone(),
            prompt_used: Some(agent.system_prompt().to_string()),
            model_used: Some(agent.model_name().to_string()),
            tokens_used,
            response_time_ms: Some(response_time_ms),
            error_message: reply.degrade_reason().map(|r| r.to_string()),
        };
        if let Err(e) = self.chat_logs.save_ai_response(response).await {
            tracing::warn!("Failed to save AI response: {}", e);
        }
    }
}

/// Outgoing log status plus delivery details worth keeping.
fn status_with_metadata(status: &'static str, outcome: &SendOutcome) -> (&'static str, serde_json::Value) {
    let mut metadata = serde_json::json!({});
    if let Some(code) = outcome.status_code {
        metadata["status_code"] = code.into();
    }
    if let Some(error) = &outcome.error {
        metadata["error"] = error.clone().into();
    }
    (status, metadata)
}
