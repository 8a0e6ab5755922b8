//! WhatsApp integration through Evolution API.
//!
//! - Inbound: `messages.upsert` webhook payloads are parsed into an action
//! - Outbound: [`EvolutionClient`] delivers replies

mod evolution;

pub use evolution::{EvolutionClient, MessageSender, SendOutcome};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const JID_SUFFIX: &str = "@s.whatsapp.net";

/// Webhook envelope sent by Evolution API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionWebhook {
    /// Event type, e.g. `messages.upsert`
    pub event: String,
    /// Evolution instance name
    pub instance: String,
    /// Event payload
    pub data: Value,
}

/// A text message to answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Sender number without the JID suffix
    pub from_number: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoMessageText,
    NoPhoneNumber,
    /// Sent by this bot's own number
    FromMe,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NoMessageText => "no_message_text",
            SkipReason::NoPhoneNumber => "no_phone_number",
            SkipReason::FromMe => "from_me",
        }
    }
}

/// What to do with a `messages.upsert` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookAction {
    Process(InboundMessage),
    Skipped(SkipReason),
    /// Payload is unusable; the string is a stable reason code
    Error(&'static str),
}

/// Payload rejected outright (HTTP 400).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("Missing 'key' in data")]
    MissingKey,

    #[error("Missing 'message' in data")]
    MissingMessage,
}

/// Parse a `messages.upsert` payload.
pub fn parse_message_upsert(webhook: &EvolutionWebhook) -> Result<WebhookAction, WebhookError> {
    let key = webhook
        .data
        .get("key")
        .filter(|v| !is_blank(v))
        .ok_or(WebhookError::MissingKey)?;
    let message = webhook
        .data
        .get("message")
        .filter(|v| !is_blank(v))
        .ok_or(WebhookError::MissingMessage)?;

    if key.get("fromMe").and_then(Value::as_bool).unwrap_or(false) {
        return Ok(WebhookAction::Skipped(SkipReason::FromMe));
    }

    let remote_jid = key
        .get("remoteJid")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if remote_jid.is_empty() {
        return Ok(WebhookAction::Error("missing_remote_jid"));
    }
    let from_number = remote_jid.replace(JID_SUFFIX, "");

    let text = message_text(message);
    if text.trim().is_empty() {
        return Ok(WebhookAction::Skipped(SkipReason::NoMessageText));
    }
    if from_number.is_empty() {
        return Ok(WebhookAction::Skipped(SkipReason::NoPhoneNumber));
    }

    Ok(WebhookAction::Process(InboundMessage {
        from_number,
        text: text.to_string(),
    }))
}

/// Plain text of a message: `conversation`, else `extendedTextMessage.text`.
fn message_text(message: &Value) -> &str {
    message
        .get("conversation")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .or_else(|| {
            message
                .get("extendedTextMessage")
                .and_then(|m| m.get("text"))
                .and_then(Value::as_str)
        })
        .unwrap_or_default()
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Number(_) => false,
    }
}

/// First `max_chars` characters of `text`.
pub fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn webhook(data: Value) -> EvolutionWebhook {
        EvolutionWebhook {
            event: "messages.upsert".to_string(),
            instance: "ia-whatsapp".to_string(),
            data,
        }
    }

    #[test]
    fn test_conversation_message_is_processed() {
        let action = parse_message_upsert(&webhook(json!({
            "key": {"remoteJid": "5511999999999@s.whatsapp.net", "fromMe": false},
            "message": {"conversation": "Hola"}
        })))
        .unwrap();

        assert_eq!(
            action,
            WebhookAction::Process(InboundMessage {
                from_number: "5511999999999".to_string(),
                text: "Hola".to_string(),
            })
        );
    }

    #[test]
    fn test_extended_text_message_is_used() {
        let action = parse_message_upsert(&webhook(json!({
            "key": {"remoteJid": "5511999999999@s.whatsapp.net"},
            "message": {"extendedTextMessage": {"text": "Mira esto https://example.com"}}
        })))
        .unwrap();
        assert!(matches!(action, WebhookAction::Process(m) if m.text.starts_with("Mira")));
    }

    #[test]
    fn test_own_messages_are_skipped() {
        let action = parse_message_upsert(&webhook(json!({
            "key": {"remoteJid": "5511999999999@s.whatsapp.net", "fromMe": true},
            "message": {"conversation": "respuesta del bot"}
        })))
        .unwrap();
        assert_eq!(action, WebhookAction::Skipped(SkipReason::FromMe));
    }

    #[test]
    fn test_media_without_text_is_skipped() {
        let action = parse_message_upsert(&webhook(json!({
            "key": {"remoteJid": "5511999999999@s.whatsapp.net"},
            "message": {"imageMessage": {"url": "https://example.com/a.jpg"}}
        })))
        .unwrap();
        assert_eq!(action, WebhookAction::Skipped(SkipReason::NoMessageText));
    }

    #[test]
    fn test_missing_remote_jid_is_an_error_action() {
        let action = parse_message_upsert(&webhook(json!({
            "key": {"id": "ABC"},
            "message": {"conversation": "Hola"}
        })))
        .unwrap();
        assert_eq!(action, WebhookAction::Error("missing_remote_jid"));
    }

    #[test]
    fn test_bare_suffix_has_no_phone_number() {
        let action = parse_message_upsert(&webhook(json!({
            "key": {"remoteJid": "@s.whatsapp.net"},
            "message": {"conversation": "Hola"}
        })))
        .unwrap();
        assert_eq!(action, WebhookAction::Skipped(SkipReason::NoPhoneNumber));
    }

    #[test]
    fn test_missing_key_or_message_is_rejected() {
        assert_eq!(
            parse_message_upsert(&webhook(json!({"message": {"conversation": "x"}}))),
            Err(WebhookError::MissingKey)
        );
        assert_eq!(
            parse_message_upsert(&webhook(json!({"key": {"remoteJid": "1"}, "message": {}}))),
            Err(WebhookError::MissingMessage)
        );
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        assert_eq!(preview("¿Qué tal?", 4), "¿Qué");
        assert_eq!(preview("hi", 100), "hi");
    }
}
