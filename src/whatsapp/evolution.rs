//! Evolution API client for outbound WhatsApp messages.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::EvolutionConfig;

const SEND_TEXT_TIMEOUT: Duration = Duration::from_secs(10);
const SEND_MEDIA_TIMEOUT: Duration = Duration::from_secs(15);
const STATUS_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of a call to Evolution API. Failures are values, never errors.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SendOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Delivery of reply text to a WhatsApp number.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_text(&self, number: &str, text: &str) -> SendOutcome;
}

pub struct EvolutionClient {
    client: Client,
    api_url: Option<String>,
    api_key: Option<String>,
    instance: String,
}

impl EvolutionClient {
    pub fn from_config(config: &EvolutionConfig) -> Self {
        Self {
            client: Client::new(),
            api_url: config
                .api_url
                .as_deref()
                .map(|u| u.trim_end_matches('/').to_string()),
            api_key: config.api_key.clone(),
            instance: config.instance.clone(),
        }
    }

    /// Check if URL and key are both set.
    pub fn is_configured(&self) -> bool {
        self.credentials().is_some()
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    fn credentials(&self) -> Option<(&str, &str)> {
        match (self.api_url.as_deref(), self.api_key.as_deref()) {
            (Some(url), Some(key)) if !url.is_empty() && !key.is_empty() => Some((url, key)),
            _ => None,
        }
    }

    /// Send an image, audio, video or document by URL.
    pub async fn send_media(
        &self,
        number: &str,
        media_url: &str,
        media_type: &str,
        caption: Option<&str>,
    ) -> SendOutcome {
        let mut body = json!({
            "number": number,
            "mediaUrl": media_url,
            "mediaType": media_type,
        });
        if let Some(caption) = caption.filter(|c| !c.is_empty()) {
            body["caption"] = json!(caption);
        }

        let outcome = self
            .post("sendMedia", &body, SEND_MEDIA_TIMEOUT, StatusCode::CREATED)
            .await;
        if outcome.success {
            tracing::info!(number = %number, media_type = %media_type, "Media sent");
        } else {
            tracing::warn!(number = %number, "Failed to send media: {:?}", outcome.error);
        }
        outcome
    }

    /// Connection state of the configured instance.
    pub async fn instance_status(&self) -> SendOutcome {
        let Some((url, key)) = self.credentials() else {
            return SendOutcome::failed("Evolution API not configured");
        };

        let request = self
            .client
            .get(format!("{}/instance/connectionState/{}", url, self.instance))
            .header("apikey", key)
            .timeout(STATUS_TIMEOUT);
        Self::execute(request, StatusCode::OK).await
    }

    async fn post(
        &self,
        endpoint: &str,
        body: &Value,
        timeout: Duration,
        expected: StatusCode,
    ) -> SendOutcome {
        let Some((url, key)) = self.credentials() else {
            tracing::warn!("Evolution API not configured");
            return SendOutcome::failed("Evolution API not configured");
        };

        let request = self
            .client
            .post(format!("{}/message/{}/{}", url, endpoint, self.instance))
            .header("apikey", key)
            .json(body)
            .timeout(timeout);
        Self::execute(request, expected).await
    }

    async fn execute(request: reqwest::RequestBuilder, expected: StatusCode) -> SendOutcome {
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return SendOutcome::failed("Timeout"),
            Err(e) => return SendOutcome::failed(e.to_string()),
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                return SendOutcome {
                    status_code: Some(status.as_u16()),
                    ..SendOutcome::failed(e.to_string())
                }
            }
        };

        if status == expected {
            SendOutcome {
                success: true,
                status_code: Some(status.as_u16()),
                body: parse_body(&text),
                error: None,
            }
        } else {
            SendOutcome {
                status_code: Some(status.as_u16()),
                ..SendOutcome::failed(text)
            }
        }
    }
}

#[async_trait]
impl MessageSender for EvolutionClient {
    async fn send_text(&self, number: &str, text: &str) -> SendOutcome {
        let body = json!({ "number": number, "text": text });
        let outcome = self
            .post("sendText", &body, SEND_TEXT_TIMEOUT, StatusCode::CREATED)
            .await;
        if outcome.success {
            tracing::info!(number = %number, "Message sent");
        } else {
            tracing::warn!(
                number = %number,
                status = ?outcome.status_code,
                "Failed to send message: {:?}",
                outcome.error
            );
        }
        outcome
    }
}

fn parse_body(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
}
