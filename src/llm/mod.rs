//! Model client module for talking to the generative language model.
//!
//! This module provides a trait-based abstraction over the model provider,
//! with Gemini's `generateContent` REST API as the implementation.
//!
//! A client is stateless: every call carries the full context (system prompt,
//! history, tool scratchpad) and returns a classified [`ModelResult`] together
//! with the token usage of that call.

mod error;
mod gemini;

pub use error::{classify_http_status, ProviderError, ProviderErrorKind, RetryConfig};
pub use gemini::GeminiClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One message in a conversation. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            text: text.into(),
        }
    }
}

/// Tool definition offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the tool's arguments
    pub parameters: serde_json::Value,
}

/// A tool call the model made during the current request, with its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolExchange {
    pub name: String,
    pub argument: String,
    pub result: String,
}

/// Everything needed for one model invocation.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system_prompt: String,
    /// Prior turns, oldest first
    pub history: Vec<ConversationTurn>,
    pub user_input: String,
    /// Tool calls already resolved for this user input, in call order
    pub tool_exchanges: Vec<ToolExchange>,
    /// Tools the model may call
    pub tools: Vec<ToolSpec>,
    /// Sampling temperature in `[0, 1]`
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// Coarse category of a provider-side content filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterCategory {
    /// Safety / policy filters
    Safety,
    /// Copyright / recitation filter
    Recitation,
    /// Any other filter reason
    Other,
}

/// A filter reason as reported by the provider.
///
/// The raw code is kept for logging only; it must never reach the end user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterReason {
    pub code: String,
}

impl FilterReason {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }

    /// Map the provider code to a category.
    pub fn category(&self) -> FilterCategory {
        match self.code.to_ascii_uppercase().as_str() {
            "SAFETY" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" | "IMAGE_SAFETY" => {
                FilterCategory::Safety
            }
            "RECITATION" => FilterCategory::Recitation,
            _ => FilterCategory::Other,
        }
    }
}

/// Classified outcome of one model invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelResult {
    /// Non-empty textual answer
    Text(String),
    /// The model wants a tool invoked with the given argument
    ToolCall { name: String, argument: String },
    /// The provider withheld content for a filter reason
    Filtered(FilterReason),
    /// Neither text, tool call, nor a recognized filter reason
    Empty,
}

/// Token usage information reported by the provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Create a usage object ensuring `total_tokens` is consistent.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }

    /// Accumulate another call's usage into this one.
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self
            .completion_tokens
            .saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}

/// Result of a model call plus the telemetry that came with it.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCompletion {
    pub result: ModelResult,
    pub usage: Option<TokenUsage>,
}

impl ModelCompletion {
    pub fn new(result: ModelResult) -> Self {
        Self {
            result,
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Trait for model clients.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Identifier of the model this client talks to (recorded with AI responses).
    fn model_name(&self) -> &str;

    /// Issue one completion request.
    async fn complete(&self, request: &ModelRequest) -> Result<ModelCompletion, ProviderError>;
}
