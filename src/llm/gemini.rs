//! Gemini `generateContent` client with automatic retry for transient errors.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

use super::error::{ProviderError, RetryConfig};
use super::{
    FilterReason, ModelClient, ModelCompletion, ModelRequest, ModelResult, TokenUsage, TurnRole,
};
use crate::config::ModelConfig;

/// Finish / block reasons that mean "content withheld by a filter".
const FILTER_REASONS: &[&str] = &[
    "SAFETY",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
    "IMAGE_SAFETY",
    "RECITATION",
    "OTHER",
    "LANGUAGE",
];

/// Gemini API client.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
    retry_config: RetryConfig,
}

impl GeminiClient {
    /// Build a client from model settings.
    ///
    /// The HTTP client carries the configured request timeout, so a hung
    /// provider surfaces as a `Timeout` error instead of blocking forever.
    pub fn from_config(config: &ModelConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            endpoint: format!(
                "{}/models/{}:generateContent",
                config.api_base.trim_end_matches('/'),
                config.model
            ),
            retry_config: RetryConfig::default(),
        })
    }

    /// Replace the retry policy.
    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    /// Parse Retry-After header if present.
    fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    /// Execute a single request without retry.
    async fn execute_request(
        &self,
        body: &GenerateContentRequest,
    ) -> Result<ModelCompletion, ProviderError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::timeout(format!("Request timeout: {}", e))
                } else if e.is_connect() {
                    ProviderError::unknown(format!("Connection failed: {}", e))
                } else {
                    ProviderError::unknown(format!("Request failed: {}", e))
                }
            })?;

        let status = response.status();
        let retry_after = Self::parse_retry_after(response.headers());
        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::timeout(format!("Timed out reading response: {}", e))
            } else {
                ProviderError::unknown(format!("Failed to read response: {}", e))
            }
        })?;

        if !status.is_success() {
            return Err(ProviderError::from_status(
                status.as_u16(),
                &text,
                retry_after,
            ));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&text).map_err(|e| {
            ProviderError::unknown(format!("Failed to parse response: {}, body: {}", e, text))
        })?;

        let usage = parsed.usage();
        let mut completion = ModelCompletion::new(classify_response(&parsed));
        if let Some(usage) = usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "Gemini token usage"
            );
            completion = completion.with_usage(usage);
        }
        Ok(completion)
    }

    /// Execute a request with automatic retry for transient errors.
    async fn execute_with_retry(
        &self,
        body: &GenerateContentRequest,
    ) -> Result<ModelCompletion, ProviderError> {
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            match self.execute_request(body).await {
                Ok(completion) => {
                    if attempt > 0 {
                        tracing::info!(
                            "Request succeeded after {} retries (total time: {:?})",
                            attempt,
                            start.elapsed()
                        );
                    }
                    return Ok(completion);
                }
                Err(error) => {
                    if !self.retry_config.should_retry(&error, attempt) {
                        if attempt > 0 {
                            tracing::error!(
                                "Request failed after {} retries (total time: {:?}): {}",
                                attempt,
                                start.elapsed(),
                                error
                            );
                        }
                        return Err(error);
                    }

                    let remaining = self
                        .retry_config
                        .max_retry_duration
                        .saturating_sub(start.elapsed());
                    if remaining.is_zero() {
                        tracing::warn!(
                            "Retry attempt {} failed, no time remaining: {}",
                            attempt + 1,
                            error
                        );
                        return Err(error);
                    }
                    let delay = error.suggested_delay(attempt).min(remaining);

                    tracing::warn!(
                        "Retry attempt {} failed with {}, retrying in {:?}: {}",
                        attempt + 1,
                        error.kind,
                        delay,
                        error.message
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelCompletion, ProviderError> {
        let body = GenerateContentRequest::from_model_request(request);
        tracing::debug!(
            "Sending request to Gemini: model={} history={} tool_exchanges={}",
            self.model,
            request.history.len(),
            request.tool_exchanges.len()
        );
        self.execute_with_retry(&body).await
    }
}

/// Turn a parsed response into a [`ModelResult`].
///
/// A function call wins over text, text wins over a finish reason, and a
/// finish/block reason only counts as filtered when it is a known filter code.
fn classify_response(response: &GenerateContentResponse) -> ModelResult {
    if let Some(candidate) = response.candidates.first() {
        let parts = candidate
            .content
            .as_ref()
            .map(|c| c.parts.as_slice())
            .unwrap_or(&[]);

        if let Some(call) = parts.iter().find_map(|p| p.function_call.as_ref()) {
            return ModelResult::ToolCall {
                name: call.name.clone(),
                argument: call_argument(&call.args),
            };
        }

        let text: String = parts
            .iter()
            .filter(|p| !p.thought.unwrap_or(false))
            .filter_map(|p| p.text.as_deref())
            .collect();
        if !text.trim().is_empty() {
            return ModelResult::Text(text);
        }

        if let Some(reason) = candidate.finish_reason.as_deref() {
            if is_filter_reason(reason) {
                return ModelResult::Filtered(FilterReason::new(reason));
            }
        }
    }

    if let Some(reason) = response
        .prompt_feedback
        .as_ref()
        .and_then(|f| f.block_reason.as_deref())
    {
        return ModelResult::Filtered(FilterReason::new(reason));
    }

    ModelResult::Empty
}

fn is_filter_reason(reason: &str) -> bool {
    FILTER_REASONS
        .iter()
        .any(|r| r.eq_ignore_ascii_case(reason))
}

/// The tool argument: the `query` string when present, else the raw JSON args.
fn call_argument(args: &Value) -> String {
    match args.get("query").and_then(Value::as_str) {
        Some(query) => query.to_string(),
        None if args.is_null() => "{}".to_string(),
        None => args.to_string(),
    }
}

/// Inverse of [`call_argument`] for replaying a tool exchange.
fn replay_args(argument: &str) -> Value {
    match serde_json::from_str::<Value>(argument) {
        Ok(value) if value.is_object() => value,
        _ => json!({ "query": argument }),
    }
}

/// Gemini request format.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDeclarations>,
    generation_config: GenerationConfig,
}

impl GenerateContentRequest {
    fn from_model_request(request: &ModelRequest) -> Self {
        // A trimmed window can start on a model turn; Gemini expects user first
        let mut contents: Vec<Content> = request
            .history
            .iter()
            .skip_while(|turn| turn.role == TurnRole::Assistant)
            .map(|turn| {
                let role = match turn.role {
                    TurnRole::User => "user",
                    TurnRole::Assistant => "model",
                };
                Content::text(role, &turn.text)
            })
            .collect();

        contents.push(Content::text("user", &request.user_input));

        for exchange in &request.tool_exchanges {
            contents.push(Content {
                role: Some("model".to_string()),
                parts: vec![Part {
                    function_call: Some(FunctionCall {
                        name: exchange.name.clone(),
                        args: replay_args(&exchange.argument),
                    }),
                    ..Part::default()
                }],
            });
            contents.push(Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    function_response: Some(FunctionResponse {
                        name: exchange.name.clone(),
                        response: json!({ "result": exchange.result }),
                    }),
                    ..Part::default()
                }],
            });
        }

        let tools = if request.tools.is_empty() {
            Vec::new()
        } else {
            vec![ToolDeclarations {
                function_declarations: request
                    .tools
                    .iter()
                    .map(|t| FunctionDeclaration {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    })
                    .collect(),
            }]
        };

        let system_instruction = if request.system_prompt.trim().is_empty() {
            None
        } else {
            Some(Content {
                role: None,
                parts: vec![Part::text(&request.system_prompt)],
            })
        };

        Self {
            system_instruction,
            contents,
            tools,
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn text(role: &str, text: &str) -> Self {
        Self {
            role: Some(role.to_string()),
            parts: vec![Part::text(text)],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
    /// Set on "thinking" parts, which are not part of the answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought: Option<bool>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclarations {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

/// Gemini response format.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

impl GenerateContentResponse {
    fn usage(&self) -> Option<TokenUsage> {
        self.usage_metadata.as_ref().map(|u| TokenUsage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: if u.total_token_count > 0 {
                u.total_token_count
            } else {
                u.prompt_token_count
                    .saturating_add(u.candidates_token_count)
            },
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    total_token_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ConversationTurn, ProviderErrorKind, ToolExchange, ToolSpec};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MODEL_PATH: &str = "/models/gemini-test:generateContent";

    fn client_for(server: &MockServer) -> GeminiClient {
        let mut config = ModelConfig::new("test-key");
        config.model = "gemini-test".to_string();
        config.api_base = server.uri();
        config.request_timeout = Duration::from_millis(500);
        GeminiClient::from_config(&config)
            .unwrap()
            .with_retry_config(RetryConfig::disabled())
    }

    fn request(input: &str) -> ModelRequest {
        ModelRequest {
            system_prompt: "Be brief.".to_string(),
            history: vec![
                ConversationTurn::user("Hola"),
                ConversationTurn::assistant("¡Hola!"),
            ],
            user_input: input.to_string(),
            tool_exchanges: Vec::new(),
            tools: Vec::new(),
            temperature: 0.2,
            max_output_tokens: 256,
        }
    }

    fn parse(body: Value) -> ModelResult {
        let response: GenerateContentResponse = serde_json::from_value(body).unwrap();
        classify_response(&response)
    }

    #[test]
    fn test_classify_text_joins_parts_and_skips_thoughts() {
        let result = parse(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "thinking...", "thought": true},
                    {"text": "Hace 22°C "},
                    {"text": "en Lima."}
                ]},
                "finishReason": "STOP"
            }]
        }));
        assert_eq!(result, ModelResult::Text("Hace 22°C en Lima.".to_string()));
    }

    #[test]
    fn test_classify_function_call_wins_over_text() {
        let result = parse(json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "Let me check."},
                    {"functionCall": {"name": "google_search", "args": {"query": "clima en Lima"}}}
                ]}
            }]
        }));
        assert_eq!(
            result,
            ModelResult::ToolCall {
                name: "google_search".to_string(),
                argument: "clima en Lima".to_string()
            }
        );
    }

    #[test]
    fn test_classify_filtered_and_blocked_prompts() {
        let safety = parse(json!({
            "candidates": [{"finishReason": "SAFETY"}]
        }));
        assert_eq!(safety, ModelResult::Filtered(FilterReason::new("SAFETY")));

        let blocked = parse(json!({
            "promptFeedback": {"blockReason": "PROHIBITED_CONTENT"}
        }));
        assert_eq!(
            blocked,
            ModelResult::Filtered(FilterReason::new("PROHIBITED_CONTENT"))
        );
    }

    #[test]
    fn test_classify_empty_when_no_content_or_known_reason() {
        assert_eq!(parse(json!({})), ModelResult::Empty);
        assert_eq!(
            parse(json!({"candidates": [{"content": {"parts": [{"text": "  "}]}, "finishReason": "MAX_TOKENS"}]})),
            ModelResult::Empty
        );
    }

    #[test]
    fn test_request_includes_tool_exchange_round_trip() {
        let mut req = request("¿Qué clima hace en Lima?");
        req.tools = vec![ToolSpec {
            name: "google_search".to_string(),
            description: "search".to_string(),
            parameters: json!({"type": "object"}),
        }];
        req.tool_exchanges = vec![ToolExchange {
            name: "google_search".to_string(),
            argument: "clima en Lima".to_string(),
            result: "22°C".to_string(),
        }];

        let body = serde_json::to_value(GenerateContentRequest::from_model_request(&req)).unwrap();
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 5);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[3]["parts"][0]["functionCall"]["args"]["query"], "clima en Lima");
        assert_eq!(
            contents[4]["parts"][0]["functionResponse"]["response"]["result"],
            "22°C"
        );
        assert_eq!(body["tools"][0]["functionDeclarations"][0]["name"], "google_search");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be brief.");
    }

    #[test]
    fn test_request_history_starts_with_user_turn() {
        let mut req = request("¿Y mañana?");
        req.history = vec![
            ConversationTurn::assistant("Hace 22°C en Lima."),
            ConversationTurn::user("¿Y en Cusco?"),
            ConversationTurn::assistant("Hace 15°C."),
        ];

        let body = serde_json::to_value(GenerateContentRequest::from_model_request(&req)).unwrap();
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[0]["parts"][0]["text"], "¿Y en Cusco?");
    }

    #[test]
    fn test_request_omits_tools_when_none_offered() {
        let body =
            serde_json::to_value(GenerateContentRequest::from_model_request(&request("hi")))
                .unwrap();
        assert!(body.get("tools").is_none());
    }

    #[tokio::test]
    async fn test_complete_returns_text_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(json!({"generationConfig": {"maxOutputTokens": 256}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "¡Hola! ¿En qué puedo ayudarte?"}]}, "finishReason": "STOP"}],
                "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 8, "totalTokenCount": 20}
            })))
            .mount(&server)
            .await;

        let completion = client_for(&server).complete(&request("Hola")).await.unwrap();
        assert_eq!(
            completion.result,
            ModelResult::Text("¡Hola! ¿En qué puedo ayudarte?".to_string())
        );
        assert_eq!(completion.usage, Some(TokenUsage::new(12, 8)));
    }

    #[tokio::test]
    async fn test_auth_failure_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .respond_with(ResponseTemplate::new(403).set_body_string("API key not valid"))
            .mount(&server)
            .await;

        let err = client_for(&server).complete(&request("Hola")).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Auth);
        assert_eq!(err.status_code, Some(403));
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).complete(&request("Hola")).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .respond_with(
                ResponseTemplate::new(503)
                    .insert_header("retry-after", "0")
                    .set_body_string("overloaded"),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "ok"}]}}]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).with_retry_config(RetryConfig::default());
        let completion = client.complete(&request("Hola")).await.unwrap();
        assert_eq!(completion.result, ModelResult::Text("ok".to_string()));
    }
}
