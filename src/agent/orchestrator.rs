//! Per-conversation agent: model calls, the tool loop and the memory window.
//!
//! # Algorithm
//! 1. Snapshot the memory window
//! 2. Call the model with the system prompt, history, input and offered tools
//! 3. If the model requests a tool: execute it, record the exchange, reissue
//! 4. Repeat until the model answers or `max_iterations` model calls are spent
//!
//! Every failure ends in a fixed user-safe reply. Only answered exchanges are
//! committed to memory, and only after the final model call returned.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::config::Config;
use crate::llm::{
    ConversationTurn, FilterCategory, FilterReason, ModelClient, ModelRequest, ModelResult,
    ProviderError, RetryConfig, TokenUsage, ToolExchange,
};
use crate::memory::MemoryWindow;
use crate::storage::PromptStore;
use crate::tools::ToolRegistry;

use super::prompt;

pub const GENERIC_APOLOGY: &str = "Lo siento, hubo un error procesando tu mensaje.";
pub const SAFETY_FILTER_REPLY: &str = "El contenido fue filtrado por políticas de seguridad.";
pub const RECITATION_FILTER_REPLY: &str = "El contenido fue filtrado por derechos de autor.";
pub const OTHER_FILTER_REPLY: &str = "El contenido fue filtrado por otras razones.";
pub const MAX_ITERATIONS_REPLY: &str =
    "Lo siento, no pude completar tu solicitud. Por favor intenta de nuevo.";
pub const EMPTY_INPUT_REPLY: &str = "¿En qué puedo ayudarte?";

/// Tunables for one orchestrator.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Model calls allowed per reply
    pub max_iterations: usize,
    pub memory_window_size: usize,
    /// Upper bound for one model call, client retries included
    pub model_call_timeout: Duration,
}

impl AgentSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            temperature: config.model.temperature,
            max_output_tokens: config.model.max_output_tokens,
            max_iterations: config.agent.max_iterations.max(1),
            memory_window_size: config.agent.memory_window_size,
            model_call_timeout: config.model.request_timeout
                + RetryConfig::default().max_retry_duration,
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from_config(&Config::new(String::new()))
    }
}

/// Per-request state, traced at debug level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    AwaitingModel,
    Responding,
    InvokingTool,
    Degraded,
}

/// Why a fixed reply was returned instead of a model answer.
#[derive(Debug, Clone)]
pub enum DegradeReason {
    Filtered(FilterReason),
    /// Two empty model responses in a row
    EmptyResponse,
    Provider(ProviderError),
    MaxIterations,
}

impl DegradeReason {
    /// The fixed text shown to the end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            DegradeReason::Filtered(reason) => match reason.category() {
                FilterCategory::Safety => SAFETY_FILTER_REPLY,
                FilterCategory::Recitation => RECITATION_FILTER_REPLY,
                FilterCategory::Other => OTHER_FILTER_REPLY,
            },
            DegradeReason::EmptyResponse | DegradeReason::Provider(_) => GENERIC_APOLOGY,
            DegradeReason::MaxIterations => MAX_ITERATIONS_REPLY,
        }
    }
}

impl fmt::Display for DegradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradeReason::Filtered(reason) => write!(f, "Content filtered: {}", reason.code),
            DegradeReason::EmptyResponse => write!(f, "Model returned an empty response"),
            DegradeReason::Provider(e) => write!(f, "{}", e),
            DegradeReason::MaxIterations => write!(f, "Max iterations reached"),
        }
    }
}

/// How a reply was produced.
#[derive(Debug, Clone)]
pub enum ReplyOutcome {
    Answered,
    /// Blank input; answered without calling the model
    EmptyInput,
    Degraded(DegradeReason),
}

/// Result of [`AgentOrchestrator::generate_detailed`].
#[derive(Debug, Clone)]
pub struct Reply {
    /// Always non-empty
    pub text: String,
    pub outcome: ReplyOutcome,
    /// Summed over all model calls for this reply
    pub usage: TokenUsage,
    pub model_calls: usize,
    pub tool_invocations: usize,
}

impl Reply {
    pub fn degrade_reason(&self) -> Option<&DegradeReason> {
        match &self.outcome {
            ReplyOutcome::Degraded(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degrade_reason().is_some()
    }
}

/// Counters accumulated while one reply is generated.
#[derive(Default)]
struct RunStats {
    usage: TokenUsage,
    model_calls: usize,
    tool_invocations: usize,
}

impl RunStats {
    fn finish(self, text: impl Into<String>, outcome: ReplyOutcome) -> Reply {
        Reply {
            text: text.into(),
            outcome,
            usage: self.usage,
            model_calls: self.model_calls,
            tool_invocations: self.tool_invocations,
        }
    }
}

/// The agent for one conversation.
pub struct AgentOrchestrator {
    model: Arc<dyn ModelClient>,
    tools: Arc<ToolRegistry>,
    system_prompt: String,
    memory: Mutex<MemoryWindow>,
    settings: AgentSettings,
}

impl AgentOrchestrator {
    pub fn new(
        model: Arc<dyn ModelClient>,
        tools: Arc<ToolRegistry>,
        system_prompt: impl Into<String>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            memory: Mutex::new(MemoryWindow::new(settings.memory_window_size)),
            model,
            tools,
            system_prompt: system_prompt.into(),
            settings,
        }
    }

    /// Construct with the system prompt resolved from storage.
    ///
    /// Never fails: storage problems fall back to the default prompt.
    pub async fn with_resolved_prompt(
        model: Arc<dyn ModelClient>,
        tools: Arc<ToolRegistry>,
        prompts: &dyn PromptStore,
        prompt_name: &str,
        settings: AgentSettings,
    ) -> Self {
        let system_prompt = prompt::resolve_active(prompts, prompt_name).await;
        Self::new(model, tools, system_prompt, settings)
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Generate a reply. Always returns a non-empty string.
    pub async fn generate(&self, user_input: &str) -> String {
        self.generate_detailed(user_input).await.text
    }

    /// Generate a reply along with how it was produced.
    pub async fn generate_detailed(&self, user_input: &str) -> Reply {
        let mut stats = RunStats::default();
        if user_input.trim().is_empty() {
            return stats.finish(EMPTY_INPUT_REPLY, ReplyOutcome::EmptyInput);
        }

        let history = self.memory.lock().await.snapshot();
        let mut offered = self.tools.specs();
        let mut exchanges: Vec<ToolExchange> = Vec::new();
        let mut state = AgentState::Idle;
        let mut retried_empty = false;
        let mut exhausted = DegradeReason::MaxIterations;

        while stats.model_calls < self.settings.max_iterations {
            transition(&mut state, AgentState::AwaitingModel);
            tracing::debug!(
                "Agent iteration {} (history={}, tool_exchanges={})",
                stats.model_calls + 1,
                history.len(),
                exchanges.len()
            );

            let request = ModelRequest {
                system_prompt: self.system_prompt.clone(),
                history: history.clone(),
                user_input: user_input.to_string(),
                tool_exchanges: exchanges.clone(),
                tools: offered.clone(),
                temperature: self.settings.temperature,
                max_output_tokens: self.settings.max_output_tokens,
            };

            stats.model_calls += 1;
            let completion = match tokio::time::timeout(
                self.settings.model_call_timeout,
                self.model.complete(&request),
            )
            .await
            {
                Ok(Ok(completion)) => completion,
                Ok(Err(e)) => {
                    tracing::error!("Model call failed: {}", e);
                    return self.degrade(&mut state, stats, DegradeReason::Provider(e));
                }
                Err(_) => {
                    let e = ProviderError::timeout(format!(
                        "No response within {:?}",
                        self.settings.model_call_timeout
                    ));
                    tracing::error!("Model call failed: {}", e);
                    return self.degrade(&mut state, stats, DegradeReason::Provider(e));
                }
            };

            if let Some(usage) = completion.usage {
                stats.usage.add(&usage);
            }

            match completion.result {
                ModelResult::Text(reply) => {
                    transition(&mut state, AgentState::Responding);
                    {
                        let mut memory = self.memory.lock().await;
                        memory.append(ConversationTurn::user(user_input));
                        memory.append(ConversationTurn::assistant(reply.clone()));
                    }
                    transition(&mut state, AgentState::Idle);
                    return stats.finish(reply, ReplyOutcome::Answered);
                }
                ModelResult::ToolCall { name, argument } => {
                    transition(&mut state, AgentState::InvokingTool);
                    exhausted = DegradeReason::MaxIterations;

                    let result = if offered.iter().any(|t| t.name == name) {
                        stats.tool_invocations += 1;
                        tracing::debug!(tool = %name, argument = %argument, "Invoking tool");
                        match self.tools.execute(&name, &argument).await {
                            Ok(output) => output,
                            Err(e) => {
                                tracing::warn!(tool = %name, "Tool failed: {}", e);
                                format!("Error: {}", e)
                            }
                        }
                    } else {
                        tracing::warn!(tool = %name, "Model requested a tool that was not offered");
                        offered.retain(|t| t.name != name);
                        format!("Error: Tool '{}' is not available", name)
                    };

                    exchanges.push(ToolExchange {
                        name,
                        argument,
                        result,
                    });
                }
                ModelResult::Filtered(reason) => {
                    tracing::warn!(code = %reason.code, "Model response filtered");
                    return self.degrade(&mut state, stats, DegradeReason::Filtered(reason));
                }
                ModelResult::Empty => {
                    if retried_empty {
                        tracing::error!("Model returned an empty response twice");
                        return self.degrade(&mut state, stats, DegradeReason::EmptyResponse);
                    }
                    tracing::warn!("Model returned an empty response, retrying once");
                    retried_empty = true;
                    exhausted = DegradeReason::EmptyResponse;
                }
            }
        }

        if matches!(exhausted, DegradeReason::MaxIterations) {
            tracing::warn!(
                "Max iterations ({}) reached without an answer",
                self.settings.max_iterations
            );
        }
        self.degrade(&mut state, stats, exhausted)
    }

    fn degrade(&self, state: &mut AgentState, stats: RunStats, reason: DegradeReason) -> Reply {
        transition(state, AgentState::Degraded);
        let text = reason.user_message();
        transition(state, AgentState::Idle);
        stats.finish(text, ReplyOutcome::Degraded(reason))
    }

    /// Empty the memory window.
    pub async fn clear_memory(&self) {
        self.memory.lock().await.clear();
    }

    /// Copy of the memory window, oldest first.
    pub async fn history(&self) -> Vec<ConversationTurn> {
        self.memory.lock().await.snapshot()
    }
}

fn transition(state: &mut AgentState, next: AgentState) {
    tracing::debug!(from = ?*state, to = ?next, "Agent state");
    *state = next;
}
