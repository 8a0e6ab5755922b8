//! Tool system for the agent.
//!
//! Tools are external capabilities the model may request mid-conversation.
//! The only built-in tool is `google_search`, registered when a Serper key is
//! configured. Every invocation is bounded by the configured tool timeout.

mod web;

pub use web::{GoogleSearch, GOOGLE_SEARCH};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::config::AgentConfig;
use crate::llm::ToolSpec;

/// Errors a tool invocation can produce.
///
/// These never reach the end user: the orchestrator feeds the message back to
/// the model as the tool result.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Tool timed out after {0:?}")]
    Timeout(Duration),

    #[error("Tool unavailable: {0}")]
    Unavailable(String),
}

/// Trait for implementing tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// A description of what this tool does.
    fn description(&self) -> &str;

    /// JSON schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the argument the model supplied.
    async fn execute(&self, argument: &str) -> Result<String, ToolError>;
}

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    timeout: Duration,
}

impl ToolRegistry {
    /// Create a registry with the tools enabled by configuration.
    pub fn from_config(config: &AgentConfig) -> Self {
        let mut registry = Self::empty(config.tool_timeout);

        match config.serper_api_key.as_deref() {
            Some(key) if config.has_google_search() => {
                registry.register(Arc::new(GoogleSearch::new(key)));
                tracing::info!("Google search tool enabled");
            }
            _ => tracing::warn!("SERPER_API_KEY not set - Google search disabled"),
        }

        registry
    }

    /// Create an empty registry (no built-in tools).
    pub fn empty(timeout: Duration) -> Self {
        Self {
            tools: HashMap::new(),
            timeout,
        }
    }

    /// Add a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Check if a tool exists by name.
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool descriptors to offer the model, sorted by name.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .values()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Execute a tool by name, bounded by the registry timeout.
    pub async fn execute(&self, name: &str, argument: &str) -> Result<String, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::Unavailable(format!("Unknown tool: {}", name)))?;

        match tokio::time::timeout(self.timeout, tool.execute(argument)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout(self.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the argument back"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"query": {"type": "string"}}})
        }

        async fn execute(&self, argument: &str) -> Result<String, ToolError> {
            Ok(format!("echo: {}", argument))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "Never finishes in time"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, _argument: &str) -> Result<String, ToolError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("late".to_string())
        }
    }

    #[tokio::test]
    async fn test_execute_registered_tool() {
        let mut registry = ToolRegistry::empty(Duration::from_secs(5));
        registry.register(Arc::new(EchoTool));

        assert!(registry.has_tool("echo"));
        let result = registry.execute("echo", "hola").await;
        assert_eq!(result, Ok("echo: hola".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_unavailable() {
        let registry = ToolRegistry::empty(Duration::from_secs(5));
        let err = registry.execute("missing", "x").await.unwrap_err();
        assert!(matches!(err, ToolError::Unavailable(msg) if msg.contains("missing")));
    }

    /// The registry timeout applies even when the tool itself never returns.
    #[tokio::test(start_paused = true)]
    async fn test_tool_timeout_is_enforced() {
        let mut registry = ToolRegistry::empty(Duration::from_secs(20));
        registry.register(Arc::new(SlowTool));

        let err = registry.execute("slow", "x").await.unwrap_err();
        assert_eq!(err, ToolError::Timeout(Duration::from_secs(20)));
    }

    #[test]
    fn test_specs_are_sorted_by_name() {
        let mut registry = ToolRegistry::empty(Duration::from_secs(5));
        registry.register(Arc::new(SlowTool));
        registry.register(Arc::new(EchoTool));

        let names: Vec<String> = registry.specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["echo", "slow"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_pending_until_tool_timeout() {
        let mut registry = ToolRegistry::empty(Duration::from_secs(20));
        registry.register(Arc::new(SlowTool));

        let mut call = tokio_test::task::spawn(registry.execute("slow", "x"));
        tokio_test::assert_pending!(call.poll());

        tokio::time::advance(Duration::from_secs(19)).await;
        tokio_test::assert_pending!(call.poll());

        tokio::time::advance(Duration::from_secs(2)).await;
        let result = tokio_test::assert_ready!(call.poll());
        assert_eq!(result, Err(ToolError::Timeout(Duration::from_secs(20))));
    }

    #[test]
    fn test_google_search_only_with_key() {
        let mut config = AgentConfig::default();
        assert!(ToolRegistry::from_config(&config).is_empty());

        config.serper_api_key = Some("serper-key".to_string());
        let registry = ToolRegistry::from_config(&config);
        assert!(registry.has_tool("google_search"));
        assert_eq!(registry.specs()[0].name, "google_search");
    }
}
