//! Mock collaborators shared by agent, processor and API tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::{ModelClient, ModelCompletion, ModelRequest, ModelResult, ProviderError};
use crate::storage::{PromptRecord, PromptStore, StorageError};
use crate::tools::{Tool, ToolError};

pub fn completion(result: ModelResult) -> ModelCompletion {
    ModelCompletion::new(result)
}

type Scripted = Result<ModelCompletion, ProviderError>;

/// Model that replays a fixed script, then repeats the fallback (if any).
pub struct ScriptedModel {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Option<Scripted>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(response: Scripted) -> Self {
        Self {
            fallback: Some(response),
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelCompletion, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        match next.or_else(|| self.fallback.clone()) {
            Some(response) => response,
            None => Err(ProviderError::unknown("script exhausted")),
        }
    }
}

/// Model that never responds.
pub struct HangingModel;

#[async_trait]
impl ModelClient for HangingModel {
    fn model_name(&self) -> &str {
        "hanging-model"
    }

    async fn complete(&self, _request: &ModelRequest) -> Result<ModelCompletion, ProviderError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(ProviderError::unknown("unreachable"))
    }
}

/// Tool returning a fixed result and counting invocations.
pub struct CountingTool {
    name: String,
    output: String,
    invocations: AtomicUsize,
    last_argument: Mutex<Option<String>>,
}

impl CountingTool {
    pub fn new(name: &str, output: &str) -> Self {
        Self {
            name: name.to_string(),
            output: output.to_string(),
            invocations: AtomicUsize::new(0),
            last_argument: Mutex::new(None),
        }
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn last_argument(&self) -> Option<String> {
        self.last_argument.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Test tool"
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"query": {"type": "string"}}})
    }

    async fn execute(&self, argument: &str) -> Result<String, ToolError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        *self.last_argument.lock().unwrap() = Some(argument.to_string());
        Ok(self.output.clone())
    }
}

/// Prompt store whose every operation fails.
pub struct FailingPromptStore;

#[async_trait]
impl PromptStore for FailingPromptStore {
    async fn get_active_prompt(&self, _name: &str) -> Result<Option<PromptRecord>, StorageError> {
        Err(StorageError::NoRow("prompts"))
    }

    async fn upsert_prompt(
        &self,
        _name: &str,
        _content: &str,
        _description: Option<&str>,
        _is_active: bool,
    ) -> Result<PromptRecord, StorageError> {
        Err(StorageError::Http {
            operation: "create prompt",
            status: 503,
            body: "unavailable".to_string(),
        })
    }

    async fn list_prompts(&self, _limit: usize) -> Result<Vec<PromptRecord>, StorageError> {
        Err(StorageError::NoRow("prompts"))
    }
}
