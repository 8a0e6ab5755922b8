//! Google search through the Serper API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{Tool, ToolError};

/// Name the model uses to call [`GoogleSearch`].
pub const GOOGLE_SEARCH: &str = "google_search";

const SERPER_SEARCH_URL: &str = "https://google.serper.dev/search";
const MAX_ORGANIC_RESULTS: usize = 10;
const NO_RESULTS: &str = "No good Google Search Result was found";

/// Search Google for current information.
pub struct GoogleSearch {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl GoogleSearch {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            endpoint: SERPER_SEARCH_URL.to_string(),
        }
    }

    /// Point the tool at a different endpoint (used by tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Serper API request body.
#[derive(Debug, Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
}

/// Serper API response.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SerperResponse {
    #[serde(default)]
    answer_box: Option<AnswerBox>,
    #[serde(default)]
    knowledge_graph: Option<KnowledgeGraph>,
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnswerBox {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    snippet_highlighted: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct KnowledgeGraph {
    #[serde(default)]
    title: Option<String>,
    #[serde(default, rename = "type")]
    entity_type: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    attributes: Option<serde_json::Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    attributes: Option<serde_json::Map<String, Value>>,
}

#[async_trait]
impl Tool for GoogleSearch {
    fn name(&self) -> &str {
        GOOGLE_SEARCH
    }

    fn description(&self) -> &str {
        "Busca informacion actual en Google. Util para responder preguntas sobre eventos recientes, noticias, datos actualizados o informacion que no conoces."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, argument: &str) -> Result<String, ToolError> {
        let query = argument.trim();
        if query.is_empty() {
            return Err(ToolError::Unavailable("Missing search query".to_string()));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&SerperRequest { q: query })
            .send()
            .await
            .map_err(|e| ToolError::Unavailable(format!("Serper request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ToolError::Unavailable(format!(
                "Serper API error ({}): {}",
                status, error_text
            )));
        }

        let parsed: SerperResponse = response
            .json()
            .await
            .map_err(|e| ToolError::Unavailable(format!("Invalid Serper response: {}", e)))?;

        tracing::debug!(query = %query, organic = parsed.organic.len(), "Serper search done");
        Ok(format_results(&parsed))
    }
}

/// Flatten a search response into a single text snippet for the model.
///
/// A direct answer short-circuits everything else; otherwise the knowledge
/// graph and organic snippets are joined with spaces.
fn format_results(response: &SerperResponse) -> String {
    if let Some(answer_box) = &response.answer_box {
        if let Some(answer) = answer_box.answer.as_deref().filter(|a| !a.is_empty()) {
            return answer.to_string();
        }
        if let Some(snippet) = answer_box.snippet.as_deref().filter(|s| !s.is_empty()) {
            return snippet.replace('\n', " ");
        }
        if let Some(highlighted) = answer_box
            .snippet_highlighted
            .as_ref()
            .filter(|h| !h.is_empty())
        {
            return highlighted.join(", ");
        }
    }

    let mut snippets = Vec::new();

    if let Some(kg) = &response.knowledge_graph {
        let title = kg.title.as_deref().unwrap_or_default();
        if let Some(entity_type) = &kg.entity_type {
            snippets.push(format!("{}: {}.", title, entity_type));
        }
        if let Some(description) = &kg.description {
            snippets.push(description.clone());
        }
        for (attribute, value) in kg.attributes.iter().flatten() {
            snippets.push(format!("{} {}: {}.", title, attribute, display_value(value)));
        }
    }

    for result in response.organic.iter().take(MAX_ORGANIC_RESULTS) {
        if let Some(snippet) = &result.snippet {
            snippets.push(snippet.clone());
        }
        for (attribute, value) in result.attributes.iter().flatten() {
            snippets.push(format!("{}: {}.", attribute, display_value(value)));
        }
    }

    if snippets.is_empty() {
        NO_RESULTS.to_string()
    } else {
        snippets.join(" ")
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
