//! System prompt resolution.

use crate::storage::PromptStore;

/// Used when storage has no active system prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str = "Eres un asistente virtual inteligente y servicial.
Tu objetivo es ayudar a los usuarios de la mejor manera posible.
Cuando necesites informacion actualizada o datos que no conoces, usa la herramienta de busqueda de Google.
Se conciso, amigable y profesional en tus respuestas.";

const DEFAULT_PROMPT_DESCRIPTION: &str = "Prompt del sistema principal para el chatbot";

/// Resolve the active prompt named `name`, falling back to the default.
///
/// Never fails: lookup and write-back errors are logged and the default is
/// returned. When the default is used it is written back so operators can
/// edit it in storage.
pub async fn resolve_active(store: &dyn PromptStore, name: &str) -> String {
    match store.get_active_prompt(name).await {
        Ok(Some(prompt)) if !prompt.content.trim().is_empty() => {
            tracing::info!(prompt = %name, "System prompt loaded from storage");
            return prompt.content;
        }
        Ok(_) => tracing::warn!(prompt = %name, "No active prompt in storage, using default"),
        Err(e) => tracing::warn!(prompt = %name, "Failed to load prompt, using default: {}", e),
    }

    match store
        .upsert_prompt(
            name,
            DEFAULT_SYSTEM_PROMPT,
            Some(DEFAULT_PROMPT_DESCRIPTION),
            true,
        )
        .await
    {
        Ok(_) => tracing::info!(prompt = %name, "Default prompt saved to storage"),
        Err(e) => tracing::warn!(prompt = %name, "Could not save default prompt: {}", e),
    }

    DEFAULT_SYSTEM_PROMPT.to_string()
}
