//! Configuration management for the Evolution bot.
//!
//! Configuration is read from environment variables (a `.env` file in the
//! working directory is loaded first by the binary):
//! - `GOOGLE_API_KEY` - Required. Gemini API key.
//! - `GEMINI_MODEL` - Optional. Defaults to `gemini-flash-lite-latest`.
//! - `GEMINI_API_BASE` - Optional. Defaults to the public `v1beta` endpoint.
//! - `GEMINI_TEMPERATURE` - Optional. Sampling temperature in `[0, 1]`. Defaults to `0.7`.
//! - `GEMINI_MAX_OUTPUT_TOKENS` - Optional. Defaults to `1024`.
//! - `MODEL_TIMEOUT_SECS` - Optional. Per-request model timeout. Defaults to `30`.
//! - `SERPER_API_KEY` - Optional. Enables the `google_search` tool.
//! - `TOOL_TIMEOUT_SECS` - Optional. Per-invocation tool timeout. Defaults to `20`.
//! - `MEMORY_WINDOW_SIZE` - Optional. Turns (not user/assistant pairs) kept per conversation. Defaults to `10`.
//! - `AGENT_MAX_ITERATIONS` - Optional. Model calls allowed per reply. Defaults to `3`.
//! - `CONVERSATION_IDLE_TTL_SECS` - Optional. Idle time before a conversation is evicted. Defaults to `1800`.
//! - `MAX_CONVERSATIONS` - Optional. Conversations kept in memory. Defaults to `1000`.
//! - `PROCESSING_TIMEOUT_SECS` - Optional. Deadline for one webhook message. Defaults to `120`.
//! - `SUPABASE_URL`, `SUPABASE_KEY`, `SUPABASE_SERVICE_ROLE_KEY` - Optional. Persistence.
//! - `EVOLUTION_API_URL`, `EVOLUTION_API_KEY` - Optional. Outbound WhatsApp delivery.
//! - `EVOLUTION_INSTANCE` - Optional. Defaults to `ia-whatsapp`.
//! - `APP_NAME` - Optional. Defaults to `Evolution WhatsApp AI Bot`.
//! - `HOST` - Optional. Server host. Defaults to `0.0.0.0`.
//! - `PORT` - Optional. Server port. Defaults to `8000`.

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Gemini model settings.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Google AI API key
    pub api_key: String,

    /// Model identifier, e.g. `gemini-flash-lite-latest`
    pub model: String,

    /// Base URL of the Generative Language API
    pub api_base: String,

    /// Sampling temperature in `[0, 1]`
    pub temperature: f32,

    /// Maximum tokens the model may generate per call
    pub max_output_tokens: u32,

    /// Upper bound for a single model request
    pub request_timeout: Duration,
}

impl ModelConfig {
    /// Model settings with defaults for everything but the key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "gemini-flash-lite-latest".to_string(),
            api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            temperature: 0.7,
            max_output_tokens: 1024,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Agent loop, memory and tool settings.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Serper key; `None` disables web search
    pub serper_api_key: Option<String>,

    /// Upper bound for one tool invocation
    pub tool_timeout: Duration,

    /// Turns kept in each conversation's memory window
    pub memory_window_size: usize,

    /// Model calls allowed per reply before giving up
    pub max_iterations: usize,

    /// Idle time after which a conversation's agent is dropped
    pub conversation_idle_ttl: Duration,

    /// Conversations kept in memory at once
    pub max_conversations: usize,

    /// Deadline for processing one inbound message end to end
    pub processing_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            serper_api_key: None,
            tool_timeout: Duration::from_secs(20),
            memory_window_size: 10,
            max_iterations: 3,
            conversation_idle_ttl: Duration::from_secs(30 * 60),
            max_conversations: 1000,
            processing_timeout: Duration::from_secs(120),
        }
    }
}

impl AgentConfig {
    /// Check if the web search tool can be registered.
    pub fn has_google_search(&self) -> bool {
        self.serper_api_key
            .as_deref()
            .map_or(false, |k| !k.trim().is_empty())
    }
}

/// Supabase storage configuration.
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    /// Supabase project URL
    pub supabase_url: Option<String>,

    /// Anon/public key
    pub supabase_key: Option<String>,

    /// Service role key (preferred when present)
    pub supabase_service_role_key: Option<String>,
}

impl StorageConfig {
    /// The key used for PostgREST calls: the service role key if set, else the regular key.
    pub fn effective_key(&self) -> Option<&str> {
        self.supabase_service_role_key
            .as_deref()
            .or(self.supabase_key.as_deref())
            .filter(|k| !k.trim().is_empty())
    }

    /// Check if Supabase is configured.
    pub fn is_enabled(&self) -> bool {
        self.supabase_url.is_some() && self.effective_key().is_some()
    }
}

/// Evolution API (WhatsApp gateway) configuration.
#[derive(Debug, Clone)]
pub struct EvolutionConfig {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub instance: String,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_key: None,
            instance: "ia-whatsapp".to_string(),
        }
    }
}

impl EvolutionConfig {
    /// Check if outbound delivery is configured.
    pub fn is_enabled(&self) -> bool {
        matches!((&self.api_url, &self.api_key), (Some(u), Some(k)) if !u.is_empty() && !k.is_empty())
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Display name used by the root and health endpoints
    pub app_name: String,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    pub model: ModelConfig,
    pub agent: AgentConfig,
    pub storage: StorageConfig,
    pub evolution: EvolutionConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `GOOGLE_API_KEY` is not set and
    /// `ConfigError::InvalidValue` for unparsable or out-of-range values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = env_opt("GOOGLE_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("GOOGLE_API_KEY".to_string()))?;

        let mut model = ModelConfig::new(api_key);
        if let Some(name) = env_opt("GEMINI_MODEL") {
            model.model = name;
        }
        if let Some(base) = env_opt("GEMINI_API_BASE") {
            model.api_base = validate_url("GEMINI_API_BASE", &base)?;
        }
        model.temperature = env_parse("GEMINI_TEMPERATURE", model.temperature)?;
        if !(0.0..=1.0).contains(&model.temperature) {
            return Err(ConfigError::InvalidValue(
                "GEMINI_TEMPERATURE".to_string(),
                format!("{} is outside [0, 1]", model.temperature),
            ));
        }
        model.max_output_tokens = env_parse("GEMINI_MAX_OUTPUT_TOKENS", model.max_output_tokens)?;
        if model.max_output_tokens == 0 {
            return Err(ConfigError::InvalidValue(
                "GEMINI_MAX_OUTPUT_TOKENS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        model.request_timeout = env_secs("MODEL_TIMEOUT_SECS", model.request_timeout)?;

        let defaults = AgentConfig::default();
        let agent = AgentConfig {
            serper_api_key: env_opt("SERPER_API_KEY"),
            tool_timeout: env_secs("TOOL_TIMEOUT_SECS", defaults.tool_timeout)?,
            memory_window_size: env_parse("MEMORY_WINDOW_SIZE", defaults.memory_window_size)?,
            max_iterations: env_parse("AGENT_MAX_ITERATIONS", defaults.max_iterations)?.max(1),
            conversation_idle_ttl: env_secs(
                "CONVERSATION_IDLE_TTL_SECS",
                defaults.conversation_idle_ttl,
            )?,
            max_conversations: env_parse("MAX_CONVERSATIONS", defaults.max_conversations)?.max(1),
            processing_timeout: env_secs("PROCESSING_TIMEOUT_SECS", defaults.processing_timeout)?,
        };

        let storage = StorageConfig {
            supabase_url: env_opt("SUPABASE_URL")
                .map(|u| validate_url("SUPABASE_URL", &u))
                .transpose()?,
            supabase_key: env_opt("SUPABASE_KEY"),
            supabase_service_role_key: env_opt("SUPABASE_SERVICE_ROLE_KEY"),
        };

        let evolution = EvolutionConfig {
            api_url: env_opt("EVOLUTION_API_URL")
                .map(|u| validate_url("EVOLUTION_API_URL", &u))
                .transpose()?,
            api_key: env_opt("EVOLUTION_API_KEY"),
            instance: env_opt("EVOLUTION_INSTANCE").unwrap_or_else(|| "ia-whatsapp".to_string()),
        };

        Ok(Self {
            app_name: env_opt("APP_NAME").unwrap_or_else(|| "Evolution WhatsApp AI Bot".to_string()),
            host: env_opt("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env_parse("PORT", 8000)?,
            model,
            agent,
            storage,
            evolution,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            app_name: "Evolution WhatsApp AI Bot".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8000,
            model: ModelConfig::new(api_key),
            agent: AgentConfig::default(),
            storage: StorageConfig::default(),
            evolution: EvolutionConfig::default(),
        }
    }
}

/// Read a variable, treating empty values as unset.
fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e))),
        None => Ok(default),
    }
}

fn env_secs(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    let secs = env_parse(name, default.as_secs())?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue(
            name.to_string(),
            "must be at least 1 second".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}

fn validate_url(name: &str, raw: &str) -> Result<String, ConfigError> {
    url::Url::parse(raw)
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e)))?;
    Ok(raw.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_role_key_preferred() {
        let storage = StorageConfig {
            supabase_url: Some("https://x.supabase.co".to_string()),
            supabase_key: Some("anon".to_string()),
            supabase_service_role_key: Some("service".to_string()),
        };
        assert_eq!(storage.effective_key(), Some("service"));
        assert!(storage.is_enabled());

        let anon_only = StorageConfig {
            supabase_service_role_key: None,
            ..storage
        };
        assert_eq!(anon_only.effective_key(), Some("anon"));
    }

    #[test]
    fn test_storage_disabled_without_url() {
        let storage = StorageConfig {
            supabase_url: None,
            supabase_key: Some("anon".to_string()),
            supabase_service_role_key: None,
        };
        assert!(!storage.is_enabled());
    }

    #[test]
    fn test_google_search_requires_non_blank_key() {
        let mut agent = AgentConfig::default();
        assert!(!agent.has_google_search());
        agent.serper_api_key = Some("   ".to_string());
        assert!(!agent.has_google_search());
        agent.serper_api_key = Some("key".to_string());
        assert!(agent.has_google_search());
    }

    #[test]
    fn test_validate_url_trims_trailing_slash() {
        assert_eq!(
            validate_url("X", "https://evo.example.com/").unwrap(),
            "https://evo.example.com"
        );
        assert!(validate_url("X", "not a url").is_err());
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::new("key");
        assert_eq!(config.model.model, "gemini-flash-lite-latest");
        assert_eq!(config.agent.memory_window_size, 10);
        assert_eq!(config.agent.max_iterations, 3);
        assert_eq!(config.evolution.instance, "ia-whatsapp");
        assert!(!config.evolution.is_enabled());
    }
}
