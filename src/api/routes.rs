//! HTTP route handlers.

use std::sync::Arc;

use axum::{extract::State, response::Json, routing::get, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agent::{AgentFactory, AgentSettings, ConversationRegistry, CLEANUP_INTERVAL};
use crate::config::Config;
use crate::llm::{GeminiClient, ModelClient};
use crate::processor::MessageProcessor;
use crate::storage::{init_storage, Stores};
use crate::tools::{ToolRegistry, GOOGLE_SEARCH};
use crate::whatsapp::{EvolutionClient, MessageSender};

use super::analytics as analytics_api;
use super::conversations as conversations_api;
use super::messages as messages_api;
use super::prompts as prompts_api;
use super::types::*;
use super::webhooks::{self, WebhookStats, WEBHOOK_ENDPOINTS};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// Generates, delivers and logs replies
    pub processor: Arc<MessageProcessor>,
    pub stores: Stores,
    /// Outbound client, also used for the instance health check
    pub evolution: Arc<EvolutionClient>,
    pub webhook_stats: WebhookStats,
    /// Whether `google_search` is registered
    pub google_search: bool,
}

impl AppState {
    /// Wire model, tools, storage and delivery from configuration.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let model: Arc<dyn ModelClient> = Arc::new(GeminiClient::from_config(&config.model)?);
        let tools = Arc::new(ToolRegistry::from_config(&config.agent));
        let google_search = tools.has_tool(GOOGLE_SEARCH);
        let stores = init_storage(&config.storage);

        let factory = AgentFactory::new(
            model,
            tools,
            Arc::clone(&stores.prompts),
            AgentSettings::from_config(&config),
        );
        let registry = Arc::new(ConversationRegistry::new(
            factory,
            config.agent.conversation_idle_ttl,
            config.agent.max_conversations,
        ));

        let evolution = Arc::new(EvolutionClient::from_config(&config.evolution));
        if !evolution.is_configured() {
            tracing::warn!("Evolution API not configured - replies will not be delivered");
        }
        let sender: Arc<dyn MessageSender> = evolution.clone();
        let processor = Arc::new(MessageProcessor::new(
            registry,
            Arc::clone(&stores.chat_logs),
            sender,
            config.agent.processing_timeout,
        ));

        Ok(Self {
            config,
            processor,
            stores,
            evolution,
            webhook_stats: WebhookStats::new(),
            google_search,
        })
    }
}

/// Build the application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .nest("/messages", messages_api::routes())
        .nest("/prompts", prompts_api::routes())
        .nest("/conversations", conversations_api::routes())
        .nest("/analytics", analytics_api::routes());

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        // Evolution posts to fixed paths, so webhooks carry no prefix
        .merge(webhooks::routes())
        .nest("/api/v1", api_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let state = Arc::new(AppState::from_config(config)?);
    let config = &state.config;

    tracing::info!(
        model = %config.model.model,
        google_search = state.google_search,
        persistent_storage = state.stores.chat_logs.is_persistent(),
        "{} v{} starting",
        config.app_name,
        env!("CARGO_PKG_VERSION")
    );

    match state.stores.prompts.list_prompts(1).await {
        Ok(_) => tracing::info!("Storage reachable"),
        Err(e) => tracing::warn!("Storage check failed: {}", e),
    }

    let shutdown = CancellationToken::new();
    let cleanup = state
        .processor
        .registry()
        .spawn_cleanup(CLEANUP_INTERVAL, shutdown.clone());

    let app = build_router(Arc::clone(&state));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    // Setup graceful shutdown on SIGTERM/SIGINT
    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signal_token.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(e) = cleanup.await {
        tracing::warn!("Conversation cleanup task failed: {}", e);
    }
    tracing::info!("{} stopped", state.config.app_name);

    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

async fn root(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "app": state.config.app_name,
        "version": env!("CARGO_PKG_VERSION"),
        "status": "online",
        "webhook_endpoints": WEBHOOK_ENDPOINTS,
    }))
}

/// Health check.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let evolution_state = if state.evolution.is_configured() {
        let status = state.evolution.instance_status().await;
        if !status.success {
            tracing::warn!("Evolution instance status unavailable: {:?}", status.error);
        }
        status
            .body
            .as_ref()
            .and_then(|b| b.pointer("/instance/state"))
            .and_then(Value::as_str)
            .map(str::to_string)
    } else {
        None
    };

    Json(HealthResponse {
        status: "healthy".to_string(),
        app_name: state.config.app_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        model: state.config.model.model.clone(),
        google_search: state.google_search,
        persistent_storage: state.stores.chat_logs.is_persistent(),
        active_conversations: state.processor.registry().len().await,
        evolution: EvolutionHealth {
            configured: state.evolution.is_configured(),
            instance: state.evolution.instance().to_string(),
            state: evolution_state,
        },
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::agent::test_support::{completion, ScriptedModel};
    use crate::llm::ModelResult;
    use crate::storage::InMemoryStore;
    use crate::whatsapp::SendOutcome;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Records deliveries and always succeeds.
    #[derive(Default)]
    pub struct RecordingSender {
        pub sent: std::sync::Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl MessageSender for RecordingSender {
        async fn send_text(&self, number: &str, text: &str) -> SendOutcome {
            self.sent
                .lock()
                .unwrap()
                .push((number.to_string(), text.to_string()));
            SendOutcome {
                success: true,
                status_code: Some(201),
                ..SendOutcome::default()
            }
        }
    }

    pub struct TestApp {
        pub state: Arc<AppState>,
        pub store: Arc<InMemoryStore>,
        pub sender: Arc<RecordingSender>,
    }

    impl TestApp {
        pub fn router(&self) -> Router {
            build_router(Arc::clone(&self.state))
        }
    }

    /// App whose model always answers `reply`, backed by in-memory storage.
    pub fn test_app(reply: &str) -> TestApp {
        let config = Config::new("test-key");
        let store = Arc::new(InMemoryStore::new());
        let stores = Stores::from_backend(Arc::clone(&store));
        let model = Arc::new(ScriptedModel::repeating(Ok(completion(ModelResult::Text(
            reply.to_string(),
        )))));
        let factory = AgentFactory::new(
            model,
            Arc::new(ToolRegistry::empty(Duration::from_secs(5))),
            Arc::clone(&stores.prompts),
            AgentSettings::default(),
        );
        let registry = Arc::new(ConversationRegistry::new(
            factory,
            Duration::from_secs(1800),
            100,
        ));
        let sender = Arc::new(RecordingSender::default());
        let processor = Arc::new(MessageProcessor::new(
            registry,
            Arc::clone(&stores.chat_logs),
            sender.clone(),
            Duration::from_secs(120),
        ));

        let state = Arc::new(AppState {
            evolution: Arc::new(EvolutionClient::from_config(&config.evolution)),
            config,
            processor,
            stores,
            webhook_stats: WebhookStats::new(),
            google_search: false,
        });
        TestApp {
            state,
            store,
            sender,
        }
    }

    pub async fn body_json(response: axum::response::Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_root_lists_webhook_endpoints() {
        let app = test_app("ok");
        let response = app
            .router()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "online");
        assert!(body["webhook_endpoints"]
            .as_array()
            .unwrap()
            .iter()
            .any(|e| e == "/messages-upsert"));
    }

    #[tokio::test]
    async fn test_health_without_evolution() {
        let app = test_app("ok");
        let response = app
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["persistent_storage"], false);
        assert_eq!(body["evolution"]["configured"], false);
        assert_eq!(body["evolution"]["instance"], "ia-whatsapp");
        assert!(body["evolution"].get("state").is_none());
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = test_app("ok");
        let response = app
            .router()
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
