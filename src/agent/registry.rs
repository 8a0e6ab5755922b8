//! Conversation-scoped agents, keyed by sender number.
//!
//! Each sender gets its own [`AgentOrchestrator`] (and therefore its own
//! memory window and resolved system prompt), created lazily on first
//! message and evicted after an idle period or when the registry is full.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::llm::ModelClient;
use crate::storage::{PromptStore, SYSTEM_PROMPT_NAME};
use crate::tools::ToolRegistry;

use super::{AgentOrchestrator, AgentSettings};

/// Interval of the background idle-eviction task.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Builds orchestrators with shared model, tools and prompt source.
pub struct AgentFactory {
    model: Arc<dyn ModelClient>,
    tools: Arc<ToolRegistry>,
    prompts: Arc<dyn PromptStore>,
    settings: AgentSettings,
}

impl AgentFactory {
    pub fn new(
        model: Arc<dyn ModelClient>,
        tools: Arc<ToolRegistry>,
        prompts: Arc<dyn PromptStore>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            model,
            tools,
            prompts,
            settings,
        }
    }

    /// Build a fresh orchestrator; resolves the system prompt from storage.
    pub async fn create(&self) -> AgentOrchestrator {
        AgentOrchestrator::with_resolved_prompt(
            Arc::clone(&self.model),
            Arc::clone(&self.tools),
            self.prompts.as_ref(),
            SYSTEM_PROMPT_NAME,
            self.settings.clone(),
        )
        .await
    }
}

struct Entry {
    agent: Arc<AgentOrchestrator>,
    last_used: Instant,
}

pub struct ConversationRegistry {
    factory: AgentFactory,
    entries: Mutex<HashMap<String, Entry>>,
    idle_ttl: Duration,
    max_conversations: usize,
}

impl ConversationRegistry {
    pub fn new(factory: AgentFactory, idle_ttl: Duration, max_conversations: usize) -> Self {
        Self {
            factory,
            entries: Mutex::new(HashMap::new()),
            idle_ttl,
            max_conversations: max_conversations.max(1),
        }
    }

    /// The agent for this conversation, created on first use.
    ///
    /// Construction runs without holding the map lock. If two callers race,
    /// the first inserted agent wins and the other one is dropped.
    pub async fn get_or_create(&self, conversation_id: &str) -> Arc<AgentOrchestrator> {
        if let Some(agent) = self.touch(conversation_id).await {
            return agent;
        }

        let created = Arc::new(self.factory.create().await);

        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(conversation_id) {
            entry.last_used = Instant::now();
            return Arc::clone(&entry.agent);
        }

        if entries.len() >= self.max_conversations {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(id, _)| id.clone());
            if let Some(id) = oldest {
                entries.remove(&id);
                tracing::debug!(conversation = %id, "Evicted least recently used conversation");
            }
        }

        entries.insert(
            conversation_id.to_string(),
            Entry {
                agent: Arc::clone(&created),
                last_used: Instant::now(),
            },
        );
        tracing::debug!(
            conversation = %conversation_id,
            total = entries.len(),
            "Created conversation agent"
        );
        created
    }

    async fn touch(&self, conversation_id: &str) -> Option<Arc<AgentOrchestrator>> {
        let mut entries = self.entries.lock().await;
        entries.get_mut(conversation_id).map(|entry| {
            entry.last_used = Instant::now();
            Arc::clone(&entry.agent)
        })
    }

    /// Drop agents idle for longer than the TTL. Returns how many were removed.
    pub async fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, e| now.duration_since(e.last_used) <= self.idle_ttl);
        before - entries.len()
    }

    /// Clear one conversation's memory. Returns false if it has no agent.
    pub async fn reset(&self, conversation_id: &str) -> bool {
        let agent = self
            .entries
            .lock()
            .await
            .get(conversation_id)
            .map(|e| Arc::clone(&e.agent));
        match agent {
            Some(agent) => {
                agent.clear_memory().await;
                true
            }
            None => false,
        }
    }

    /// Forget a conversation entirely.
    pub async fn remove(&self, conversation_id: &str) -> bool {
        self.entries.lock().await.remove(conversation_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Run [`Self::evict_idle`] every `every` until `cancel` fires.
    pub fn spawn_cleanup(
        self: &Arc<Self>,
        every: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Conversation cleanup stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = registry.evict_idle().await;
                        if evicted > 0 {
                            tracing::info!("Evicted {} idle conversations", evicted);
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::test_support::{completion, ScriptedModel};
    use crate::llm::{ModelResult, TurnRole};
    use crate::storage::InMemoryStore;

    fn registry(idle_ttl: Duration, max: usize) -> Arc<ConversationRegistry> {
        let model = Arc::new(ScriptedModel::repeating(Ok(completion(ModelResult::Text(
            "ok".to_string(),
        )))));
        let factory = AgentFactory::new(
            model,
            Arc::new(ToolRegistry::empty(Duration::from_secs(5))),
            Arc::new(InMemoryStore::new()),
            AgentSettings::default(),
        );
        Arc::new(ConversationRegistry::new(factory, idle_ttl, max))
    }

    #[tokio::test]
    async fn test_same_sender_gets_same_agent() {
        let registry = registry(Duration::from_secs(1800), 10);
        let a = registry.get_or_create("5511999999999").await;
        let b = registry.get_or_create("5511999999999").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len().await, 1);
    }

    /// Messages from different senders must never share a memory window.
    #[tokio::test]
    async fn test_senders_have_isolated_memory() {
        let registry = registry(Duration::from_secs(1800), 10);
        let alice = registry.get_or_create("alice").await;
        let bob = registry.get_or_create("bob").await;

        alice.generate("Soy Alice").await;

        assert_eq!(alice.history().await.len(), 2);
        assert!(bob.history().await.is_empty());
        assert_eq!(alice.history().await[0].role, TurnRole::User);
    }

    #[tokio::test]
    async fn test_concurrent_creation_keeps_one_agent() {
        let registry = registry(Duration::from_secs(1800), 10);
        let (a, b) = tokio::join!(registry.get_or_create("x"), registry.get_or_create("x"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_used() {
        let registry = registry(Duration::from_secs(1800), 2);
        registry.get_or_create("a").await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.get_or_create("b").await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.get_or_create("a").await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.get_or_create("c").await;

        assert_eq!(registry.len().await, 2);
        assert!(!registry.remove("b").await);
        assert!(registry.remove("a").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_conversations_are_evicted() {
        let registry = registry(Duration::from_secs(30), 10);
        registry.get_or_create("old").await;
        tokio::time::advance(Duration::from_secs(20)).await;
        registry.get_or_create("fresh").await;
        tokio::time::advance(Duration::from_secs(15)).await;

        assert_eq!(registry.evict_idle().await, 1);
        assert!(registry.remove("fresh").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_evicts_and_stops() {
        let registry = registry(Duration::from_secs(30), 10);
        registry.get_or_create("a").await;

        let cancel = CancellationToken::new();
        let handle = registry.spawn_cleanup(Duration::from_secs(10), cancel.clone());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(registry.is_empty().await);

        cancel.cancel();
        handle.await.expect("Cleanup task panicked");
    }

    #[tokio::test]
    async fn test_reset_clears_memory_but_keeps_agent() {
        let registry = registry(Duration::from_secs(1800), 10);
        let agent = registry.get_or_create("a").await;
        agent.generate("hola").await;

        assert!(registry.reset("a").await);
        assert!(agent.history().await.is_empty());
        assert_eq!(registry.len().await, 1);
        assert!(!registry.reset("unknown").await);
    }
}
