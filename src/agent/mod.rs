//! The conversational agent.
//!
//! - `prompt`: system prompt resolution with a built-in fallback
//! - `orchestrator`: the per-conversation model/tool loop
//! - `registry`: one orchestrator per sender, with idle and capacity eviction

mod orchestrator;
pub mod prompt;
mod registry;

#[cfg(test)]
pub(crate) mod test_support;

pub use orchestrator::{
    AgentOrchestrator, AgentSettings, AgentState, DegradeReason, Reply, ReplyOutcome,
    EMPTY_INPUT_REPLY, GENERIC_APOLOGY, MAX_ITERATIONS_REPLY, OTHER_FILTER_REPLY,
    RECITATION_FILTER_REPLY, SAFETY_FILTER_REPLY,
};
pub use registry::{AgentFactory, ConversationRegistry, CLEANUP_INTERVAL};
