//! # Evolution Bot
//!
//! WhatsApp chatbot gateway for the Evolution API, answered by Gemini.
//!
//! This library provides:
//! - Webhook endpoints that receive WhatsApp events from Evolution API
//! - A per-conversation agent with a bounded memory window and an optional
//!   `google_search` tool backed by Serper
//! - Persistence of prompts, conversations, message logs and AI responses
//!   in Supabase (in memory when Supabase is not configured)
//!
//! ## Architecture
//!
//! ```text
//!   Evolution API ──webhook──▶ api::webhooks ──spawn──▶ MessageProcessor
//!                                                           │
//!                    ┌──────────────────────────────────────┼────────────────┐
//!                    ▼                                      ▼                ▼
//!          ConversationRegistry                      ChatLogStore     MessageSender
//!        (one AgentOrchestrator per sender)          (Supabase)       (Evolution)
//!                    │
//!          ┌─────────┴─────────┐
//!          ▼                   ▼
//!     GeminiClient        ToolRegistry
//!   (generateContent)    (google_search)
//! ```
//!
//! ## Message Flow
//! 1. Evolution posts `messages.upsert`; the sender and text are extracted
//! 2. The incoming message is logged
//! 3. The sender's agent calls Gemini, running `google_search` when asked
//! 4. The reply is delivered through Evolution and logged with its metrics
//!
//! ## Modules
//! - `agent`: orchestrator loop, prompt resolution, conversation registry
//! - `llm`: Gemini client and provider error handling
//! - `tools`: tool trait, registry and the Serper search tool
//! - `memory`: bounded conversation memory window
//! - `storage`: Supabase and in-memory stores
//! - `whatsapp`: webhook parsing and Evolution delivery client
//! - `processor`: end-to-end handling of one message
//! - `api`: HTTP server

pub mod agent;
pub mod api;
pub mod config;
pub mod llm;
pub mod memory;
pub mod processor;
pub mod storage;
pub mod tools;
pub mod whatsapp;

pub use config::Config;
pub use processor::{MessageProcessor, ProcessOutcome};
