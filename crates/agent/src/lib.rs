//! Agent runtime for TableTalk conversations
//!
//! This crate wires the conversation core to the outside world:
//! - Translates utterances into candidate requests (`translator`, `llm`)
//! - Decides which fields an operation must collect (`guardrails`)
//! - Drives one user's turns through resolution, slot filling and dispatch (`session`)
//! - Keeps many independent sessions alive and expires idle ones (`runtime`)
//!
//! # Safety Principle
//!
//! The language model only translates. It never dispatches anything itself: every request
//! it produces goes through the same resolver, guardrails and slot filling as typed input.

pub mod executor;
pub mod guardrails;
pub mod llm;
pub mod runtime;
pub mod session;
pub mod translator;

pub use executor::InMemoryExecutor;
pub use guardrails::{GuardrailDecision, GuardrailPolicy};
pub use llm::{LlmClient, OllamaClient};
pub use runtime::{load_schemas, AgentRuntime, IdleSweep};
pub use session::{ConversationSession, SessionServices, TurnReply};
pub use translator::{KeywordTranslator, LlmTranslator, TranslationError, Translator};
