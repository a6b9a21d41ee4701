use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tabletalk_core::audit::AuditSink;
use tabletalk_core::config::{AppConfig, SchemaConfig, TranslatorProvider};
use tabletalk_core::schema::{SchemaProvider, StaticSchemaProvider};
use tabletalk_core::suggestions::ContextSuggestionEngine;
use tokio::sync::Mutex;
use tracing::info;

use crate::executor::InMemoryExecutor;
use crate::guardrails::GuardrailPolicy;
use crate::llm::OllamaClient;
use crate::session::{ConversationSession, SessionServices, TurnReply};
use crate::translator::{KeywordTranslator, LlmTranslator, Translator};

/// The schema file named in `schema.path`, or the built-in catalogue.
pub fn load_schemas(config: &SchemaConfig) -> Result<Arc<dyn SchemaProvider>> {
    match &config.path {
        Some(path) => {
            let provider = StaticSchemaProvider::from_path(path)
                .with_context(|| format!("failed to load schema from {}", path.display()))?;
            Ok(Arc::new(provider))
        }
        None => Ok(Arc::new(StaticSchemaProvider::builtin())),
    }
}

impl SessionServices {
    /// Schema catalogue, translator and an in-memory executor as configured.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let schemas = load_schemas(&config.schema)?;

        let translator: Arc<dyn Translator> = match config.translator.provider {
            TranslatorProvider::Keyword => Arc::new(KeywordTranslator::new(schemas.clone())),
            TranslatorProvider::Ollama => {
                let client = OllamaClient::new(
                    config.translator.base_url.clone(),
                    config.translator.model.clone(),
                    config.translator.api_key.clone(),
                    Duration::from_secs(config.translator.timeout_secs),
                    config.translator.max_retries,
                )?;
                Arc::new(LlmTranslator::new(client))
            }
        };

        Ok(Self {
            executor: Arc::new(InMemoryExecutor::new(schemas.clone())),
            schemas,
            translator,
        })
    }
}

/// What one idle sweep did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IdleSweep {
    pub cancelled: usize,
    pub dropped: usize,
}

struct SessionSlot {
    session: ConversationSession,
    last_active: Instant,
}

/// Independent conversation sessions keyed by id. A turn locks only its own session.
pub struct AgentRuntime {
    services: SessionServices,
    guardrails: GuardrailPolicy,
    suggestions: ContextSuggestionEngine,
    audit: Option<Arc<dyn AuditSink>>,
    idle_timeout: Duration,
    max_sessions: usize,
    sessions: Mutex<HashMap<String, Arc<Mutex<SessionSlot>>>>,
}

impl AgentRuntime {
    pub fn new(services: SessionServices, idle_timeout: Duration, max_sessions: usize) -> Self {
        Self {
            services,
            guardrails: GuardrailPolicy::default(),
            suggestions: ContextSuggestionEngine::default(),
            audit: None,
            idle_timeout,
            max_sessions,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &AppConfig, services: SessionServices) -> Self {
        Self::new(
            services,
            Duration::from_secs(config.session.idle_timeout_secs),
            config.session.max_sessions,
        )
        .with_suggestion_engine(ContextSuggestionEngine::new(
            config.suggestions.max_field_suggestions,
            config.suggestions.follow_up_limit,
        ))
    }

    pub fn with_guardrails(mut self, guardrails: GuardrailPolicy) -> Self {
        self.guardrails = guardrails;
        self
    }

    pub fn with_suggestion_engine(mut self, suggestions: ContextSuggestionEngine) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn handle_message(&self, session_id: &str, text: &str) -> Result<TurnReply> {
        let slot = self.session(session_id).await?;
        let mut slot = slot.lock().await;
        slot.last_active = Instant::now();
        let reply = slot.session.handle(text).await;
        slot.last_active = Instant::now();
        Ok(reply)
    }

    /// Cancels the pending operation of every session idle past the timeout. Idle sessions
    /// that never completed an operation are dropped; the rest keep their context.
    pub async fn expire_idle(&self) -> IdleSweep {
        let mut sessions = self.sessions.lock().await;
        let mut sweep = IdleSweep::default();
        let mut empty = Vec::new();
        for (session_id, slot) in sessions.iter() {
            // A session mid-turn is busy, not idle.
            let Ok(mut slot) = slot.try_lock() else {
                continue;
            };
            if slot.last_active.elapsed() < self.idle_timeout {
                continue;
            }
            if slot.session.state().is_some() {
                slot.session.cancel();
                sweep.cancelled += 1;
                info!(
                    event_name = "runtime.pending_cancelled",
                    session_id = %session_id,
                    idle_timeout_secs = self.idle_timeout.as_secs(),
                    "idle session's pending operation cancelled"
                );
            }
            if slot.session.context().is_empty() {
                empty.push(session_id.clone());
            }
        }
        for session_id in &empty {
            sessions.remove(session_id);
            info!(
                event_name = "runtime.session_expired",
                session_id = %session_id,
                "idle session without history dropped"
            );
        }
        sweep.dropped = empty.len();
        sweep
    }

    async fn session(&self, session_id: &str) -> Result<Arc<Mutex<SessionSlot>>> {
        let mut sessions = self.sessions.lock().await;
        if let Some(slot) = sessions.get(session_id) {
            return Ok(slot.clone());
        }
        if sessions.len() >= self.max_sessions {
            bail!(
                "session limit of {} reached; try again once an idle session expires",
                self.max_sessions
            );
        }

        let mut session = ConversationSession::new(session_id, self.services.clone())
            .with_guardrails(self.guardrails.clone())
            .with_suggestion_engine(self.suggestions);
        if let Some(sink) = &self.audit {
            session = session.with_audit(sink.clone());
        }
        info!(event_name = "runtime.session_created", session_id = %session_id, "session created");

        let slot = Arc::new(Mutex::new(SessionSlot { session, last_active: Instant::now() }));
        sessions.insert(session_id.to_string(), slot.clone());
        Ok(slot)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tabletalk_core::audit::InMemoryAuditSink;
    use tabletalk_core::config::AppConfig;
    use tabletalk_core::execution::ExecutionOutput;

    use super::{AgentRuntime, IdleSweep};
    use crate::session::{SessionServices, TurnReply};

    fn runtime(idle_timeout: Duration, max_sessions: usize) -> AgentRuntime {
        let services = SessionServices::from_config(&AppConfig::default()).expect("services");
        AgentRuntime::new(services, idle_timeout, max_sessions)
    }

    #[tokio::test]
    async fn sessions_keep_independent_contexts() {
        let runtime = runtime(Duration::from_secs(900), 4);

        let reply = runtime.handle_message("alice", "add project named Apollo").await;
        assert!(matches!(
            reply,
            Ok(TurnReply::Prompt(ref prompt)) if prompt.field_name == "department"
        ));

        let reply = runtime.handle_message("bob", "R&D").await.expect("bob's turn");
        assert!(
            matches!(reply, TurnReply::Failed { .. }),
            "bob has no pending operation, so the text is translated: {reply:?}"
        );

        let reply = runtime.handle_message("alice", "R&D").await.expect("alice's turn");
        assert!(matches!(reply, TurnReply::Prompt(ref prompt) if prompt.field_name == "budget"));
        assert_eq!(runtime.session_count().await, 2);
    }

    #[tokio::test]
    async fn session_limit_is_enforced() {
        let runtime = runtime(Duration::from_secs(900), 1);
        runtime.handle_message("first", "show employees").await.expect("first session");

        let error = runtime
            .handle_message("second", "show employees")
            .await
            .expect_err("limit reached");
        assert!(error.to_string().contains("session limit of 1"));
        assert!(runtime.handle_message("first", "show projects").await.is_ok());
    }

    #[tokio::test]
    async fn idle_sweep_cancels_pending_work_and_keeps_context() {
        let sink = InMemoryAuditSink::default();
        let runtime = runtime(Duration::ZERO, 4).with_audit(Arc::new(sink.clone()));
        let reply = runtime
            .handle_message("ann", "add employee named Ann department Ops salary 5")
            .await
            .expect("ann's turn");
        assert!(matches!(reply, TurnReply::Completed { .. }), "unexpected reply: {reply:?}");
        runtime.handle_message("carol", "add employee named Carol").await.expect("carol's turn");

        let sweep = runtime.expire_idle().await;
        assert_eq!(sweep, IdleSweep { cancelled: 1, dropped: 1 });
        assert_eq!(runtime.session_count().await, 1);
        assert!(sink.events().iter().any(|event| {
            event.session_id == "carol"
                && event.metadata.get("event").map(String::as_str) == Some("CancelRequested")
        }));

        let reply = runtime.handle_message("ann", "show me that record").await.expect("ann again");
        let TurnReply::Completed { output: ExecutionOutput::RecordSet(rows), .. } = reply else {
            panic!("context should survive the idle sweep: {reply:?}");
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name").map(String::as_str), Some("Ann"));
    }
}
