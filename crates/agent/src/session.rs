//! One user's conversation: turns utterances into slot-filled, dispatched operations.
//!
//! A session owns its context store and dialogue engine outright. The schema provider,
//! translator and executor are shared with every other session of the runtime.

use std::sync::Arc;

use tabletalk_core::audit::{AuditContext, AuditSink};
use tabletalk_core::context::{ContextStore, ContextUpdater, ConversationContext};
use tabletalk_core::domain::{CandidateRequest, EntitySchema, FieldMap, FieldSpec};
use tabletalk_core::errors::DialogueError;
use tabletalk_core::execution::{ExecutionOutput, Executor};
use tabletalk_core::flows::{
    CompletedOperation, DialogueState, FailureReason, FieldPrompt, SlotFillingEngine, SlotOutcome,
};
use tabletalk_core::resolver::ReferenceResolver;
use tabletalk_core::schema::SchemaProvider;
use tabletalk_core::suggestions::{ContextSuggestionEngine, SuggestionSet};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::guardrails::{GuardrailDecision, GuardrailPolicy};
use crate::translator::Translator;

const CANCEL_PHRASES: &[&str] = &["cancel", "stop", "abort", "never mind", "nevermind"];

/// Collaborators shared by all sessions.
#[derive(Clone)]
pub struct SessionServices {
    pub schemas: Arc<dyn SchemaProvider>,
    pub translator: Arc<dyn Translator>,
    pub executor: Arc<dyn Executor>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TurnReply {
    /// A field is being awaited.
    Prompt(FieldPrompt),
    /// The turn could not be applied; `prompt` is set when a field is still awaited.
    Rejected { reason: String, prompt: Option<FieldPrompt> },
    Completed { summary: String, output: ExecutionOutput, suggestions: SuggestionSet },
    Failed { reason: FailureReason },
    Denied { message: String },
    Cancelled { summary: String },
}

pub struct ConversationSession {
    session_id: String,
    services: SessionServices,
    guardrails: GuardrailPolicy,
    store: ContextStore,
    engine: SlotFillingEngine,
    resolver: ReferenceResolver,
    updater: ContextUpdater,
    suggestions: ContextSuggestionEngine,
}

impl ConversationSession {
    pub fn new(session_id: impl Into<String>, services: SessionServices) -> Self {
        Self {
            session_id: session_id.into(),
            services,
            guardrails: GuardrailPolicy::default(),
            store: ContextStore::new(),
            engine: SlotFillingEngine::default(),
            resolver: ReferenceResolver::new(),
            updater: ContextUpdater::new(),
            suggestions: ContextSuggestionEngine::default(),
        }
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
        let context =
            AuditContext::new(self.session_id.clone(), Uuid::new_v4().to_string(), "user");
        self.engine = self.engine.with_audit(sink.clone(), context.clone());
        self.updater = self.updater.with_audit(sink, context);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn context(&self) -> &ConversationContext {
        self.store.context()
    }

    pub fn state(&self) -> Option<DialogueState> {
        self.engine.state()
    }

    pub fn current_prompt(&self) -> Option<FieldPrompt> {
        self.engine.current_prompt()
    }

    pub fn clear_context(&mut self) {
        self.store.clear();
    }

    /// Suggestions for `entity_type`, or for the last entity touched when none is given.
    pub fn suggestions(&self, entity_type: Option<&str>) -> SuggestionSet {
        let context = self.store.context();
        match entity_type.or(context.last_entity_type()) {
            Some(entity_type) => self.suggestions.suggest(context, entity_type),
            None => SuggestionSet::default(),
        }
    }

    pub async fn handle(&mut self, utterance: &str) -> TurnReply {
        let text = utterance.trim();
        if is_cancel_phrase(text) {
            return self.cancel();
        }
        if self.engine.is_awaiting_field() {
            return self.answer(text).await;
        }

        let summary = self.services.schemas.schema_summary();
        match self.services.translator.translate(text, &summary).await {
            Ok(candidate) => self.submit(candidate).await,
            Err(error) => {
                warn!(
                    event_name = "session.translation_failed",
                    session_id = %self.session_id,
                    error = %error,
                    "utterance could not be translated"
                );
                self.fail(DialogueError::from(error))
            }
        }
    }

    /// Runs an already structured request through resolution, guardrails and slot filling.
    pub async fn submit(&mut self, candidate: CandidateRequest) -> TurnReply {
        let resolution = match self.resolver.resolve(
            self.store.context(),
            self.services.schemas.as_ref(),
            candidate,
        ) {
            Ok(resolution) => resolution,
            Err(error) => return self.reject(error),
        };
        let entity_type = resolution.request.entity_type.clone();
        let Some(schema) = self.services.schemas.schema_for(&entity_type).cloned() else {
            return self.reject(DialogueError::UnknownEntity(entity_type));
        };

        let mut slot_plan = match self.guardrails.evaluate(resolution.request.operation, &schema) {
            GuardrailDecision::Allow { slot_plan } => slot_plan,
            GuardrailDecision::Deny { reason_code, user_message } => {
                info!(
                    event_name = "session.operation_denied",
                    session_id = %self.session_id,
                    entity_type = %entity_type,
                    operation = %resolution.request.operation,
                    reason_code,
                    "guardrail denied the operation"
                );
                return TurnReply::Denied { message: user_message };
            }
        };
        for field in resolution.unresolved_scope_fields() {
            if !slot_plan.iter().any(|spec| spec.name == field) {
                let spec = match schema.field(&field) {
                    Some(spec) => spec.clone().required(),
                    None => FieldSpec::free_text(field),
                };
                slot_plan.push(spec);
            }
        }

        let mut request = resolution.request;
        screen_optional_fields(&self.session_id, &schema, &slot_plan, &mut request.fields);

        match self.engine.begin(request, slot_plan) {
            Ok(SlotOutcome::AwaitingField(prompt)) => TurnReply::Prompt(prompt),
            Ok(SlotOutcome::Ready) => self.dispatch().await,
            Err(error) => self.reject(error),
        }
    }

    pub fn cancel(&mut self) -> TurnReply {
        if self.engine.pending().is_none() {
            return TurnReply::Cancelled { summary: "Nothing to cancel.".to_string() };
        }
        match self.engine.cancel() {
            Ok(failed) => TurnReply::Cancelled {
                summary: format!(
                    "Cancelled the {} of a {} record.",
                    failed.operation, failed.entity_type
                ),
            },
            Err(error) => self.reject(error),
        }
    }

    async fn answer(&mut self, value: &str) -> TurnReply {
        match self.engine.supply_field(value) {
            Ok(SlotOutcome::AwaitingField(prompt)) => TurnReply::Prompt(prompt),
            Ok(SlotOutcome::Ready) => self.dispatch().await,
            Err(DialogueError::ValidationFailed { reason, .. }) => {
                TurnReply::Rejected { reason, prompt: self.engine.current_prompt() }
            }
            Err(error) => self.reject(error),
        }
    }

    async fn dispatch(&mut self) -> TurnReply {
        match self.engine.dispatch(self.services.executor.as_ref()).await {
            Ok(completed) => self.complete(completed),
            Err(error) => self.fail(error),
        }
    }

    fn fail(&self, error: DialogueError) -> TurnReply {
        match error.failure_reason() {
            Some(reason) => TurnReply::Failed { reason },
            None => self.reject(error),
        }
    }

    fn complete(&mut self, completed: CompletedOperation) -> TurnReply {
        let summary = format!(
            "{} {}: {}",
            completed.operation(),
            completed.entity_type(),
            completed.output().describe()
        );
        let output = completed.output().clone();
        let record = self.updater.commit(&mut self.store, completed);
        let suggestions = self.suggestions.suggest(self.store.context(), &record.entity_type);
        TurnReply::Completed { summary, output, suggestions }
    }

    fn reject(&self, error: DialogueError) -> TurnReply {
        if error.is_user_facing() {
            info!(
                event_name = "session.turn_rejected",
                session_id = %self.session_id,
                error = %error,
                "turn rejected"
            );
        } else {
            error!(
                event_name = "session.invalid_state",
                session_id = %self.session_id,
                error = %error,
                "dialogue engine misuse"
            );
        }
        TurnReply::Rejected { reason: error.to_string(), prompt: self.engine.current_prompt() }
    }
}

fn is_cancel_phrase(text: &str) -> bool {
    let normalized = text
        .trim_end_matches(|c: char| matches!(c, '.' | '!'))
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    CANCEL_PHRASES.contains(&normalized.as_str())
}

/// Normalises values for known optional fields and drops the ones that fail validation.
fn screen_optional_fields(
    session_id: &str,
    schema: &EntitySchema,
    slot_plan: &[FieldSpec],
    fields: &mut FieldMap,
) {
    fields.retain(|name, value| {
        if slot_plan.iter().any(|spec| &spec.name == name) {
            return true;
        }
        let Some(spec) = schema.field(name) else {
            return true;
        };
        match spec.validate(value) {
            Ok(normalized) => {
                *value = normalized;
                true
            }
            Err(reason) => {
                warn!(
                    event_name = "session.optional_field_dropped",
                    session_id = %session_id,
                    entity_type = %schema.name,
                    field = %name,
                    reason = %reason,
                    "dropping invalid value for optional field"
                );
                false
            }
        }
    });
}
