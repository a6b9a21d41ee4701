pub mod audit;
pub mod config;
pub mod context;
pub mod domain;
pub mod errors;
pub mod execution;
pub mod flows;
pub mod resolver;
pub mod schema;
pub mod suggestions;

pub use audit::{AuditContext, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use context::{
    ContextStore, ContextUpdater, ConversationContext, OperationRecord, RequestRecord,
    UserPatterns, OPERATION_HISTORY_LIMIT, RECENT_REQUEST_LIMIT,
};
pub use domain::{
    CandidateRequest, EntitySchema, FieldMap, FieldSpec, FieldValidator, OperationKind,
    OperationRequest, Reference,
};
pub use errors::{ApplicationError, DialogueError, InterfaceError};
pub use execution::{ExecutionError, ExecutionOutput, Executor};
pub use flows::{
    CompletedOperation, DialogueState, FailedOperation, FailureReason, FieldPrompt, PromptSink,
    SlotFillingEngine, SlotOutcome,
};
pub use resolver::{ReferenceResolver, Resolution, UnresolvedReference};
pub use schema::{SchemaError, SchemaProvider, StaticSchemaProvider};
pub use suggestions::{ContextSuggestionEngine, SuggestionSet};
