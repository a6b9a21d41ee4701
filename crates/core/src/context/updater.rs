use std::sync::Arc;

use tracing::info;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::context::{ContextStore, OperationRecord};
use crate::flows::CompletedOperation;

/// Commits completed operations into a `ContextStore`.
#[derive(Clone, Default)]
pub struct ContextUpdater {
    audit: Option<(Arc<dyn AuditSink>, AuditContext)>,
}

impl ContextUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>, context: AuditContext) -> Self {
        self.audit = Some((sink, context));
        self
    }

    /// Consumes the completed operation, so each one is committed at most once.
    pub fn commit(
        &self,
        store: &mut ContextStore,
        completed: CompletedOperation,
    ) -> OperationRecord {
        let record = OperationRecord {
            operation: completed.operation(),
            entity_type: completed.entity_type().to_string(),
            fields: completed.fields().clone(),
            timestamp: completed.completed_at(),
        };
        store.apply(record.clone());

        let context = store.context();
        info!(
            event_name = "context.operation_committed",
            operation_id = %completed.operation_id(),
            entity_type = %record.entity_type,
            operation = %record.operation,
            history_len = context.operation_history().len(),
            usage_count = context.usage_of(&record.entity_type),
            "operation committed to conversation context"
        );
        if let Some((sink, audit_context)) = &self.audit {
            sink.emit(
                AuditEvent::new(
                    audit_context,
                    Some(completed.operation_id().to_string()),
                    "context.operation_committed",
                    AuditCategory::Context,
                    AuditOutcome::Success,
                )
                .with_metadata("entity_type", record.entity_type.clone())
                .with_metadata("operation", record.operation.as_str()),
            );
        }

        record
    }
}
