use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::{FieldSpec, OperationRequest};
use crate::errors::DialogueError;
use crate::execution::Executor;
use crate::flows::prompts::{NullPromptSink, PromptSink};
use crate::flows::states::{
    CompletedOperation, DialogueEvent, DialogueState, FailedOperation, FailureReason, FieldPrompt,
    FieldRejection, PendingOperation, SlotContext, SlotOutcome, TransitionOutcome,
};

/// Transition table for a single pending operation.
pub fn transition(
    current: DialogueState,
    event: DialogueEvent,
    slots: &SlotContext,
) -> Result<TransitionOutcome, DialogueError> {
    use DialogueEvent::{
        CancelRequested, DispatchRequested, ExecutionFailed, ExecutionSucceeded, FieldAccepted,
        FieldsEvaluated, ValidationStarted,
    };
    use DialogueState::{AwaitingField, Completed, Dispatched, Failed, Intake, Ready, Validating};

    let to = match (current, event) {
        (Intake, ValidationStarted) => Validating,
        (Validating, FieldsEvaluated) | (AwaitingField, FieldAccepted) => {
            if slots.missing_fields == 0 {
                Ready
            } else {
                AwaitingField
            }
        }
        (Ready, DispatchRequested) => Dispatched,
        (Dispatched, ExecutionSucceeded) => Completed,
        (Dispatched, ExecutionFailed) => Failed,
        (state, CancelRequested) if !state.is_terminal() => Failed,
        _ => {
            return Err(DialogueError::InvalidState {
                state: Some(current),
                action: event.as_str(),
            });
        }
    };

    Ok(TransitionOutcome { from: current, to, event })
}

struct AuditHook {
    sink: Arc<dyn AuditSink>,
    context: AuditContext,
}

/// Drives one pending operation at a time from intake to completion.
pub struct SlotFillingEngine {
    pending: Option<PendingOperation>,
    prompts: Arc<dyn PromptSink>,
    audit: Option<AuditHook>,
}

impl Default for SlotFillingEngine {
    fn default() -> Self {
        Self::new(Arc::new(NullPromptSink))
    }
}

impl SlotFillingEngine {
    pub fn new(prompts: Arc<dyn PromptSink>) -> Self {
        Self { pending: None, prompts, audit: None }
    }

    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>, context: AuditContext) -> Self {
        self.audit = Some(AuditHook { sink, context });
        self
    }

    pub fn pending(&self) -> Option<&PendingOperation> {
        self.pending.as_ref()
    }

    pub fn state(&self) -> Option<DialogueState> {
        self.pending.as_ref().map(|pending| pending.state)
    }

    pub fn is_awaiting_field(&self) -> bool {
        self.state() == Some(DialogueState::AwaitingField)
    }

    /// Prompt for the field currently awaited, e.g. to re-ask after a rejection.
    pub fn current_prompt(&self) -> Option<FieldPrompt> {
        self.pending.as_ref().and_then(PendingOperation::next_prompt)
    }

    pub fn begin(
        &mut self,
        request: OperationRequest,
        required: Vec<FieldSpec>,
    ) -> Result<SlotOutcome, DialogueError> {
        if let Some(active) = &self.pending {
            warn!(
                event_name = "dialogue.begin_conflict",
                operation_id = %active.operation_id,
                entity_type = %active.entity_type,
                state = ?active.state,
                "rejecting new request while an operation is in progress"
            );
            return Err(DialogueError::ConflictingOperation {
                entity_type: active.entity_type.clone(),
                state: active.state,
            });
        }

        let mut specs: Vec<FieldSpec> = Vec::with_capacity(required.len());
        for spec in required {
            if !specs.iter().any(|existing| existing.name == spec.name) {
                specs.push(spec);
            }
        }

        let OperationRequest { entity_type, operation, fields } = request;
        let mut pending =
            PendingOperation::intake(Uuid::new_v4().to_string(), entity_type, operation, specs);
        info!(
            event_name = "dialogue.operation_started",
            operation_id = %pending.operation_id,
            entity_type = %pending.entity_type,
            operation = %pending.operation,
            "pending operation created"
        );
        apply_event(self.audit.as_ref(), &mut pending, DialogueEvent::ValidationStarted)?;

        let mut supplied = fields;
        let mut collected = Vec::new();
        let mut missing = Vec::new();
        let mut rejections = Vec::new();
        for spec in pending.required_fields() {
            match supplied.remove(&spec.name) {
                Some(raw) => match spec.validate(&raw) {
                    Ok(value) => collected.push((spec.name.clone(), value)),
                    Err(reason) => {
                        rejections.push(FieldRejection {
                            field: spec.name.clone(),
                            value: raw,
                            reason,
                        });
                        missing.push(spec.name.clone());
                    }
                },
                None => missing.push(spec.name.clone()),
            }
        }
        pending.collected_fields.extend(collected);
        pending.missing_fields = missing;
        pending.supplementary_fields = supplied
            .into_iter()
            .map(|(name, value)| (name, value.trim().to_string()))
            .filter(|(_, value)| !value.is_empty())
            .collect();
        pending.rejections = rejections;

        apply_event(self.audit.as_ref(), &mut pending, DialogueEvent::FieldsEvaluated)?;

        let outcome = match pending.next_prompt() {
            Some(prompt) => {
                self.prompts.emit(&prompt);
                SlotOutcome::AwaitingField(prompt)
            }
            None => SlotOutcome::Ready,
        };
        self.pending = Some(pending);
        Ok(outcome)
    }

    pub fn supply_field(&mut self, value: &str) -> Result<SlotOutcome, DialogueError> {
        let audit = self.audit.as_ref();
        let Some(pending) = self.pending.as_mut() else {
            return Err(DialogueError::InvalidState { state: None, action: "supply_field" });
        };
        let invalid =
            || DialogueError::InvalidState { state: Some(pending.state), action: "supply_field" };
        let Some(field) = pending.awaited_field().map(str::to_string) else {
            return Err(invalid());
        };
        let Some(spec) = pending.spec(&field).cloned() else {
            return Err(invalid());
        };

        let normalized = match spec.validate(value) {
            Ok(normalized) => normalized,
            Err(reason) => {
                info!(
                    event_name = "dialogue.field_rejected",
                    operation_id = %pending.operation_id,
                    field = %field,
                    reason = %reason,
                    "supplied value failed validation"
                );
                if let Some(hook) = audit {
                    hook.sink.emit(
                        AuditEvent::new(
                            &hook.context,
                            Some(pending.operation_id.clone()),
                            "dialogue.field_rejected",
                            AuditCategory::Dialogue,
                            AuditOutcome::Rejected,
                        )
                        .with_metadata("field", field.clone())
                        .with_metadata("reason", reason.clone()),
                    );
                }
                pending.record_rejection(FieldRejection {
                    field: field.clone(),
                    value: value.to_string(),
                    reason: reason.clone(),
                });
                return Err(DialogueError::ValidationFailed { field, reason });
            }
        };

        pending.missing_fields.retain(|missing| missing != &field);
        pending.collected_fields.insert(field, normalized);
        apply_event(audit, pending, DialogueEvent::FieldAccepted)?;

        match pending.next_prompt() {
            Some(prompt) => {
                self.prompts.emit(&prompt);
                Ok(SlotOutcome::AwaitingField(prompt))
            }
            None => Ok(SlotOutcome::Ready),
        }
    }

    /// Hands a ready operation to the executor and settles it as completed or failed.
    pub async fn dispatch<X>(&mut self, executor: &X) -> Result<CompletedOperation, DialogueError>
    where
        X: Executor + ?Sized,
    {
        let audit = self.audit.as_ref();
        let Some(pending) = self.pending.as_mut() else {
            return Err(DialogueError::InvalidState { state: None, action: "dispatch" });
        };
        if pending.state != DialogueState::Ready {
            return Err(DialogueError::InvalidState {
                state: Some(pending.state),
                action: "dispatch",
            });
        }
        apply_event(audit, pending, DialogueEvent::DispatchRequested)?;

        let fields = pending.dispatch_fields();
        let result = executor.execute(&pending.entity_type, pending.operation, &fields).await;
        let event = match &result {
            Ok(_) => DialogueEvent::ExecutionSucceeded,
            Err(_) => DialogueEvent::ExecutionFailed,
        };
        if let Some(hook) = audit {
            let executed = match &result {
                Ok(output) => AuditEvent::new(
                    &hook.context,
                    Some(pending.operation_id.clone()),
                    "execution.operation_executed",
                    AuditCategory::Execution,
                    AuditOutcome::Success,
                )
                .with_metadata("result", output.describe()),
                Err(error) => AuditEvent::new(
                    &hook.context,
                    Some(pending.operation_id.clone()),
                    "execution.operation_failed",
                    AuditCategory::Execution,
                    AuditOutcome::Failed,
                )
                .with_metadata("error_code", error.code.clone()),
            };
            hook.sink.emit(executed.with_metadata("entity_type", pending.entity_type.clone()));
        }
        apply_event(audit, pending, event)?;

        let Some(settled) = self.pending.take() else {
            return Err(DialogueError::InvalidState { state: None, action: "dispatch" });
        };
        match result {
            Ok(output) => {
                let completed = CompletedOperation::new(settled, output);
                info!(
                    event_name = "dialogue.operation_completed",
                    operation_id = %completed.operation_id(),
                    entity_type = %completed.entity_type(),
                    operation = %completed.operation(),
                    result = %completed.output().describe(),
                    "operation completed"
                );
                Ok(completed)
            }
            Err(error) => {
                warn!(
                    event_name = "dialogue.operation_failed",
                    operation_id = %settled.operation_id,
                    entity_type = %settled.entity_type,
                    error_code = %error.code,
                    error = %error.message,
                    "executor rejected the operation"
                );
                Err(DialogueError::Execution(error))
            }
        }
    }

    pub fn cancel(&mut self) -> Result<FailedOperation, DialogueError> {
        let audit = self.audit.as_ref();
        let Some(pending) = self.pending.as_mut() else {
            return Err(DialogueError::InvalidState { state: None, action: "cancel" });
        };
        apply_event(audit, pending, DialogueEvent::CancelRequested)?;

        let Some(discarded) = self.pending.take() else {
            return Err(DialogueError::InvalidState { state: None, action: "cancel" });
        };
        info!(
            event_name = "dialogue.operation_cancelled",
            operation_id = %discarded.operation_id,
            entity_type = %discarded.entity_type,
            "pending operation discarded"
        );
        Ok(FailedOperation::new(discarded, FailureReason::UserCancelled))
    }
}

fn apply_event(
    audit: Option<&AuditHook>,
    pending: &mut PendingOperation,
    event: DialogueEvent,
) -> Result<TransitionOutcome, DialogueError> {
    let slots = SlotContext { missing_fields: pending.missing_fields.len() };
    let result = transition(pending.state, event, &slots);

    match &result {
        Ok(outcome) => {
            debug!(
                event_name = "dialogue.transition_applied",
                operation_id = %pending.operation_id,
                from = ?outcome.from,
                to = ?outcome.to,
                event = ?outcome.event,
                "dialogue transition applied"
            );
            pending.state = outcome.to;
        }
        Err(error) => {
            warn!(
                event_name = "dialogue.transition_rejected",
                operation_id = %pending.operation_id,
                error = %error,
                "dialogue transition rejected"
            );
        }
    }

    if let Some(hook) = audit {
        let event = match &result {
            Ok(outcome) => AuditEvent::new(
                &hook.context,
                Some(pending.operation_id.clone()),
                "dialogue.transition_applied",
                AuditCategory::Dialogue,
                AuditOutcome::Success,
            )
            .with_metadata("from", format!("{:?}", outcome.from))
            .with_metadata("to", format!("{:?}", outcome.to))
            .with_metadata("event", format!("{:?}", outcome.event)),
            Err(error) => AuditEvent::new(
                &hook.context,
                Some(pending.operation_id.clone()),
                "dialogue.transition_rejected",
                AuditCategory::Dialogue,
                AuditOutcome::Rejected,
            )
            .with_metadata("error", error.to_string()),
        };
        hook.sink.emit(event);
    }

    result
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::audit::{AuditCategory, AuditContext, AuditOutcome, InMemoryAuditSink};
    use crate::domain::{FieldMap, FieldSpec, FieldValidator, OperationKind, OperationRequest};
    use crate::errors::DialogueError;
    use crate::execution::{ExecutionError, ExecutionOutput, Executor};
    use crate::flows::engine::{transition, SlotFillingEngine};
    use crate::flows::prompts::InMemoryPromptSink;
    use crate::flows::states::{
        DialogueEvent, DialogueState, FailureReason, SlotContext, SlotOutcome,
    };

    struct RecordingExecutor {
        result: Result<ExecutionOutput, ExecutionError>,
        calls: Mutex<Vec<(String, OperationKind, FieldMap)>>,
    }

    impl RecordingExecutor {
        fn succeeding() -> Self {
            Self { result: Ok(ExecutionOutput::RowCount(1)), calls: Mutex::new(Vec::new()) }
        }

        fn failing(error: ExecutionError) -> Self {
            Self { result: Err(error), calls: Mutex::new(Vec::new()) }
        }

        fn calls(&self) -> Vec<(String, OperationKind, FieldMap)> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    #[async_trait]
    impl Executor for RecordingExecutor {
        async fn execute(
            &self,
            entity_type: &str,
            operation: OperationKind,
            fields: &FieldMap,
        ) -> Result<ExecutionOutput, ExecutionError> {
            self.calls.lock().expect("calls lock").push((
                entity_type.to_string(),
                operation,
                fields.clone(),
            ));
            self.result.clone()
        }
    }

    fn employee_fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::new("name", FieldValidator::text(100)).required().identifying(),
            FieldSpec::new("department", FieldValidator::text(50))
                .described("Department name (e.g., Engineering, Sales, HR)")
                .required(),
            FieldSpec::new("salary", FieldValidator::non_negative_number())
                .described("Annual salary amount (numbers only)")
                .required(),
        ]
    }

    fn create_employee(fields: &[(&str, &str)]) -> OperationRequest {
        OperationRequest {
            entity_type: "employee".to_string(),
            operation: OperationKind::Create,
            fields: fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    fn prompted_field(outcome: &SlotOutcome) -> &str {
        match outcome {
            SlotOutcome::AwaitingField(prompt) => prompt.field_name.as_str(),
            SlotOutcome::Ready => "",
        }
    }

    #[test]
    fn transition_table_rejects_out_of_order_events() {
        let slots = SlotContext::default();
        let error = transition(DialogueState::Intake, DialogueEvent::DispatchRequested, &slots)
            .expect_err("intake cannot dispatch");
        assert_eq!(
            error,
            DialogueError::InvalidState { state: Some(DialogueState::Intake), action: "dispatch" }
        );

        let ready = transition(DialogueState::Validating, DialogueEvent::FieldsEvaluated, &slots)
            .expect("validating -> ready");
        assert_eq!(ready.to, DialogueState::Ready);

        let awaiting = transition(
            DialogueState::Validating,
            DialogueEvent::FieldsEvaluated,
            &SlotContext { missing_fields: 2 },
        )
        .expect("validating -> awaiting");
        assert_eq!(awaiting.to, DialogueState::AwaitingField);

        assert!(transition(DialogueState::Completed, DialogueEvent::CancelRequested, &slots)
            .is_err());
        assert!(transition(DialogueState::Failed, DialogueEvent::CancelRequested, &slots).is_err());
        for state in [
            DialogueState::Intake,
            DialogueState::Validating,
            DialogueState::AwaitingField,
            DialogueState::Ready,
            DialogueState::Dispatched,
        ] {
            let cancelled = transition(state, DialogueEvent::CancelRequested, &slots)
                .expect("non-terminal states can cancel");
            assert_eq!(cancelled.to, DialogueState::Failed);
        }
    }

    #[tokio::test]
    async fn employee_scenario_collects_fields_in_schema_order_and_completes() {
        let prompts = InMemoryPromptSink::default();
        let mut engine = SlotFillingEngine::new(Arc::new(prompts.clone()));

        let outcome = engine
            .begin(create_employee(&[("name", "John Doe")]), employee_fields())
            .expect("begin should succeed");
        assert_eq!(prompted_field(&outcome), "department");
        assert_eq!(engine.state(), Some(DialogueState::AwaitingField));

        let outcome = engine.supply_field("Engineering").expect("department accepted");
        assert_eq!(prompted_field(&outcome), "salary");

        let outcome = engine.supply_field("75000").expect("salary accepted");
        assert_eq!(outcome, SlotOutcome::Ready);
        assert_eq!(engine.state(), Some(DialogueState::Ready));

        let pending = engine.pending().expect("pending operation");
        let collected = pending.collected_fields.keys().cloned().collect::<Vec<_>>();
        assert_eq!(collected, vec!["department", "name", "salary"]);
        assert!(pending.missing_fields.is_empty());

        let executor = RecordingExecutor::succeeding();
        let completed = engine.dispatch(&executor).await.expect("dispatch should complete");
        assert_eq!(completed.entity_type(), "employee");
        assert_eq!(completed.fields().get("department").map(String::as_str), Some("Engineering"));
        assert_eq!(completed.fields().get("salary").map(String::as_str), Some("75000"));
        assert!(engine.pending().is_none());

        let calls = executor.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, OperationKind::Create);
        assert_eq!(calls[0].2.len(), 3);

        let asked = prompts.prompts().into_iter().map(|p| p.field_name).collect::<Vec<_>>();
        assert_eq!(asked, vec!["department", "salary"]);
    }

    #[test]
    fn every_missing_field_is_asked_exactly_once() {
        let prompts = InMemoryPromptSink::default();
        let mut engine = SlotFillingEngine::new(Arc::new(prompts.clone()));

        let mut outcome =
            engine.begin(create_employee(&[]), employee_fields()).expect("begin should succeed");
        let answers = [("name", "Ada Lovelace"), ("department", "Research"), ("salary", "120000")];
        for (field, answer) in answers {
            assert_eq!(prompted_field(&outcome), field);
            outcome = engine.supply_field(answer).expect("valid answer");
        }

        assert_eq!(outcome, SlotOutcome::Ready);
        let pending = engine.pending().expect("pending operation");
        let required = employee_fields().into_iter().map(|spec| spec.name).collect::<Vec<_>>();
        let mut collected = pending.collected_fields.keys().cloned().collect::<Vec<_>>();
        collected.sort();
        let mut expected = required.clone();
        expected.sort();
        assert_eq!(collected, expected);
        assert_eq!(prompts.prompts().len(), 3);
    }

    #[test]
    fn rejected_value_keeps_the_same_field_awaited() {
        let mut engine = SlotFillingEngine::default();
        engine
            .begin(
                create_employee(&[("name", "John Doe"), ("department", "Sales")]),
                employee_fields(),
            )
            .expect("begin should succeed");

        let error = engine.supply_field("seventy thousand").expect_err("salary must be numeric");
        assert!(matches!(
            error,
            DialogueError::ValidationFailed { ref field, ref reason }
                if field == "salary" && reason.contains("number")
        ));

        let pending = engine.pending().expect("pending operation");
        assert_eq!(pending.missing_fields, vec!["salary".to_string()]);
        assert_eq!(pending.awaited_field(), Some("salary"));
        assert_eq!(engine.state(), Some(DialogueState::AwaitingField));
        assert_eq!(
            engine.current_prompt().map(|prompt| prompt.field_name),
            Some("salary".to_string())
        );
    }

    #[test]
    fn invalid_value_supplied_up_front_is_asked_again_with_reason() {
        let mut engine = SlotFillingEngine::default();
        let outcome = engine
            .begin(
                create_employee(&[("name", "John Doe"), ("department", "Sales"), ("salary", "-5")]),
                employee_fields(),
            )
            .expect("begin should succeed");

        let SlotOutcome::AwaitingField(prompt) = outcome else {
            panic!("salary should be asked again");
        };
        assert_eq!(prompt.field_name, "salary");
        assert!(prompt.retry_reason.as_deref().unwrap_or_default().contains("greater than"));
        assert!(!engine.pending().expect("pending").collected_fields.contains_key("salary"));
    }

    #[test]
    fn re_asked_field_shows_the_latest_rejection() {
        let mut engine = SlotFillingEngine::default();
        engine
            .begin(
                create_employee(&[("name", "John Doe"), ("department", "Sales"), ("salary", "-5")]),
                employee_fields(),
            )
            .expect("begin should succeed");

        let error = engine.supply_field("plenty").expect_err("not a number");
        assert!(matches!(
            error,
            DialogueError::ValidationFailed { ref field, .. } if field == "salary"
        ));

        let prompt = engine.current_prompt().expect("salary still awaited");
        assert_eq!(prompt.field_name, "salary");
        assert_eq!(prompt.retry_reason.as_deref(), Some("salary must be a number (numbers only)"));
        assert_eq!(engine.pending().expect("pending").rejections.len(), 1);
    }

    #[test]
    fn complete_request_goes_straight_to_ready_and_keeps_extra_fields() {
        let mut engine = SlotFillingEngine::default();
        let outcome = engine
            .begin(
                create_employee(&[
                    ("name", "John Doe"),
                    ("department", "Sales"),
                    ("salary", "50000"),
                    ("hire_date", " 2023-01-01 "),
                ]),
                employee_fields(),
            )
            .expect("begin should succeed");

        assert_eq!(outcome, SlotOutcome::Ready);
        let pending = engine.pending().expect("pending");
        assert_eq!(pending.collected_fields.len(), 3);
        assert_eq!(
            pending.supplementary_fields.get("hire_date").map(String::as_str),
            Some("2023-01-01")
        );
        assert_eq!(pending.dispatch_fields().len(), 4);
    }

    #[test]
    fn begin_while_awaiting_field_is_a_conflict_and_changes_nothing() {
        let mut engine = SlotFillingEngine::default();
        engine
            .begin(create_employee(&[("name", "John Doe")]), employee_fields())
            .expect("first begin should succeed");
        let before = engine.pending().cloned();

        let error = engine
            .begin(
                OperationRequest {
                    entity_type: "project".to_string(),
                    operation: OperationKind::Read,
                    fields: FieldMap::new(),
                },
                Vec::new(),
            )
            .expect_err("second begin must conflict");

        assert_eq!(
            error,
            DialogueError::ConflictingOperation {
                entity_type: "employee".to_string(),
                state: DialogueState::AwaitingField,
            }
        );
        assert_eq!(engine.pending().cloned(), before);
    }

    #[tokio::test]
    async fn misuse_outside_expected_state_is_invalid_state() {
        let mut engine = SlotFillingEngine::default();
        assert_eq!(
            engine.supply_field("x").expect_err("no pending operation"),
            DialogueError::InvalidState { state: None, action: "supply_field" }
        );

        engine
            .begin(create_employee(&[("name", "John Doe")]), employee_fields())
            .expect("begin should succeed");
        let executor = RecordingExecutor::succeeding();
        let error = engine.dispatch(&executor).await.expect_err("not ready yet");
        assert_eq!(
            error,
            DialogueError::InvalidState {
                state: Some(DialogueState::AwaitingField),
                action: "dispatch"
            }
        );
        assert!(executor.calls().is_empty());

        engine.supply_field("Ops").expect("department");
        engine.supply_field("1").expect("salary");
        assert_eq!(
            engine.supply_field("extra").expect_err("nothing awaited"),
            DialogueError::InvalidState {
                state: Some(DialogueState::Ready),
                action: "supply_field"
            }
        );
    }

    #[tokio::test]
    async fn executor_failure_ends_in_failed_with_detail_unchanged() {
        let mut engine = SlotFillingEngine::default();
        engine
            .begin(
                create_employee(&[("name", "John Doe"), ("department", "Sales"), ("salary", "1")]),
                employee_fields(),
            )
            .expect("begin should succeed");

        let detail = ExecutionError::new("duplicate_record", "John Doe already exists");
        let executor = RecordingExecutor::failing(detail.clone());
        let error = engine.dispatch(&executor).await.expect_err("execution fails");

        assert_eq!(error, DialogueError::Execution(detail));
        assert!(engine.pending().is_none());
        engine
            .begin(create_employee(&[]), employee_fields())
            .expect("a new operation can start after failure");
    }

    #[test]
    fn cancel_discards_pending_operation() {
        let mut engine = SlotFillingEngine::default();
        assert!(engine.cancel().is_err());

        engine
            .begin(create_employee(&[("name", "John Doe")]), employee_fields())
            .expect("begin should succeed");
        engine.supply_field("Engineering").expect("department");

        let failed = engine.cancel().expect("cancel from awaiting field");
        assert_eq!(failed.reason, FailureReason::UserCancelled);
        assert_eq!(failed.collected_fields.len(), 2);
        assert!(engine.pending().is_none());
        assert_eq!(engine.state(), None);
    }

    #[test]
    fn transitions_are_recorded_in_the_audit_trail() {
        let sink = InMemoryAuditSink::default();
        let mut engine = SlotFillingEngine::default().with_audit(
            Arc::new(sink.clone()),
            AuditContext::new("session-1", "req-42", "slot-engine"),
        );

        engine
            .begin(create_employee(&[("name", "John Doe")]), employee_fields())
            .expect("begin should succeed");
        engine.supply_field("Engineering").expect("department accepted");
        assert!(engine.supply_field("lots").is_err());

        let events = sink.events();
        let types = events.iter().map(|event| event.event_type.as_str()).collect::<Vec<_>>();
        assert_eq!(
            types,
            vec![
                "dialogue.transition_applied",
                "dialogue.transition_applied",
                "dialogue.transition_applied",
                "dialogue.field_rejected",
            ]
        );
        assert!(events.iter().all(|event| event.correlation_id == "req-42"));
        assert_eq!(events[1].metadata.get("to").map(String::as_str), Some("AwaitingField"));
    }

    #[tokio::test]
    async fn executor_outcome_is_recorded_in_the_audit_trail() {
        let sink = InMemoryAuditSink::default();
        let mut engine = SlotFillingEngine::default().with_audit(
            Arc::new(sink.clone()),
            AuditContext::new("session-2", "req-43", "slot-engine"),
        );
        engine
            .begin(
                create_employee(&[("name", "John Doe"), ("department", "Sales"), ("salary", "1")]),
                employee_fields(),
            )
            .expect("begin should succeed");

        let failing = RecordingExecutor::failing(ExecutionError::new("duplicate_record", "taken"));
        assert!(engine.dispatch(&failing).await.is_err());

        let events = sink.events();
        let executed = events
            .iter()
            .find(|event| event.category == AuditCategory::Execution)
            .expect("execution event");
        assert_eq!(executed.event_type, "execution.operation_failed");
        assert_eq!(executed.outcome, AuditOutcome::Failed);
        assert_eq!(
            executed.metadata.get("error_code").map(String::as_str),
            Some("duplicate_record")
        );
        assert_eq!(executed.metadata.get("entity_type").map(String::as_str), Some("employee"));
    }
}
