use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{FieldMap, FieldSpec, OperationKind};
use crate::execution::{ExecutionError, ExecutionOutput};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DialogueState {
    Intake,
    Validating,
    AwaitingField,
    Ready,
    Dispatched,
    Completed,
    Failed,
}

impl DialogueState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogueEvent {
    ValidationStarted,
    FieldsEvaluated,
    FieldAccepted,
    DispatchRequested,
    ExecutionSucceeded,
    ExecutionFailed,
    CancelRequested,
}

impl DialogueEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationStarted => "validate",
            Self::FieldsEvaluated => "evaluate_fields",
            Self::FieldAccepted => "supply_field",
            Self::DispatchRequested => "dispatch",
            Self::ExecutionSucceeded => "execution_succeeded",
            Self::ExecutionFailed => "execution_failed",
            Self::CancelRequested => "cancel",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SlotContext {
    pub missing_fields: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: DialogueState,
    pub to: DialogueState,
    pub event: DialogueEvent,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    UserCancelled,
    TranslationFailed(String),
    Execution(ExecutionError),
}

impl FailureReason {
    pub fn describe(&self) -> String {
        match self {
            Self::UserCancelled => "cancelled by user".to_string(),
            Self::TranslationFailed(detail) => {
                format!("could not understand the request: {detail}")
            }
            Self::Execution(error) => format!("execution failed: {error}"),
        }
    }
}

/// What the prompt sink receives whenever a field starts being awaited.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPrompt {
    pub operation_id: String,
    pub entity_type: String,
    pub field_name: String,
    pub prompt_text: String,
    /// Set when a value for this field was offered up front and rejected.
    pub retry_reason: Option<String>,
    /// Fields still missing, this one included.
    pub remaining: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRejection {
    pub field: String,
    pub value: String,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub operation_id: String,
    pub entity_type: String,
    pub operation: OperationKind,
    pub collected_fields: FieldMap,
    pub missing_fields: Vec<String>,
    /// Supplied values outside the required set, dispatched alongside the collected fields.
    pub supplementary_fields: FieldMap,
    pub state: DialogueState,
    /// Latest rejected value per field, shown as the retry reason when the field is asked.
    pub rejections: Vec<FieldRejection>,
    required: Vec<FieldSpec>,
}

impl PendingOperation {
    pub(crate) fn intake(
        operation_id: String,
        entity_type: String,
        operation: OperationKind,
        required: Vec<FieldSpec>,
    ) -> Self {
        Self {
            operation_id,
            entity_type,
            operation,
            collected_fields: FieldMap::new(),
            missing_fields: Vec::new(),
            supplementary_fields: FieldMap::new(),
            state: DialogueState::Intake,
            rejections: Vec::new(),
            required,
        }
    }

    pub fn required_fields(&self) -> &[FieldSpec] {
        &self.required
    }

    pub fn awaited_field(&self) -> Option<&str> {
        match self.state {
            DialogueState::AwaitingField => self.missing_fields.first().map(String::as_str),
            _ => None,
        }
    }

    pub(crate) fn spec(&self, field: &str) -> Option<&FieldSpec> {
        self.required.iter().find(|spec| spec.name == field)
    }

    pub(crate) fn next_prompt(&self) -> Option<FieldPrompt> {
        let field = self.awaited_field()?;
        let spec = self.spec(field)?;
        let retry_reason = self
            .rejections
            .iter()
            .find(|rejection| rejection.field == field)
            .map(|rejection| rejection.reason.clone());

        Some(FieldPrompt {
            operation_id: self.operation_id.clone(),
            entity_type: self.entity_type.clone(),
            field_name: field.to_string(),
            prompt_text: spec.prompt_text(),
            retry_reason,
            remaining: self.missing_fields.len(),
        })
    }

    pub(crate) fn record_rejection(&mut self, rejection: FieldRejection) {
        self.rejections.retain(|earlier| earlier.field != rejection.field);
        self.rejections.push(rejection);
    }

    pub fn dispatch_fields(&self) -> FieldMap {
        let mut fields = self.supplementary_fields.clone();
        fields.extend(self.collected_fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        fields
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotOutcome {
    AwaitingField(FieldPrompt),
    Ready,
}

/// Proof that an operation reached `Completed`; only the engine can build one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CompletedOperation {
    operation_id: String,
    entity_type: String,
    operation: OperationKind,
    fields: FieldMap,
    output: ExecutionOutput,
    completed_at: DateTime<Utc>,
}

impl CompletedOperation {
    pub(crate) fn new(pending: PendingOperation, output: ExecutionOutput) -> Self {
        let fields = pending.dispatch_fields();
        Self {
            operation_id: pending.operation_id,
            entity_type: pending.entity_type,
            operation: pending.operation,
            fields,
            output,
            completed_at: Utc::now(),
        }
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn output(&self) -> &ExecutionOutput {
        &self.output
    }

    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedOperation {
    pub operation_id: String,
    pub entity_type: String,
    pub operation: OperationKind,
    pub collected_fields: FieldMap,
    pub reason: FailureReason,
}

impl FailedOperation {
    pub(crate) fn new(pending: PendingOperation, reason: FailureReason) -> Self {
        Self {
            operation_id: pending.operation_id,
            entity_type: pending.entity_type,
            operation: pending.operation,
            collected_fields: pending.collected_fields,
            reason,
        }
    }
}
