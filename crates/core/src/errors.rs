use thiserror::Error;

use crate::execution::ExecutionError;
use crate::flows::{DialogueState, FailureReason};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DialogueError {
    #[error("value for `{field}` was rejected: {reason}")]
    ValidationFailed { field: String, reason: String },
    #[error("no conversation context available to resolve {reference}")]
    NoContextAvailable { reference: String },
    #[error("an operation on `{entity_type}` is already in progress ({state:?})")]
    ConflictingOperation { entity_type: String, state: DialogueState },
    #[error("translation failed: {0}")]
    TranslationFailed(String),
    #[error("execution failed: {0}")]
    Execution(#[from] ExecutionError),
    #[error("`{action}` is not valid in state {state:?}")]
    InvalidState { state: Option<DialogueState>, action: &'static str },
    #[error("unknown entity type `{0}`")]
    UnknownEntity(String),
}

impl DialogueError {
    /// `InvalidState` is API misuse; everything else is recoverable inside the session.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, Self::InvalidState { .. })
    }

    /// Collaborator failures end the operation in `FAILED`; other errors keep the dialogue going.
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Self::TranslationFailed(detail) => {
                Some(FailureReason::TranslationFailed(detail.clone()))
            }
            Self::Execution(error) => Some(FailureReason::Execution(error.clone())),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Dialogue(#[from] DialogueError),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::ServiceUnavailable { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Dialogue(
                error @ (DialogueError::ValidationFailed { .. }
                | DialogueError::NoContextAvailable { .. }
                | DialogueError::ConflictingOperation { .. }
                | DialogueError::UnknownEntity(_)),
            ) => Self::BadRequest { message: error.to_string(), correlation_id },
            ApplicationError::Dialogue(
                error @ (DialogueError::TranslationFailed(_) | DialogueError::Execution(_)),
            ) => Self::ServiceUnavailable { message: error.to_string(), correlation_id },
            ApplicationError::Dialogue(error @ DialogueError::InvalidState { .. }) => {
                Self::Internal { message: error.to_string(), correlation_id }
            }
            ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}
