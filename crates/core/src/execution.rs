//! Port to whatever actually runs a structured request against storage.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{FieldMap, OperationKind};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionOutput {
    RecordSet(Vec<FieldMap>),
    RowCount(u64),
}

impl ExecutionOutput {
    pub fn describe(&self) -> String {
        match self {
            Self::RecordSet(rows) if rows.len() == 1 => "1 record returned".to_string(),
            Self::RecordSet(rows) => format!("{} records returned", rows.len()),
            Self::RowCount(1) => "1 row affected".to_string(),
            Self::RowCount(count) => format!("{count} rows affected"),
        }
    }
}

/// Executor failure detail, carried to the caller unchanged.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message} ({code})")]
pub struct ExecutionError {
    pub code: String,
    pub message: String,
}

impl ExecutionError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into() }
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        entity_type: &str,
        operation: OperationKind,
        fields: &FieldMap,
    ) -> Result<ExecutionOutput, ExecutionError>;
}
