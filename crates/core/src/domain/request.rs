use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Field values travel as text; validators normalise them but never reinterpret units.
pub type FieldMap = BTreeMap<String, String>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Read,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn is_query(&self) -> bool {
        matches!(self, Self::Read)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown operation `{0}` (expected create|read|update|delete)")]
pub struct UnknownOperation(pub String);

impl FromStr for OperationKind {
    type Err = UnknownOperation;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "create" | "insert" | "add" => Ok(Self::Create),
            "read" | "select" | "show" | "query" => Ok(Self::Read),
            "update" | "modify" => Ok(Self::Update),
            "delete" | "remove" => Ok(Self::Delete),
            other => Err(UnknownOperation(other.to_string())),
        }
    }
}

/// Anaphoric markers a translator may attach to a request.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "field", rename_all = "snake_case")]
pub enum Reference {
    /// "that record", "the one I just added"
    ThatRecord,
    /// "same department": reuse the last value of the named field.
    SameScope(String),
    /// Implicit entity: an operation that names no entity at all.
    LastEntity,
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ThatRecord => f.write_str("that record"),
            Self::SameScope(field) => write!(f, "same {field}"),
            Self::LastEntity => f.write_str("last entity"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRequest {
    #[serde(default)]
    pub entity_type: Option<String>,
    pub operation: OperationKind,
    #[serde(default)]
    pub fields: FieldMap,
    #[serde(default)]
    pub references: Vec<Reference>,
}

impl CandidateRequest {
    pub fn new(entity_type: impl Into<String>, operation: OperationKind) -> Self {
        Self {
            entity_type: Some(entity_type.into()),
            operation,
            fields: FieldMap::new(),
            references: Vec::new(),
        }
    }

    pub fn unscoped(operation: OperationKind) -> Self {
        Self { entity_type: None, operation, fields: FieldMap::new(), references: Vec::new() }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.references.push(reference);
        self
    }
}

/// A request with its entity type settled, ready for slot filling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub entity_type: String,
    pub operation: OperationKind,
    pub fields: FieldMap,
}

#[cfg(test)]
mod tests {
    use super::{CandidateRequest, OperationKind, Reference, UnknownOperation};

    #[test]
    fn operation_aliases_parse_to_crud_kinds() {
        assert_eq!("insert".parse::<OperationKind>(), Ok(OperationKind::Create));
        assert_eq!(" SELECT ".parse::<OperationKind>(), Ok(OperationKind::Read));
        assert_eq!("modify".parse::<OperationKind>(), Ok(OperationKind::Update));
        assert_eq!("remove".parse::<OperationKind>(), Ok(OperationKind::Delete));
        assert!("merge".parse::<OperationKind>().is_err());
    }

    #[test]
    fn unknown_operation_names_the_accepted_verbs() {
        let error = "Merge".parse::<OperationKind>().expect_err("merge is not a crud verb");
        assert_eq!(error, UnknownOperation("merge".to_string()));
        assert_eq!(
            error.to_string(),
            "unknown operation `merge` (expected create|read|update|delete)"
        );
    }

    #[test]
    fn candidate_request_deserializes_from_translator_json() {
        let request: CandidateRequest = serde_json::from_str(
            r#"{
                "entity_type": "employee",
                "operation": "read",
                "references": [{"kind": "same_scope", "field": "department"}]
            }"#,
        )
        .expect("valid candidate json");

        assert_eq!(request.entity_type.as_deref(), Some("employee"));
        assert_eq!(request.operation, OperationKind::Read);
        assert!(request.fields.is_empty());
        assert_eq!(request.references, vec![Reference::SameScope("department".to_string())]);
    }

    #[test]
    fn unit_references_deserialize_without_field() {
        let request: CandidateRequest = serde_json::from_str(
            r#"{"operation": "read", "references": [{"kind": "that_record"}]}"#,
        )
        .expect("valid candidate json");

        assert_eq!(request.entity_type, None);
        assert_eq!(request.references, vec![Reference::ThatRecord]);
    }
}
