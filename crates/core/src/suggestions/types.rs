//! Types for the Suggestion Engine

use serde::{Deserialize, Serialize};

use crate::domain::OperationKind;

/// Confidence level for a suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    /// High confidence (score >= 0.80)
    High,
    /// Medium confidence (score 0.60 - 0.79)
    Medium,
    /// Low confidence (score below 0.60)
    Low,
}

impl ConfidenceLevel {
    /// Get confidence level from score
    pub fn from_score(score: f64) -> Self {
        if score >= 0.80 {
            ConfidenceLevel::High
        } else if score >= 0.60 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }

    /// Get display percentage
    pub fn display_percentage(&self, score: f64) -> String {
        format!("{:.0}% of past values", score * 100.0)
    }
}

/// A likely value for one field of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSuggestion {
    pub field_name: String,
    pub suggested_value: String,
    /// Share of past records carrying this field that used this value (0.0 - 1.0)
    pub confidence: f64,
    pub level: ConfidenceLevel,
    pub occurrences: usize,
}

/// An operation the user is likely to run next
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowUpSuggestion {
    pub operation: OperationKind,
    pub entity_type: String,
    pub occurrences: usize,
    pub description: String,
}

impl FollowUpSuggestion {
    pub fn new(
        operation: OperationKind,
        entity_type: impl Into<String>,
        occurrences: usize,
    ) -> Self {
        let entity_type = entity_type.into();
        let description = match operation {
            OperationKind::Create => format!("Add another {entity_type}"),
            OperationKind::Read => format!("View {entity_type} records"),
            OperationKind::Update => format!("Update a {entity_type} record"),
            OperationKind::Delete => format!("Remove a {entity_type} record"),
        };
        Self { operation, entity_type, occurrences, description }
    }
}

/// Everything `suggest` returns for one entity type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuggestionSet {
    pub entity_type: String,
    pub field_suggestions: Vec<FieldSuggestion>,
    pub follow_up_operations: Vec<FollowUpSuggestion>,
}

impl SuggestionSet {
    pub fn is_empty(&self) -> bool {
        self.field_suggestions.is_empty() && self.follow_up_operations.is_empty()
    }

    pub fn suggestion_for(&self, field_name: &str) -> Option<&FieldSuggestion> {
        self.field_suggestions.iter().find(|suggestion| suggestion.field_name == field_name)
    }
}
