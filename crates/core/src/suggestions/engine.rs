//! Suggestion Engine implementation

use tracing::debug;

use super::types::*;
use super::{DEFAULT_FOLLOW_UP_LIMIT, DEFAULT_MAX_FIELD_SUGGESTIONS};
use crate::context::ConversationContext;

/// Derives suggestions from a context snapshot. Holds no state of its own, so every call
/// reflects the history as it is right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextSuggestionEngine {
    max_field_suggestions: usize,
    follow_up_limit: usize,
}

impl Default for ContextSuggestionEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FIELD_SUGGESTIONS, DEFAULT_FOLLOW_UP_LIMIT)
    }
}

impl ContextSuggestionEngine {
    pub fn new(max_field_suggestions: usize, follow_up_limit: usize) -> Self {
        Self { max_field_suggestions, follow_up_limit }
    }

    pub fn suggest(&self, context: &ConversationContext, entity_type: &str) -> SuggestionSet {
        let mut field_suggestions = context
            .value_frequencies(Some(entity_type))
            .into_iter()
            .filter_map(|(field_name, ranked)| {
                let total: usize = ranked.iter().map(|tally| tally.occurrences).sum();
                let top = ranked.into_iter().next()?;
                if total == 0 {
                    return None;
                }
                let confidence = top.occurrences as f64 / total as f64;
                Some(FieldSuggestion {
                    field_name,
                    suggested_value: top.value,
                    confidence,
                    level: ConfidenceLevel::from_score(confidence),
                    occurrences: top.occurrences,
                })
            })
            .collect::<Vec<_>>();
        field_suggestions.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then(b.occurrences.cmp(&a.occurrences))
                .then(a.field_name.cmp(&b.field_name))
        });
        field_suggestions.truncate(self.max_field_suggestions);

        let just_completed = context
            .last_operation()
            .zip(context.last_entity_type().map(str::to_string));
        let follow_up_operations = context
            .operation_frequencies()
            .into_iter()
            .filter(|(pair, _)| Some(pair) != just_completed.as_ref())
            .take(self.follow_up_limit)
            .map(|((operation, entity), occurrences)| {
                FollowUpSuggestion::new(operation, entity, occurrences)
            })
            .collect::<Vec<_>>();

        debug!(
            event_name = "suggestions.computed",
            entity_type = %entity_type,
            field_suggestions = field_suggestions.len(),
            follow_ups = follow_up_operations.len(),
            "suggestions computed from context"
        );
        SuggestionSet {
            entity_type: entity_type.to_string(),
            field_suggestions,
            follow_up_operations,
        }
    }
}
