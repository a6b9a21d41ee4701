//! Per-session conversation memory and the single path that writes to it.

pub mod store;
pub mod updater;

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{FieldMap, OperationKind};

pub use store::ContextStore;
pub use updater::ContextUpdater;

pub const OPERATION_HISTORY_LIMIT: usize = 50;
pub const RECENT_REQUEST_LIMIT: usize = 20;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub operation: OperationKind,
    pub entity_type: String,
    pub fields: FieldMap,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub entity_type: String,
    pub filters: FieldMap,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueFrequency {
    pub value: String,
    pub occurrences: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPatterns {
    /// Values per field, most frequent first; ties go to the most recently used.
    pub preferred_values: BTreeMap<String, Vec<String>>,
    pub frequent_operations: Vec<OperationKind>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationContext {
    last_operation: Option<OperationKind>,
    last_entity_type: Option<String>,
    last_values: FieldMap,
    operation_history: VecDeque<OperationRecord>,
    entity_usage_count: BTreeMap<String, u64>,
    recent_requests: VecDeque<RequestRecord>,
}

impl ConversationContext {
    pub fn last_operation(&self) -> Option<OperationKind> {
        self.last_operation
    }

    pub fn last_entity_type(&self) -> Option<&str> {
        self.last_entity_type.as_deref()
    }

    pub fn last_values(&self) -> &FieldMap {
        &self.last_values
    }

    pub fn operation_history(&self) -> impl ExactSizeIterator<Item = &OperationRecord> {
        self.operation_history.iter()
    }

    pub fn entity_usage_count(&self) -> &BTreeMap<String, u64> {
        &self.entity_usage_count
    }

    pub fn usage_of(&self, entity_type: &str) -> u64 {
        self.entity_usage_count.get(entity_type).copied().unwrap_or_default()
    }

    pub fn recent_requests(&self) -> impl ExactSizeIterator<Item = &RequestRecord> {
        self.recent_requests.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.operation_history.is_empty() && self.last_operation.is_none()
    }

    pub fn user_patterns(&self) -> UserPatterns {
        let preferred_values = self
            .value_frequencies(None)
            .into_iter()
            .map(|(field, ranked)| (field, ranked.into_iter().map(|tally| tally.value).collect()))
            .collect();

        let frequent_operations = rank_by_frequency(
            self.operation_history.iter().map(|record| record.operation),
        )
        .into_iter()
        .map(|(operation, _)| operation)
        .collect();

        UserPatterns { preferred_values, frequent_operations }
    }

    /// Value frequencies per field, optionally restricted to one entity type.
    pub fn value_frequencies(
        &self,
        entity_type: Option<&str>,
    ) -> BTreeMap<String, Vec<ValueFrequency>> {
        let mut per_field: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for record in self
            .operation_history
            .iter()
            .filter(|record| entity_type.map_or(true, |entity| record.entity_type == entity))
        {
            for (field, value) in &record.fields {
                per_field.entry(field.as_str()).or_default().push(value.as_str());
            }
        }

        per_field
            .into_iter()
            .map(|(field, values)| {
                let ranked = rank_by_frequency(values.into_iter())
                    .into_iter()
                    .map(|(value, occurrences)| ValueFrequency {
                        value: value.to_string(),
                        occurrences,
                    })
                    .collect();
                (field.to_string(), ranked)
            })
            .collect()
    }

    /// `(operation, entity_type)` pairs, most frequent first; ties go to the most recent.
    pub fn operation_frequencies(&self) -> Vec<((OperationKind, String), usize)> {
        rank_by_frequency(
            self.operation_history
                .iter()
                .map(|record| (record.operation, record.entity_type.clone())),
        )
    }

    pub(crate) fn record(&mut self, record: OperationRecord) {
        if record.operation.is_query() {
            self.recent_requests.push_back(RequestRecord {
                entity_type: record.entity_type.clone(),
                filters: record.fields.clone(),
                timestamp: record.timestamp,
            });
        }

        *self.entity_usage_count.entry(record.entity_type.clone()).or_insert(0) += 1;
        self.last_operation = Some(record.operation);
        self.last_entity_type = Some(record.entity_type.clone());
        self.last_values = record.fields.clone();

        self.operation_history.push_back(record);
        self.enforce_limits();
    }

    pub(crate) fn enforce_limits(&mut self) {
        while self.operation_history.len() > OPERATION_HISTORY_LIMIT {
            self.operation_history.pop_front();
        }
        while self.recent_requests.len() > RECENT_REQUEST_LIMIT {
            self.recent_requests.pop_front();
        }
    }
}

fn rank_by_frequency<T: Ord + Clone>(items: impl Iterator<Item = T>) -> Vec<(T, usize)> {
    // (count, index of most recent occurrence)
    let mut tallies: BTreeMap<T, (usize, usize)> = BTreeMap::new();
    for (index, item) in items.enumerate() {
        let tally = tallies.entry(item).or_insert((0, index));
        tally.0 += 1;
        tally.1 = index;
    }

    let mut ranked = tallies.into_iter().collect::<Vec<_>>();
    ranked.sort_by(|(_, (count_a, last_a)), (_, (count_b, last_b))| {
        count_b.cmp(count_a).then(last_b.cmp(last_a))
    });
    ranked.into_iter().map(|(item, (count, _))| (item, count)).collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{ConversationContext, OperationRecord};
    use crate::domain::{FieldMap, OperationKind};

    fn record(operation: OperationKind, entity: &str, fields: &[(&str, &str)]) -> OperationRecord {
        OperationRecord {
            operation,
            entity_type: entity.to_string(),
            fields: fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn empty_context_has_no_patterns() {
        let context = ConversationContext::default();

        assert!(context.is_empty());
        assert_eq!(context.last_values(), &FieldMap::new());
        let patterns = context.user_patterns();
        assert!(patterns.preferred_values.is_empty());
        assert!(patterns.frequent_operations.is_empty());
    }

    #[test]
    fn preferred_values_rank_by_frequency_then_recency() {
        let mut context = ConversationContext::default();
        context.record(record(OperationKind::Create, "employee", &[("department", "Sales")]));
        context.record(record(OperationKind::Create, "employee", &[("department", "HR")]));
        context.record(record(OperationKind::Read, "employee", &[("department", "Sales")]));
        context.record(record(OperationKind::Read, "project", &[("department", "Ops")]));

        let patterns = context.user_patterns();
        assert_eq!(
            patterns.preferred_values.get("department").cloned().unwrap_or_default(),
            vec!["Sales", "Ops", "HR"]
        );
        assert_eq!(
            patterns.frequent_operations,
            vec![OperationKind::Read, OperationKind::Create]
        );

        let employee_only = context.value_frequencies(Some("employee"));
        let department = employee_only.get("department").cloned().unwrap_or_default();
        assert_eq!(department.len(), 2);
        assert_eq!(department[0].value, "Sales");
        assert_eq!(department[0].occurrences, 2);
    }
}
