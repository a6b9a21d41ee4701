use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tabletalk_core::domain::{FieldMap, OperationKind};
use tabletalk_core::execution::{ExecutionError, ExecutionOutput, Executor};
use tabletalk_core::schema::SchemaProvider;
use tracing::info;

#[derive(Debug, Default)]
struct Table {
    next_id: u64,
    rows: Vec<FieldMap>,
}

/// Keeps rows per entity in memory. Stands in for a database in the CLI and in tests.
pub struct InMemoryExecutor {
    schemas: Arc<dyn SchemaProvider>,
    tables: Mutex<BTreeMap<String, Table>>,
}

impl InMemoryExecutor {
    pub fn new(schemas: Arc<dyn SchemaProvider>) -> Self {
        Self { schemas, tables: Mutex::new(BTreeMap::new()) }
    }

    pub fn rows(&self, entity_type: &str) -> Vec<FieldMap> {
        self.lock().get(entity_type).map(|table| table.rows.clone()).unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Table>> {
        match self.tables.lock() {
            Ok(tables) => tables,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn identifying_names(&self, entity_type: &str) -> Vec<String> {
        self.schemas
            .identifying_fields_for(entity_type)
            .into_iter()
            .map(|field| field.name)
            .collect()
    }
}

fn same_value(left: &str, right: &str) -> bool {
    left.trim().eq_ignore_ascii_case(right.trim())
}

fn matches_all(row: &FieldMap, filters: &FieldMap) -> bool {
    filters
        .iter()
        .all(|(field, value)| row.get(field).is_some_and(|stored| same_value(stored, value)))
}

fn key_of(fields: &FieldMap, identifying: &[String]) -> Result<FieldMap, ExecutionError> {
    let mut key = FieldMap::new();
    for name in identifying {
        let Some(value) = fields.get(name) else {
            return Err(ExecutionError::new(
                "missing_identifier",
                format!("`{name}` is required to identify the record"),
            ));
        };
        key.insert(name.clone(), value.clone());
    }
    Ok(key)
}

#[async_trait]
impl Executor for InMemoryExecutor {
    async fn execute(
        &self,
        entity_type: &str,
        operation: OperationKind,
        fields: &FieldMap,
    ) -> Result<ExecutionOutput, ExecutionError> {
        if self.schemas.schema_for(entity_type).is_none() {
            return Err(ExecutionError::new(
                "unknown_entity",
                format!("no table is defined for `{entity_type}`"),
            ));
        }
        let identifying = self.identifying_names(entity_type);
        let mut tables = self.lock();
        let table = tables.entry(entity_type.to_string()).or_default();

        let output = match operation {
            OperationKind::Create => {
                if !identifying.is_empty() {
                    let key = key_of(fields, &identifying)?;
                    if table.rows.iter().any(|row| matches_all(row, &key)) {
                        let described = key
                            .iter()
                            .map(|(field, value)| format!("{field} '{value}'"))
                            .collect::<Vec<_>>()
                            .join(", ");
                        return Err(ExecutionError::new(
                            "duplicate_record",
                            format!("a {entity_type} with {described} already exists"),
                        ));
                    }
                }
                table.next_id += 1;
                let mut row = fields.clone();
                row.insert("id".to_string(), table.next_id.to_string());
                table.rows.push(row);
                ExecutionOutput::RowCount(1)
            }
            OperationKind::Read => ExecutionOutput::RecordSet(
                table.rows.iter().filter(|row| matches_all(row, fields)).cloned().collect(),
            ),
            OperationKind::Update => {
                let key = key_of(fields, &identifying)?;
                let mut updated = 0;
                for row in table.rows.iter_mut().filter(|row| matches_all(row, &key)) {
                    for (field, value) in fields {
                        row.insert(field.clone(), value.clone());
                    }
                    updated += 1;
                }
                if updated == 0 {
                    return Err(ExecutionError::new(
                        "not_found",
                        format!("no {entity_type} record matches {key:?}"),
                    ));
                }
                ExecutionOutput::RowCount(updated)
            }
            OperationKind::Delete => {
                let key = key_of(fields, &identifying)?;
                let before = table.rows.len();
                table.rows.retain(|row| !matches_all(row, &key));
                let removed = (before - table.rows.len()) as u64;
                if removed == 0 {
                    return Err(ExecutionError::new(
                        "not_found",
                        format!("no {entity_type} record matches {key:?}"),
                    ));
                }
                ExecutionOutput::RowCount(removed)
            }
        };

        info!(
            event_name = "executor.operation_applied",
            entity_type = %entity_type,
            operation = %operation,
            result = %output.describe(),
            "in-memory operation applied"
        );
        Ok(output)
    }
}
