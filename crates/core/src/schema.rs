use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::domain::{EntitySchema, FieldSpec, FieldValidator};

/// Source of entity field definitions. Schema introspection itself lives outside this crate.
pub trait SchemaProvider: Send + Sync {
    fn schema_for(&self, entity_type: &str) -> Option<&EntitySchema>;

    fn entity_types(&self) -> Vec<String>;

    /// Folds plurals and aliases onto a canonical entity name.
    fn normalize_entity(&self, raw: &str) -> Option<String>;

    fn required_fields_for(&self, entity_type: &str) -> Vec<FieldSpec> {
        self.schema_for(entity_type).map(EntitySchema::required_fields).unwrap_or_default()
    }

    fn identifying_fields_for(&self, entity_type: &str) -> Vec<FieldSpec> {
        self.schema_for(entity_type).map(EntitySchema::identifying_fields).unwrap_or_default()
    }

    fn schema_summary(&self) -> String {
        self.entity_types()
            .iter()
            .filter_map(|name| self.schema_for(name))
            .map(EntitySchema::summary_line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("could not read schema file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse schema document: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("schema is invalid: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Default)]
pub struct StaticSchemaProvider {
    entities: BTreeMap<String, EntitySchema>,
    aliases: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SchemaDocument {
    entities: Vec<EntitySchema>,
}

impl StaticSchemaProvider {
    pub fn new(schemas: Vec<EntitySchema>) -> Result<Self, SchemaError> {
        let mut provider = Self::default();
        for schema in schemas {
            provider.insert(schema)?;
        }
        Ok(provider)
    }

    /// The `employee` and `project` tables the assistant ships with.
    pub fn builtin() -> Self {
        let mut provider = Self::default();
        for schema in [employee_schema(), project_schema()] {
            let name = schema.name.clone();
            for alias in &schema.aliases {
                provider.aliases.insert(alias.to_ascii_lowercase(), name.clone());
            }
            provider.entities.insert(name, schema);
        }
        provider
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, SchemaError> {
        let document = toml::from_str::<SchemaDocument>(raw)?;
        Self::new(document.entities)
    }

    pub fn from_path(path: &Path) -> Result<Self, SchemaError> {
        let raw = fs::read_to_string(path)
            .map_err(|source| SchemaError::ReadFile { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&raw)
    }

    fn insert(&mut self, schema: EntitySchema) -> Result<(), SchemaError> {
        let name = schema.name.trim().to_ascii_lowercase();
        if name.is_empty() {
            return Err(SchemaError::Invalid("entity name must not be empty".to_string()));
        }
        if self.entities.contains_key(&name) {
            return Err(SchemaError::Invalid(format!("entity `{name}` is declared twice")));
        }
        if schema.fields.is_empty() {
            return Err(SchemaError::Invalid(format!("entity `{name}` declares no fields")));
        }
        let mut seen = Vec::new();
        for field in &schema.fields {
            if seen.contains(&field.name) {
                return Err(SchemaError::Invalid(format!(
                    "entity `{name}` declares field `{}` twice",
                    field.name
                )));
            }
            seen.push(field.name.clone());
        }

        for alias in &schema.aliases {
            self.aliases.insert(alias.trim().to_ascii_lowercase(), name.clone());
        }
        self.entities.insert(name.clone(), EntitySchema { name, ..schema });
        Ok(())
    }
}

impl SchemaProvider for StaticSchemaProvider {
    fn schema_for(&self, entity_type: &str) -> Option<&EntitySchema> {
        self.entities.get(entity_type)
    }

    fn entity_types(&self) -> Vec<String> {
        self.entities.keys().cloned().collect()
    }

    fn normalize_entity(&self, raw: &str) -> Option<String> {
        let lowered = raw.trim().to_ascii_lowercase();
        if lowered.is_empty() {
            return None;
        }
        if self.entities.contains_key(&lowered) {
            return Some(lowered);
        }
        if let Some(canonical) = self.aliases.get(&lowered) {
            return Some(canonical.clone());
        }
        if let Some(singular) = lowered.strip_suffix('s') {
            if self.entities.contains_key(singular) {
                return Some(singular.to_string());
            }
        }
        if lowered.len() < 3 {
            return None;
        }
        self.entities
            .keys()
            .find(|name| name.contains(lowered.as_str()) || lowered.contains(name.as_str()))
            .cloned()
    }
}

fn employee_schema() -> EntitySchema {
    EntitySchema::new(
        "employee",
        vec![
            FieldSpec::new("name", FieldValidator::text(100))
                .described("Full name of the employee")
                .required()
                .identifying(),
            FieldSpec::new("department", FieldValidator::text(50))
                .described("Department name (e.g., Engineering, Sales, HR)")
                .required(),
            FieldSpec::new("salary", FieldValidator::non_negative_number())
                .described("Annual salary amount (numbers only)")
                .required(),
            FieldSpec::new("hire_date", FieldValidator::Date)
                .described("Hire date in YYYY-MM-DD format"),
        ],
    )
    .with_aliases(&["employees", "emp", "staff", "workers", "worker"])
}

fn project_schema() -> EntitySchema {
    EntitySchema::new(
        "project",
        vec![
            FieldSpec::new("name", FieldValidator::text(100))
                .described("Project name")
                .required()
                .identifying(),
            FieldSpec::new("department", FieldValidator::text(50))
                .described("Department responsible for the project")
                .required(),
            FieldSpec::new("budget", FieldValidator::non_negative_number())
                .described("Project budget amount (numbers only)")
                .required(),
            FieldSpec::new("description", FieldValidator::text(500))
                .described("Brief project description"),
            FieldSpec::new("start_date", FieldValidator::Date)
                .described("Start date in YYYY-MM-DD format"),
            FieldSpec::new("end_date", FieldValidator::Date)
                .described("End date in YYYY-MM-DD format"),
        ],
    )
    .with_aliases(&["projects", "proj", "tasks", "task"])
}
