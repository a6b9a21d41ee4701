use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Declared type/format of a field, checked before a value is accepted into a slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldValidator {
    Text {
        #[serde(default = "default_max_len")]
        max_len: usize,
    },
    Number {
        #[serde(default)]
        min: Decimal,
    },
    Date,
}

fn default_max_len() -> usize {
    100
}

impl FieldValidator {
    pub fn text(max_len: usize) -> Self {
        Self::Text { max_len }
    }

    pub fn non_negative_number() -> Self {
        Self::Number { min: Decimal::ZERO }
    }

    /// Returns the normalised value, or a human-readable rejection reason.
    pub fn validate(&self, field: &str, raw: &str) -> Result<String, String> {
        let value = raw.trim();
        if value.is_empty() {
            return Err(format!("{field} is required and cannot be empty"));
        }

        match self {
            Self::Text { max_len } => {
                let length = value.chars().count();
                if length > *max_len {
                    return Err(format!(
                        "{field} must be at most {max_len} characters (got {length})"
                    ));
                }
            }
            Self::Number { min } => {
                let number = value
                    .parse::<Decimal>()
                    .map_err(|_| format!("{field} must be a number (numbers only)"))?;
                if number < *min {
                    return Err(format!("{field} must be greater than or equal to {min}"));
                }
            }
            Self::Date => {
                NaiveDate::parse_from_str(value, "%Y-%m-%d")
                    .map_err(|_| format!("{field} must be in YYYY-MM-DD format"))?;
            }
        }

        Ok(value.to_string())
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Number { .. } => "number",
            Self::Date => "date (YYYY-MM-DD)",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub validator: FieldValidator,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub identifying: bool,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, validator: FieldValidator) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            validator,
            required: false,
            identifying: false,
        }
    }

    /// Fallback spec for a field the schema does not declare.
    pub fn free_text(name: impl Into<String>) -> Self {
        Self::new(name, FieldValidator::text(default_max_len())).required()
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn identifying(mut self) -> Self {
        self.identifying = true;
        self
    }

    pub fn validate(&self, raw: &str) -> Result<String, String> {
        self.validator.validate(&self.name, raw)
    }

    pub fn prompt_text(&self) -> String {
        let description = if self.description.trim().is_empty() {
            format!("Value for {}", self.name)
        } else {
            self.description.clone()
        };
        format!("Please provide a value for '{}': {description}", self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub fields: Vec<FieldSpec>,
}

impl EntitySchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self { name: name.into(), aliases: Vec::new(), fields }
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|alias| (*alias).to_string()).collect();
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Required fields in declaration order.
    pub fn required_fields(&self) -> Vec<FieldSpec> {
        self.fields.iter().filter(|field| field.required).cloned().collect()
    }

    pub fn identifying_fields(&self) -> Vec<FieldSpec> {
        self.fields.iter().filter(|field| field.identifying).cloned().collect()
    }

    pub fn summary_line(&self) -> String {
        let columns = self
            .fields
            .iter()
            .map(|field| {
                let mut markers = Vec::new();
                if field.required {
                    markers.push("required");
                }
                if field.identifying {
                    markers.push("identifying");
                }
                let kind = field.validator.describe();
                if markers.is_empty() {
                    format!("{}: {kind}", field.name)
                } else {
                    format!("{}: {kind} [{}]", field.name, markers.join(", "))
                }
            })
            .collect::<Vec<_>>();
        format!("- {} (fields: {})", self.name, columns.join("; "))
    }
}
