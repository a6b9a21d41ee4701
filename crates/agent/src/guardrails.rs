use tabletalk_core::domain::{EntitySchema, FieldSpec, OperationKind};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    /// Proceed, collecting `slot_plan` before dispatch.
    Allow { slot_plan: Vec<FieldSpec> },
    Deny { reason_code: &'static str, user_message: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub deletes_enabled: bool,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self { deletes_enabled: true }
    }
}

impl GuardrailPolicy {
    pub fn evaluate(&self, operation: OperationKind, schema: &EntitySchema) -> GuardrailDecision {
        match operation {
            OperationKind::Create => {
                GuardrailDecision::Allow { slot_plan: schema.required_fields() }
            }
            OperationKind::Read => GuardrailDecision::Allow { slot_plan: Vec::new() },
            OperationKind::Delete if !self.deletes_enabled => GuardrailDecision::Deny {
                reason_code: "deletes_disabled",
                user_message: format!(
                    "Deleting {} records is disabled in this session.",
                    schema.name
                ),
            },
            OperationKind::Update | OperationKind::Delete => {
                let identifying = schema.identifying_fields();
                if identifying.is_empty() {
                    return GuardrailDecision::Deny {
                        reason_code: "no_identifying_fields",
                        user_message: format!(
                            "I cannot {operation} {} records because none of its fields \
                             identify a single record.",
                            schema.name
                        ),
                    };
                }
                GuardrailDecision::Allow { slot_plan: identifying }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tabletalk_core::domain::{EntitySchema, FieldSpec, FieldValidator, OperationKind};
    use tabletalk_core::schema::{SchemaProvider, StaticSchemaProvider};

    use super::{GuardrailDecision, GuardrailPolicy};

    fn plan_names(decision: GuardrailDecision) -> Vec<String> {
        match decision {
            GuardrailDecision::Allow { slot_plan } => {
                slot_plan.into_iter().map(|field| field.name).collect()
            }
            GuardrailDecision::Deny { reason_code, .. } => vec![format!("denied:{reason_code}")],
        }
    }

    #[test]
    fn slot_plan_depends_on_operation() {
        let schemas = StaticSchemaProvider::builtin();
        let employee = schemas.schema_for("employee").expect("builtin employee");
        let policy = GuardrailPolicy::default();

        assert_eq!(
            plan_names(policy.evaluate(OperationKind::Create, employee)),
            vec!["name", "department", "salary"]
        );
        assert!(plan_names(policy.evaluate(OperationKind::Read, employee)).is_empty());
        assert_eq!(plan_names(policy.evaluate(OperationKind::Update, employee)), vec!["name"]);
        assert_eq!(plan_names(policy.evaluate(OperationKind::Delete, employee)), vec!["name"]);
    }

    #[test]
    fn disabled_deletes_are_denied() {
        let schemas = StaticSchemaProvider::builtin();
        let project = schemas.schema_for("project").expect("builtin project");
        let policy = GuardrailPolicy { deletes_enabled: false };

        let decision = policy.evaluate(OperationKind::Delete, project);
        let (reason_code, user_message) = match decision {
            GuardrailDecision::Deny { reason_code, user_message } => (reason_code, user_message),
            GuardrailDecision::Allow { .. } => ("", String::new()),
        };

        assert_eq!(reason_code, "deletes_disabled");
        assert!(user_message.contains("project"));
        assert_eq!(plan_names(policy.evaluate(OperationKind::Update, project)), vec!["name"]);
    }

    #[test]
    fn entity_without_identifying_fields_cannot_be_changed() {
        let log = EntitySchema::new(
            "audit_log",
            vec![FieldSpec::new("message", FieldValidator::text(200)).required()],
        );
        let policy = GuardrailPolicy::default();

        assert_eq!(
            plan_names(policy.evaluate(OperationKind::Update, &log)),
            vec!["denied:no_identifying_fields"]
        );
        assert_eq!(plan_names(policy.evaluate(OperationKind::Create, &log)), vec!["message"]);
    }
}
