//! Rewrites anaphoric candidate requests into fully scoped ones using conversation context.

use tracing::{debug, info};

use crate::context::ConversationContext;
use crate::domain::{CandidateRequest, FieldMap, OperationRequest, Reference};
use crate::errors::DialogueError;
use crate::schema::SchemaProvider;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnresolvedReference {
    pub reference: Reference,
    pub reason: DialogueError,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub request: OperationRequest,
    /// Field names filled from context rather than supplied by the user.
    pub inferred_fields: Vec<String>,
    pub unresolved: Vec<UnresolvedReference>,
}

impl Resolution {
    /// Fields named by unresolved `SameScope` references; these still have to be asked for.
    pub fn unresolved_scope_fields(&self) -> Vec<String> {
        self.unresolved
            .iter()
            .filter_map(|unresolved| match &unresolved.reference {
                Reference::SameScope(field) if !self.request.fields.contains_key(field) => {
                    Some(field.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub fn is_fully_resolved(&self) -> bool {
        self.unresolved.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ReferenceResolver;

impl ReferenceResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(
        &self,
        context: &ConversationContext,
        schemas: &dyn SchemaProvider,
        request: CandidateRequest,
    ) -> Result<Resolution, DialogueError> {
        let CandidateRequest { entity_type, operation, mut fields, references } = request;
        let mut entity_type = match entity_type {
            Some(raw) => Some(
                schemas.normalize_entity(&raw).ok_or(DialogueError::UnknownEntity(raw))?,
            ),
            None => None,
        };
        let mut inferred_fields = Vec::new();
        let mut unresolved = Vec::new();

        for reference in references {
            let outcome = match &reference {
                Reference::SameScope(field) => {
                    resolve_same_scope(context, field, &mut fields, &mut inferred_fields)
                }
                Reference::ThatRecord | Reference::LastEntity => resolve_record(
                    context,
                    schemas,
                    &reference,
                    &mut entity_type,
                    &mut fields,
                    &mut inferred_fields,
                ),
            };
            if let Err(reason) = outcome {
                debug!(
                    event_name = "resolver.reference_unresolved",
                    reference = %reference,
                    reason = %reason,
                    "reference left unresolved"
                );
                unresolved.push(UnresolvedReference { reference, reason });
            }
        }

        let Some(entity_type) = entity_type else {
            return Err(DialogueError::NoContextAvailable {
                reference: "the entity type".to_string(),
            });
        };

        info!(
            event_name = "resolver.request_resolved",
            entity_type = %entity_type,
            operation = %operation,
            inferred = ?inferred_fields,
            unresolved = unresolved.len(),
            "candidate request resolved"
        );
        Ok(Resolution {
            request: OperationRequest { entity_type, operation, fields },
            inferred_fields,
            unresolved,
        })
    }
}

fn resolve_same_scope(
    context: &ConversationContext,
    field: &str,
    fields: &mut FieldMap,
    inferred: &mut Vec<String>,
) -> Result<(), DialogueError> {
    if fields.contains_key(field) {
        return Ok(());
    }
    let no_context =
        || DialogueError::NoContextAvailable { reference: format!("same {field}") };
    if context.last_operation().is_none() {
        return Err(no_context());
    }
    let value = context.last_values().get(field).ok_or_else(no_context)?;

    fields.insert(field.to_string(), value.clone());
    inferred.push(field.to_string());
    Ok(())
}

fn resolve_record(
    context: &ConversationContext,
    schemas: &dyn SchemaProvider,
    reference: &Reference,
    entity_type: &mut Option<String>,
    fields: &mut FieldMap,
    inferred: &mut Vec<String>,
) -> Result<(), DialogueError> {
    let no_context = || DialogueError::NoContextAvailable { reference: reference.to_string() };
    let last_entity = context.last_entity_type().ok_or_else(no_context)?;

    if let Some(explicit) = entity_type.as_deref() {
        if explicit != last_entity {
            return Err(no_context());
        }
    } else {
        *entity_type = Some(last_entity.to_string());
    }

    for spec in schemas.identifying_fields_for(last_entity) {
        if fields.contains_key(&spec.name) {
            continue;
        }
        if let Some(value) = context.last_values().get(&spec.name) {
            fields.insert(spec.name.clone(), value.clone());
            inferred.push(spec.name);
        }
    }
    Ok(())
}
