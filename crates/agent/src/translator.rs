use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tabletalk_core::domain::{CandidateRequest, FieldMap, OperationKind, Reference};
use tabletalk_core::errors::DialogueError;
use tabletalk_core::schema::SchemaProvider;
use thiserror::Error;
use tracing::debug;

use crate::llm::{strip_code_fences, LlmClient};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TranslationError {
    #[error("the request was empty")]
    EmptyUtterance,
    #[error("could not tell which operation was meant in `{0}`")]
    NoOperation(String),
    #[error("language model call failed: {0}")]
    Llm(String),
    #[error("language model returned an unusable answer: {0}")]
    MalformedResponse(String),
}

impl From<TranslationError> for DialogueError {
    fn from(error: TranslationError) -> Self {
        DialogueError::TranslationFailed(error.to_string())
    }
}

/// Turns a user utterance into a candidate structured request.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        utterance: &str,
        schema_summary: &str,
    ) -> Result<CandidateRequest, TranslationError>;
}

const CREATE_VERBS: &[&str] = &["add", "create", "insert", "new", "hire", "register", "enroll"];
const READ_VERBS: &[&str] =
    &["show", "list", "find", "get", "view", "display", "select", "query", "search", "lookup"];
const UPDATE_VERBS: &[&str] = &["update", "change", "set", "modify", "edit"];
const DELETE_VERBS: &[&str] = &["delete", "remove", "fire", "drop"];

const CONNECTORS: &[&str] = &["is", "=", ":", "of", "to", "as", "equals", "should", "be"];
const STOP_WORDS: &[&str] = &["and", "with", "where", "set", "in", "whose", "that", "for"];
const FILLER_WORDS: &[&str] = &[
    "a", "an", "the", "all", "me", "my", "please", "record", "records", "row", "rows", "entry",
    "entries", "details", "info", "list", "every",
];
const THAT_RECORD_PHRASES: &[&str] =
    &["that record", "that one", "this record", "just added", "just created", "same record"];

/// Rule-based translator that needs no model; good enough for scripted sessions and tests.
#[derive(Clone)]
pub struct KeywordTranslator {
    schemas: Arc<dyn SchemaProvider>,
}

#[derive(Clone, Debug)]
struct Token {
    raw: String,
    lower: String,
    /// The source word ended with a comma, which closes any value in progress.
    closes_value: bool,
}

impl KeywordTranslator {
    pub fn new(schemas: Arc<dyn SchemaProvider>) -> Self {
        Self { schemas }
    }

    pub fn parse(&self, utterance: &str) -> Result<CandidateRequest, TranslationError> {
        let tokens = tokenize(utterance);
        if tokens.is_empty() {
            return Err(TranslationError::EmptyUtterance);
        }
        let known_fields = self.known_fields();
        let normalized_text = normalize_text(utterance);

        let mut consumed = vec![false; tokens.len()];
        let mut fields = FieldMap::new();
        let mut references = Vec::new();

        let mut index = 0;
        while index < tokens.len() {
            if consumed[index] {
                index += 1;
                continue;
            }
            let word = tokens[index].lower.as_str();

            if word == "same" {
                if tokens.get(index + 1).is_some_and(|next| next.lower == "record") {
                    index += 1;
                    continue;
                }
                if let Some((field, width)) = field_at(&tokens, index + 1, &known_fields) {
                    mark(&mut consumed, index, 1 + width);
                    references.push(Reference::SameScope(field));
                    index += 1 + width;
                    continue;
                }
            }

            if matches!(word, "named" | "called") {
                let (value, end) = read_value(&tokens, index + 1, &known_fields);
                if let Some(value) = value {
                    mark(&mut consumed, index, end - index);
                    fields.entry("name".to_string()).or_insert(value);
                    index = end;
                    continue;
                }
            }

            if word == "in" {
                if let Some((field, value, end)) = in_phrase(&tokens, index, &known_fields) {
                    mark(&mut consumed, index, end - index);
                    fields.entry(field).or_insert(value);
                    index = end;
                    continue;
                }
            }

            if let Some((field, value)) = inline_assignment(&tokens[index], &known_fields) {
                consumed[index] = true;
                fields.entry(field).or_insert(value);
                index += 1;
                continue;
            }

            if let Some((field, width)) = field_at(&tokens, index, &known_fields) {
                let mut start = index + width;
                while start < tokens.len() && CONNECTORS.contains(&tokens[start].lower.as_str()) {
                    start += 1;
                }
                let (value, end) = read_value(&tokens, start, &known_fields);
                if let Some(value) = value {
                    mark(&mut consumed, index, end - index);
                    fields.entry(field).or_insert(value);
                    index = end;
                    continue;
                }
            }

            index += 1;
        }

        if THAT_RECORD_PHRASES.iter().any(|phrase| normalized_text.contains(phrase)) {
            references.push(Reference::ThatRecord);
        }

        let verb = tokens
            .iter()
            .enumerate()
            .filter(|(position, _)| !consumed[*position])
            .find_map(|(position, token)| operation_for(&token.lower).map(|op| (position, op)));
        let Some((verb_index, operation)) = verb else {
            return Err(TranslationError::NoOperation(utterance.trim().to_string()));
        };
        consumed[verb_index] = true;

        let mut entity = tokens
            .iter()
            .enumerate()
            .skip(verb_index + 1)
            .filter(|(position, token)| {
                !consumed[*position]
                    && !FILLER_WORDS.contains(&token.lower.as_str())
                    && !known_fields.contains(&token.lower)
            })
            .find_map(|(position, token)| {
                self.schemas.normalize_entity(&token.lower).map(|entity| (position, entity))
            });
        if entity.is_none() {
            entity = implied_entity(&tokens[verb_index].lower)
                .and_then(|implied| self.schemas.normalize_entity(implied))
                .map(|entity| (verb_index, entity));
        }
        if let Some((position, _)) = entity.as_ref() {
            consumed[*position] = true;
        }

        let anchor = entity.as_ref().map(|(position, _)| *position).unwrap_or(verb_index);
        if let Some(entity_type) = entity.as_ref().map(|(_, entity)| entity.as_str()) {
            if let Some(identifying) = self.schemas.identifying_fields_for(entity_type).first() {
                if !fields.contains_key(&identifying.name) {
                    if let Some(value) = bare_value(&tokens, &consumed, anchor + 1, &known_fields) {
                        fields.insert(identifying.name.clone(), value);
                    }
                }
            }
        }

        let entity_type = entity.map(|(_, entity)| entity);
        if entity_type.is_none() && !references.contains(&Reference::ThatRecord) {
            references.push(Reference::LastEntity);
        }

        let request = CandidateRequest { entity_type, operation, fields, references };
        debug!(
            event_name = "translator.keyword_parsed",
            operation = %request.operation,
            entity_type = request.entity_type.as_deref().unwrap_or("none"),
            fields = ?request.fields.keys().collect::<Vec<_>>(),
            references = request.references.len(),
            "utterance parsed"
        );
        Ok(request)
    }

    fn known_fields(&self) -> BTreeSet<String> {
        self.schemas
            .entity_types()
            .iter()
            .filter_map(|entity| self.schemas.schema_for(entity))
            .flat_map(|schema| schema.fields.iter().map(|field| field.name.clone()))
            .collect()
    }
}

#[async_trait]
impl Translator for KeywordTranslator {
    async fn translate(
        &self,
        utterance: &str,
        _schema_summary: &str,
    ) -> Result<CandidateRequest, TranslationError> {
        self.parse(utterance)
    }
}

fn normalize_text(text: &str) -> String {
    text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn tokenize(text: &str) -> Vec<Token> {
    text.split_whitespace()
        .filter_map(|word| {
            let closes_value = word.ends_with(',') || word.ends_with(';');
            let raw = word.trim_end_matches(|c: char| matches!(c, ',' | ';' | '.' | '!' | '?'));
            let raw = raw.trim_matches(|c: char| matches!(c, '"' | '\'' | '(' | ')'));
            if raw.is_empty() {
                return None;
            }
            Some(Token { raw: raw.to_string(), lower: raw.to_lowercase(), closes_value })
        })
        .collect()
}

fn mark(consumed: &mut [bool], start: usize, len: usize) {
    for flag in consumed.iter_mut().skip(start).take(len) {
        *flag = true;
    }
}

fn operation_for(word: &str) -> Option<OperationKind> {
    if CREATE_VERBS.contains(&word) {
        Some(OperationKind::Create)
    } else if READ_VERBS.contains(&word) {
        Some(OperationKind::Read)
    } else if UPDATE_VERBS.contains(&word) {
        Some(OperationKind::Update)
    } else if DELETE_VERBS.contains(&word) {
        Some(OperationKind::Delete)
    } else {
        word.parse().ok()
    }
}

fn implied_entity(verb: &str) -> Option<&'static str> {
    matches!(verb, "hire" | "fire").then_some("employee")
}

/// Field name starting at `index`, either `hire_date` or the two words `hire date`.
fn field_at(
    tokens: &[Token],
    index: usize,
    known_fields: &BTreeSet<String>,
) -> Option<(String, usize)> {
    let first = tokens.get(index)?;
    if let Some(second) = tokens.get(index + 1) {
        let joined = format!("{}_{}", first.lower, second.lower);
        if known_fields.contains(&joined) {
            return Some((joined, 2));
        }
    }
    known_fields.contains(&first.lower).then(|| (first.lower.clone(), 1))
}

fn is_value_boundary(tokens: &[Token], index: usize, known_fields: &BTreeSet<String>) -> bool {
    let word = tokens[index].lower.as_str();
    STOP_WORDS.contains(&word)
        || operation_for(word).is_some() && index > 0 && tokens[index - 1].closes_value
        || field_at(tokens, index, known_fields).is_some()
}

/// Reads value words from `start` up to the next boundary. Returns the value and the end index.
fn read_value(
    tokens: &[Token],
    start: usize,
    known_fields: &BTreeSet<String>,
) -> (Option<String>, usize) {
    let mut end = start;
    let mut words = Vec::new();
    while end < tokens.len() && !is_value_boundary(tokens, end, known_fields) {
        words.push(tokens[end].raw.as_str());
        end += 1;
        if tokens[end - 1].closes_value {
            break;
        }
    }
    let value = words.join(" ");
    ((!value.is_empty()).then_some(value), end)
}

/// `in Sales department`, `in the R&D department`.
fn in_phrase(
    tokens: &[Token],
    index: usize,
    known_fields: &BTreeSet<String>,
) -> Option<(String, String, usize)> {
    let mut start = index + 1;
    if tokens.get(start).is_some_and(|token| token.lower == "the") {
        start += 1;
    }
    if tokens.get(start).is_some_and(|token| token.lower == "same") {
        return None;
    }
    for field_index in (start + 1)..tokens.len().min(start + 4) {
        if let Some((field, width)) = field_at(tokens, field_index, known_fields) {
            let value = tokens[start..field_index]
                .iter()
                .map(|token| token.raw.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            return Some((field, value, field_index + width));
        }
    }
    None
}

/// `salary=75000` or `department:Sales` written as a single word.
fn inline_assignment(token: &Token, known_fields: &BTreeSet<String>) -> Option<(String, String)> {
    let (key, value) = token.raw.split_once(|c: char| c == '=' || c == ':')?;
    let key = key.trim().to_lowercase();
    let value = value.trim();
    (known_fields.contains(&key) && !value.is_empty()).then(|| (key, value.to_string()))
}

/// Unclaimed words right after the entity (or verb), e.g. `delete employee John Doe`.
fn bare_value(
    tokens: &[Token],
    consumed: &[bool],
    start: usize,
    known_fields: &BTreeSet<String>,
) -> Option<String> {
    let mut index = start;
    while index < tokens.len()
        && !consumed[index]
        && FILLER_WORDS.contains(&tokens[index].lower.as_str())
    {
        index += 1;
    }
    let mut words = Vec::new();
    while index < tokens.len()
        && !consumed[index]
        && !is_value_boundary(tokens, index, known_fields)
        && !FILLER_WORDS.contains(&tokens[index].lower.as_str())
    {
        words.push(tokens[index].raw.as_str());
        index += 1;
        if tokens[index - 1].closes_value {
            break;
        }
    }
    (!words.is_empty()).then(|| words.join(" "))
}

/// Asks a language model for a JSON request. An answer that does not parse is an error.
pub struct LlmTranslator<C> {
    client: C,
}

#[derive(Debug, Deserialize)]
struct LlmCandidate {
    #[serde(default)]
    entity_type: Option<String>,
    operation: String,
    #[serde(default)]
    fields: BTreeMap<String, Value>,
    #[serde(default)]
    references: Vec<Reference>,
}

impl<C> LlmTranslator<C>
where
    C: LlmClient,
{
    pub fn new(client: C) -> Self {
        Self { client }
    }

    fn prompt(utterance: &str, schema_summary: &str) -> String {
        format!(
            "You convert requests about a small database into JSON.\n\
             Available tables:\n{schema_summary}\n\n\
             Answer with one JSON object and nothing else, shaped like:\n\
             {{\"entity_type\": \"<table or null>\", \"operation\": \"create|read|update|delete\", \
             \"fields\": {{\"<field>\": \"<value>\"}}, \"references\": []}}\n\
             Only include field values the user stated. When the user points back at earlier \
             records use references: {{\"kind\": \"that_record\"}} for \"that record\", \
             {{\"kind\": \"same_scope\", \"field\": \"department\"}} for \"same department\", \
             {{\"kind\": \"last_entity\"}} when no table is named.\n\n\
             Request: {utterance}\n"
        )
    }

    fn parse_response(raw: &str) -> Result<CandidateRequest, TranslationError> {
        let body = strip_code_fences(raw);
        let candidate = serde_json::from_str::<LlmCandidate>(body)
            .map_err(|error| TranslationError::MalformedResponse(error.to_string()))?;
        let operation = candidate
            .operation
            .parse::<OperationKind>()
            .map_err(|error| TranslationError::MalformedResponse(error.to_string()))?;

        let fields = candidate
            .fields
            .into_iter()
            .filter_map(|(name, value)| {
                let text = match value {
                    Value::Null => return None,
                    Value::String(text) => text,
                    other => other.to_string(),
                };
                let text = text.trim().to_string();
                (!text.is_empty()).then_some((name.trim().to_lowercase(), text))
            })
            .collect();
        let entity_type = candidate
            .entity_type
            .map(|entity| entity.trim().to_string())
            .filter(|entity| !entity.is_empty() && !entity.eq_ignore_ascii_case("null"));

        Ok(CandidateRequest { entity_type, operation, fields, references: candidate.references })
    }
}

#[async_trait]
impl<C> Translator for LlmTranslator<C>
where
    C: LlmClient,
{
    async fn translate(
        &self,
        utterance: &str,
        schema_summary: &str,
    ) -> Result<CandidateRequest, TranslationError> {
        if utterance.trim().is_empty() {
            return Err(TranslationError::EmptyUtterance);
        }
        let raw = self
            .client
            .complete(&Self::prompt(utterance, schema_summary))
            .await
            .map_err(|error| TranslationError::Llm(error.to_string()))?;
        Self::parse_response(&raw)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use tabletalk_core::domain::{OperationKind, Reference};
    use tabletalk_core::errors::DialogueError;
    use tabletalk_core::schema::StaticSchemaProvider;

    use super::{KeywordTranslator, LlmTranslator, TranslationError, Translator};
    use crate::llm::LlmClient;

    fn translator() -> KeywordTranslator {
        KeywordTranslator::new(Arc::new(StaticSchemaProvider::builtin()))
    }

    fn field<'a>(
        request: &'a tabletalk_core::domain::CandidateRequest,
        name: &str,
    ) -> Option<&'a str> {
        request.fields.get(name).map(String::as_str)
    }

    #[test]
    fn create_with_named_value_keeps_original_casing() {
        let request = translator()
            .parse("Add a new employee named John Doe")
            .expect("parse should succeed");

        assert_eq!(request.operation, OperationKind::Create);
        assert_eq!(request.entity_type.as_deref(), Some("employee"));
        assert_eq!(field(&request, "name"), Some("John Doe"));
        assert!(request.references.is_empty());
    }

    #[test]
    fn field_value_phrases_are_extracted() {
        let request = translator()
            .parse(
                "add employee Jane Smith in Sales department with salary 85,000 \
                 and hire date 2024-03-01",
            )
            .expect("parse should succeed");

        assert_eq!(field(&request, "name"), Some("Jane Smith"));
        assert_eq!(field(&request, "department"), Some("Sales"));
        assert_eq!(field(&request, "salary"), Some("85,000"));
        assert_eq!(field(&request, "hire_date"), Some("2024-03-01"));
    }

    #[test]
    fn update_with_set_clause() {
        let request = translator()
            .parse("update employee named John Doe set salary to 90000")
            .expect("parse should succeed");

        assert_eq!(request.operation, OperationKind::Update);
        assert_eq!(field(&request, "name"), Some("John Doe"));
        assert_eq!(field(&request, "salary"), Some("90000"));
    }

    #[test]
    fn anaphora_becomes_references() {
        let same = translator()
            .parse("show employees in the same department")
            .expect("parse should succeed");
        assert_eq!(same.entity_type.as_deref(), Some("employee"));
        assert_eq!(same.references, vec![Reference::SameScope("department".to_string())]);
        assert!(same.fields.is_empty());

        let that = translator().parse("delete that record").expect("parse should succeed");
        assert_eq!(that.operation, OperationKind::Delete);
        assert_eq!(that.entity_type, None);
        assert_eq!(that.references, vec![Reference::ThatRecord]);

        let last = translator().parse("list them again").expect("parse should succeed");
        assert_eq!(last.references, vec![Reference::LastEntity]);
    }

    #[test]
    fn aliases_and_implied_entities_are_recognised() {
        let staff = translator().parse("show all staff").expect("parse should succeed");
        assert_eq!(staff.entity_type.as_deref(), Some("employee"));
        assert!(staff.fields.is_empty());

        let hire = translator().parse("hire Ada Lovelace").expect("parse should succeed");
        assert_eq!(hire.entity_type.as_deref(), Some("employee"));
        assert_eq!(field(&hire, "name"), Some("Ada Lovelace"));

        let project = translator()
            .parse("create project Apollo with budget=250000")
            .expect("parse should succeed");
        assert_eq!(project.entity_type.as_deref(), Some("project"));
        assert_eq!(field(&project, "name"), Some("Apollo"));
        assert_eq!(field(&project, "budget"), Some("250000"));
    }

    #[test]
    fn utterance_without_operation_is_rejected() {
        assert_eq!(
            translator().parse("John Doe from Engineering"),
            Err(TranslationError::NoOperation("John Doe from Engineering".to_string()))
        );
        assert_eq!(translator().parse("   "), Err(TranslationError::EmptyUtterance));
    }

    #[test]
    fn translation_errors_become_dialogue_failures() {
        let error = DialogueError::from(TranslationError::Llm("connection refused".to_string()));
        assert_eq!(
            error,
            DialogueError::TranslationFailed(
                "language model call failed: connection refused".to_string()
            )
        );
        assert!(error.failure_reason().is_some());
    }

    struct ScriptedClient {
        replies: Mutex<Vec<Result<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Result<String>>) -> Self {
            Self { replies: Mutex::new(replies), prompts: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().expect("prompts lock").push(prompt.to_string());
            self.replies.lock().expect("replies lock").remove(0)
        }
    }

    #[tokio::test]
    async fn llm_answer_in_code_fence_is_parsed() {
        let client = ScriptedClient::new(vec![Ok(
            "```json\n{\"entity_type\": \"employee\", \"operation\": \"insert\", \
             \"fields\": {\"name\": \"John Doe\", \"salary\": 75000, \"hire_date\": null}, \
             \"references\": [{\"kind\": \"same_scope\", \"field\": \"department\"}]}\n```"
                .to_string(),
        )]);
        let translator = LlmTranslator::new(client);

        let request = translator
            .translate("add John Doe to the same department", "- employee (fields: ...)")
            .await
            .expect("translation succeeds");

        assert_eq!(request.operation, OperationKind::Create);
        assert_eq!(request.entity_type.as_deref(), Some("employee"));
        assert_eq!(request.fields.get("salary").map(String::as_str), Some("75000"));
        assert!(!request.fields.contains_key("hire_date"));
        assert_eq!(request.references, vec![Reference::SameScope("department".to_string())]);

        let prompts = translator.client.prompts.lock().expect("prompts lock").clone();
        assert!(prompts[0].contains("- employee (fields: ...)"));
        assert!(prompts[0].contains("add John Doe to the same department"));
    }

    #[tokio::test]
    async fn llm_failures_map_to_translation_errors() {
        let translator = LlmTranslator::new(ScriptedClient::new(vec![
            Err(anyhow!("connection refused")),
            Ok("I think you want to add someone".to_string()),
        ]));

        let first = translator.translate("add someone", "").await;
        assert!(matches!(
            first,
            Err(TranslationError::Llm(ref message)) if message.contains("refused")
        ));

        let second = translator.translate("add someone", "").await;
        assert!(matches!(second, Err(TranslationError::MalformedResponse(_))));
    }
}
