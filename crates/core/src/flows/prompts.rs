use std::sync::{Arc, Mutex};

use crate::flows::states::FieldPrompt;

/// Receives a prompt each time the engine starts awaiting a field.
pub trait PromptSink: Send + Sync {
    fn emit(&self, prompt: &FieldPrompt);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NullPromptSink;

impl PromptSink for NullPromptSink {
    fn emit(&self, _prompt: &FieldPrompt) {}
}

#[derive(Clone, Default)]
pub struct InMemoryPromptSink {
    prompts: Arc<Mutex<Vec<FieldPrompt>>>,
}

impl InMemoryPromptSink {
    pub fn prompts(&self) -> Vec<FieldPrompt> {
        match self.prompts.lock() {
            Ok(prompts) => prompts.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn last_field(&self) -> Option<String> {
        self.prompts().last().map(|prompt| prompt.field_name.clone())
    }
}

impl PromptSink for InMemoryPromptSink {
    fn emit(&self, prompt: &FieldPrompt) {
        match self.prompts.lock() {
            Ok(mut prompts) => prompts.push(prompt.clone()),
            Err(poisoned) => poisoned.into_inner().push(prompt.clone()),
        }
    }
}
