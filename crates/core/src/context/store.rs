use tracing::info;

use crate::context::{ConversationContext, OperationRecord};

/// Owns one session's `ConversationContext`. Readers borrow it; the updater is the only writer.
#[derive(Clone, Debug, Default)]
pub struct ContextStore {
    context: ConversationContext,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a store from a serialized snapshot, re-applying the history caps.
    pub fn restore(mut snapshot: ConversationContext) -> Self {
        snapshot.enforce_limits();
        Self { context: snapshot }
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    pub fn snapshot(&self) -> ConversationContext {
        self.context.clone()
    }

    pub fn clear(&mut self) {
        info!(
            event_name = "context.cleared",
            history_len = self.context.operation_history().len(),
            "conversation context cleared"
        );
        self.context = ConversationContext::default();
    }

    pub(crate) fn apply(&mut self, record: OperationRecord) {
        self.context.record(record);
    }
}
