pub mod engine;
pub mod prompts;
pub mod states;

pub use engine::{transition, SlotFillingEngine};
pub use prompts::{InMemoryPromptSink, NullPromptSink, PromptSink};
pub use states::{
    CompletedOperation, DialogueEvent, DialogueState, FailedOperation, FailureReason, FieldPrompt,
    FieldRejection, PendingOperation, SlotContext, SlotOutcome, TransitionOutcome,
};
