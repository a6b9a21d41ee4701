//! Context-driven suggestions
//!
//! Ranks likely field values and follow-up operations from the session's operation history.

mod engine;
mod types;

pub use engine::ContextSuggestionEngine;
pub use types::*;

/// Maximum field suggestions returned per call
pub const DEFAULT_MAX_FIELD_SUGGESTIONS: usize = 5;

/// Follow-up operations returned per call
pub const DEFAULT_FOLLOW_UP_LIMIT: usize = 3;
